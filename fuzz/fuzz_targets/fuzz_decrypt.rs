#![no_main]

use gatewire::crypt::engine::{CipherEngine, Direction};
use gatewire::crypt::key::CipherTables;
use gatewire::crypt::salt::{SaltSeedTable, SaltTableSet};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::sync::OnceLock;

fn engine() -> &'static CipherEngine {
    static ENGINE: OnceLock<CipherEngine> = OnceLock::new();
    ENGINE.get_or_init(|| {
        CipherEngine::new(
            Arc::new(SaltTableSet::build("default")),
            Arc::new(SaltSeedTable::derive("default")),
            Arc::new(CipherTables::default()),
        )
    })
}

fuzz_target!(|data: &[u8]| {
    // Arbitrary ciphertext across every opcode mode: decryption may fail,
    // never panic
    if data.is_empty() {
        return;
    }
    let opcode = data[0];
    let sequence = data[data.len() - 1];
    let mut buf = data.to_vec();
    let _ = engine().decrypt_payload(opcode, sequence, &mut buf, Direction::ToServer);

    let mut buf = data.to_vec();
    let _ = engine().decrypt_payload(opcode, sequence, &mut buf, Direction::ToClient);
});
