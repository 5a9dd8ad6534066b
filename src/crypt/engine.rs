//! Keystream application, packet-integrity tags, and the seed trailer.
//!
//! The keystream walk is an involution: applying it twice with identical
//! parameters restores the original bytes, which is exactly what the
//! encrypt and decrypt paths rely on. The unusual double application of the
//! sequence-indexed salt byte is part of the wire contract with the fixed
//! legacy client and must not be "simplified".

use crate::crypt::dialog;
use crate::crypt::key::{
    derive_cipher_key, generate_crypto_seed, CipherKey, CipherMode, CipherTables, CryptoSeed,
    DEFAULT_KEY_A, DEFAULT_KEY_B,
};
use crate::crypt::salt::{SaltSeedTable, SaltTable, SaltTableSet};
use crate::error::{GateError, Result};
use md5::{Digest, Md5};
use std::sync::Arc;

/// Which way a frame travels on the wire.
///
/// Selects both the opcode mode table and the role-specific constants that
/// mask the seed trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client-to-server traffic
    ToServer,
    /// Server-to-client traffic
    ToClient,
}

/// Trailer masks for client-to-server frames
const TO_SERVER_SEED_XOR: [u8; 3] = [0x36, 0x4A, 0x15];

/// Trailer masks for server-to-client frames
const TO_CLIENT_SEED_XOR: [u8; 3] = [0x74, 0x24, 0x64];

impl Direction {
    fn seed_xor(self) -> [u8; 3] {
        match self {
            Direction::ToServer => TO_SERVER_SEED_XOR,
            Direction::ToClient => TO_CLIENT_SEED_XOR,
        }
    }
}

/// Bytes appended after the ciphertext: zero byte, integrity tag, seed
/// trailer. Per-packet mode adds one opcode echo byte.
const CIPHER_TRAILER_LEN: usize = 1 + 4 + 3;

/// Apply (or reverse) the XOR keystream over `data`.
///
/// Every byte is XORed with the current salt byte and the cycling key byte,
/// plus the sequence-indexed salt byte *except* at the position where the
/// rolling salt index equals the sequence itself. The key index cycles over
/// the key; each full cycle advances the salt index, wrapping at 256.
pub fn apply_keystream(data: &mut [u8], salts: &SaltTable, key: &CipherKey, sequence: u8) {
    let key = key.as_bytes();
    let sequence = sequence as usize;
    let sequence_salt = salts.get(sequence);

    let mut salt_index: usize = 0;
    let mut key_index: usize = 0;

    for byte in data.iter_mut() {
        *byte ^= salts.get(salt_index) ^ key[key_index];
        if salt_index != sequence {
            *byte ^= sequence_salt;
        }
        key_index += 1;
        if key_index == key.len() {
            key_index = 0;
            salt_index = (salt_index + 1) & 0xFF;
        }
    }
}

/// 4-byte integrity tag: fixed offsets of `MD5(opcode ‖ sequence ‖ body)`.
pub fn integrity_tag(opcode: u8, sequence: u8, body: &[u8]) -> [u8; 4] {
    let mut hasher = Md5::new();
    hasher.update([opcode, sequence]);
    hasher.update(body);
    let digest: [u8; 16] = hasher.finalize().into();
    [digest[13], digest[3], digest[11], digest[7]]
}

/// Per-connection cipher state.
///
/// Holds the negotiated salt-table seed and the long-lived key; the salt
/// tables, salt-seed table, and mode tables are shared read-only across
/// every connection of the gateway.
pub struct CipherEngine {
    tables: Arc<SaltTableSet>,
    seed_table: Arc<SaltSeedTable>,
    modes: Arc<CipherTables>,
    salt_seed: u8,
    normal_key: CipherKey,
}

impl CipherEngine {
    /// Engine with the fixed pre-negotiation key and salt seed 0.
    pub fn new(
        tables: Arc<SaltTableSet>,
        seed_table: Arc<SaltSeedTable>,
        modes: Arc<CipherTables>,
    ) -> Self {
        let normal_key = derive_cipher_key(DEFAULT_KEY_A, DEFAULT_KEY_B, &seed_table);
        Self {
            tables,
            seed_table,
            modes,
            salt_seed: 0,
            normal_key,
        }
    }

    /// Replace the long-lived key after key exchange.
    pub fn rekey(&mut self, a: u16, b: u8) {
        self.normal_key = derive_cipher_key(a, b, &self.seed_table);
    }

    /// Select the negotiated salt table.
    pub fn set_salt_seed(&mut self, seed: u8) {
        self.salt_seed = seed;
    }

    pub fn salt_seed(&self) -> u8 {
        self.salt_seed
    }

    /// Cipher mode for one opcode in one direction of travel.
    pub fn mode(&self, direction: Direction, opcode: u8) -> CipherMode {
        match direction {
            Direction::ToServer => self.modes.client.mode(opcode),
            Direction::ToClient => self.modes.server.mode(opcode),
        }
    }

    /// Encrypt the payload region `buf[payload_start..]` in place per the
    /// opcode's mode, growing `buf` with the cipher trailer (or the dialog
    /// header) as required.
    pub fn encrypt_payload(
        &self,
        opcode: u8,
        sequence: u8,
        buf: &mut Vec<u8>,
        payload_start: usize,
        direction: Direction,
    ) -> Result<()> {
        match self.mode(direction, opcode) {
            CipherMode::None => Ok(()),
            CipherMode::Dialog => dialog::encrypt_region(buf, payload_start),
            mode => {
                let per_packet = mode == CipherMode::KeyedPerPacket;

                // A seed pair rides on every packet; in normal mode it is a
                // decoy the receiver discards.
                let seed = generate_crypto_seed()?;
                let derived;
                let key = if per_packet {
                    derived = derive_cipher_key(seed.a, seed.b, &self.seed_table);
                    &derived
                } else {
                    &self.normal_key
                };

                let salts = self.tables.get(self.salt_seed);
                apply_keystream(&mut buf[payload_start..], salts, key, sequence);

                buf.push(0x00);
                if per_packet {
                    buf.push(opcode);
                }
                let tag = integrity_tag(opcode, sequence, &buf[payload_start..]);
                buf.extend_from_slice(&tag);

                let xor = direction.seed_xor();
                buf.push((seed.a & 0xFF) as u8 ^ xor[0]);
                buf.push(seed.b ^ xor[1]);
                buf.push((seed.a >> 8) as u8 ^ xor[2]);
                Ok(())
            }
        }
    }

    /// Decrypt one payload in place per the opcode's mode.
    ///
    /// Returns the plaintext length, left at the front of `data`. Tag or
    /// checksum mismatches are fatal protocol violations.
    pub fn decrypt_payload(
        &self,
        opcode: u8,
        sequence: u8,
        data: &mut [u8],
        direction: Direction,
    ) -> Result<usize> {
        match self.mode(direction, opcode) {
            CipherMode::None => Ok(data.len()),
            CipherMode::Dialog => dialog::decrypt_in_place(data),
            mode => {
                let per_packet = mode == CipherMode::KeyedPerPacket;
                let trailer_len = CIPHER_TRAILER_LEN + usize::from(per_packet);

                let n = data.len();
                if n < trailer_len {
                    return Err(GateError::ShortCiphertext(n));
                }

                let xor = direction.seed_xor();
                let seed = CryptoSeed {
                    a: u16::from_be_bytes([data[n - 1] ^ xor[2], data[n - 3] ^ xor[0]]),
                    b: data[n - 2] ^ xor[1],
                };

                // Tag covers ciphertext, zero byte, and opcode echo
                let body_end = n - 7;
                let expected = integrity_tag(opcode, sequence, &data[..body_end]);
                if expected != data[body_end..n - 3] {
                    return Err(GateError::TagMismatch);
                }

                let mut cipher_end = body_end;
                if per_packet {
                    cipher_end -= 1;
                    if data[cipher_end] != opcode {
                        return Err(GateError::TagMismatch);
                    }
                }
                cipher_end -= 1; // trailing zero byte

                let derived;
                let key = if per_packet {
                    derived = derive_cipher_key(seed.a, seed.b, &self.seed_table);
                    &derived
                } else {
                    &self.normal_key
                };

                let salts = self.tables.get(self.salt_seed);
                apply_keystream(&mut data[..cipher_end], salts, key, sequence);
                Ok(cipher_end)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::key::CipherModeTable;

    fn engine() -> CipherEngine {
        let tables = Arc::new(SaltTableSet::build("default"));
        let seed_table = Arc::new(SaltSeedTable::derive("default"));
        CipherEngine::new(tables, seed_table, Arc::new(CipherTables::default()))
    }

    fn round_trip(engine: &CipherEngine, opcode: u8, sequence: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = payload.to_vec();
        engine
            .encrypt_payload(opcode, sequence, &mut buf, 0, Direction::ToClient)
            .unwrap();
        let len = engine
            .decrypt_payload(opcode, sequence, &mut buf, Direction::ToClient)
            .unwrap();
        buf.truncate(len);
        buf
    }

    #[test]
    fn keystream_is_involution() {
        let tables = SaltTableSet::build("default");
        let seed_table = SaltSeedTable::derive("default");
        let key = derive_cipher_key(300, 120, &seed_table);

        let original: Vec<u8> = (0..300).map(|i| (i * 7) as u8).collect();
        let mut data = original.clone();
        apply_keystream(&mut data, tables.get(3), &key, 42);
        assert_ne!(data, original);
        apply_keystream(&mut data, tables.get(3), &key, 42);
        assert_eq!(data, original);
    }

    #[test]
    fn sequence_salt_double_application() {
        // At salt_index == sequence the sequence salt must be applied once,
        // not twice; anywhere else both XORs land. With a zero key the
        // keystream byte collapses to the salt pattern alone.
        let tables = SaltTableSet::build("default");
        let salts = tables.get(0);
        let seed_table = SaltSeedTable::derive("default");
        let cipher_key = derive_cipher_key(256, 100, &seed_table);
        // First 9 bytes ride salt_index 0; sequence 0 means the extra XOR
        // must be skipped for them.
        let mut data = vec![0u8; 18];
        apply_keystream(&mut data, salts, &cipher_key, 0);
        let key = cipher_key.as_bytes();
        let seq_salt = salts.get(0);
        for i in 0..9 {
            assert_eq!(data[i], salts.get(0) ^ key[i]);
        }
        for i in 9..18 {
            assert_eq!(data[i], salts.get(1) ^ key[i - 9] ^ seq_salt);
        }
    }

    #[test]
    fn normal_mode_round_trip() {
        let engine = engine();
        for len in [0usize, 1, 64, 1000] {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            assert_eq!(round_trip(&engine, 0x20, 5, &payload), payload);
        }
    }

    #[test]
    fn per_packet_mode_round_trip() {
        let engine = engine();
        // 0x17 is per-packet in the server table
        let payload = b"fresh key every packet".to_vec();
        assert_eq!(round_trip(&engine, 0x17, 200, &payload), payload);
    }

    #[test]
    fn clear_mode_passes_through() {
        let engine = engine();
        let mut buf = b"hello".to_vec();
        engine
            .encrypt_payload(0x00, 0, &mut buf, 0, Direction::ToClient)
            .unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn dialog_mode_round_trips_through_engine() {
        let engine = engine();
        let payload = b"chant words".to_vec();
        assert_eq!(round_trip(&engine, 0x4D, 9, &payload), payload);
    }

    #[test]
    fn trailer_masks_differ_per_direction() {
        // A per-packet frame read with the wrong role constants recovers a
        // different seed, so the derived key (and thus the plaintext) is
        // wrong even though the frame is structurally valid.
        let tables = Arc::new(SaltTableSet::build("default"));
        let seed_table = Arc::new(SaltSeedTable::derive("default"));
        let modes = Arc::new(CipherTables {
            client: CipherModeTable::uniform(CipherMode::KeyedPerPacket),
            server: CipherModeTable::uniform(CipherMode::KeyedPerPacket),
        });
        let engine = CipherEngine::new(tables, seed_table, modes);

        let original = b"routed wrong".to_vec();
        let mut buf = original.clone();
        engine
            .encrypt_payload(0x20, 1, &mut buf, 0, Direction::ToClient)
            .unwrap();
        let len = engine
            .decrypt_payload(0x20, 1, &mut buf, Direction::ToServer)
            .unwrap();
        assert_ne!(&buf[..len], &original[..]);
    }

    #[test]
    fn tampered_ciphertext_fails_tag() {
        let engine = engine();
        let mut buf = b"important".to_vec();
        engine
            .encrypt_payload(0x20, 1, &mut buf, 0, Direction::ToClient)
            .unwrap();
        buf[0] ^= 0x01;
        assert!(matches!(
            engine.decrypt_payload(0x20, 1, &mut buf, Direction::ToClient),
            Err(GateError::TagMismatch)
        ));
    }

    #[test]
    fn short_ciphertext_rejected() {
        let engine = engine();
        let mut buf = vec![0u8; 5];
        assert!(matches!(
            engine.decrypt_payload(0x20, 0, &mut buf, Direction::ToClient),
            Err(GateError::ShortCiphertext(5))
        ));
    }

    #[test]
    fn rekey_changes_keystream() {
        let mut ct_a = b"same plaintext".to_vec();
        let mut ct_b = ct_a.clone();
        let tables = SaltTableSet::build("default");
        // Compare raw keystreams, sidestepping the random trailer
        let seed_table = SaltSeedTable::derive("default");
        apply_keystream(
            &mut ct_a,
            tables.get(0),
            &derive_cipher_key(4000, 200, &seed_table),
            1,
        );
        apply_keystream(
            &mut ct_b,
            tables.get(0),
            &derive_cipher_key(DEFAULT_KEY_A, DEFAULT_KEY_B, &seed_table),
            1,
        );
        assert_ne!(ct_a, ct_b);

        // And a rekeyed engine agrees with itself
        let mut rekeyed = engine();
        rekeyed.rekey(4000, 200);
        let mut buf = b"hello".to_vec();
        rekeyed
            .encrypt_payload(0x20, 3, &mut buf, 0, Direction::ToClient)
            .unwrap();
        let len = rekeyed
            .decrypt_payload(0x20, 3, &mut buf, Direction::ToClient)
            .unwrap();
        assert_eq!(&buf[..len], b"hello");
    }

    #[test]
    fn per_packet_trailer_recovers_seed() {
        // The embedded seed must survive the trailer masking: two engines
        // that share only static tables can exchange per-packet frames.
        let sender = engine();
        let receiver = engine();
        let mut buf = b"seed in trailer".to_vec();
        sender
            .encrypt_payload(0x17, 77, &mut buf, 0, Direction::ToClient)
            .unwrap();
        let len = receiver
            .decrypt_payload(0x17, 77, &mut buf, Direction::ToClient)
            .unwrap();
        assert_eq!(&buf[..len], b"seed in trailer");
    }

    #[test]
    fn payload_region_offset_is_respected() {
        let engine = engine();
        let mut buf = vec![0xAA, 0x00, 0x00, 0x20, 0x01];
        buf.extend_from_slice(b"framed payload");
        engine
            .encrypt_payload(0x20, 1, &mut buf, 5, Direction::ToClient)
            .unwrap();
        // Header untouched
        assert_eq!(&buf[..5], &[0xAA, 0x00, 0x00, 0x20, 0x01]);

        let mut payload = buf[5..].to_vec();
        let len = engine
            .decrypt_payload(0x20, 1, &mut payload, Direction::ToClient)
            .unwrap();
        assert_eq!(&payload[..len], b"framed payload");
    }

    #[test]
    fn uniform_mode_table_override() {
        let tables = Arc::new(SaltTableSet::build("default"));
        let seed_table = Arc::new(SaltSeedTable::derive("default"));
        let modes = Arc::new(CipherTables {
            client: CipherModeTable::uniform(CipherMode::None),
            server: CipherModeTable::uniform(CipherMode::None),
        });
        let engine = CipherEngine::new(tables, seed_table, modes);
        let mut buf = b"clear".to_vec();
        engine
            .encrypt_payload(0x42, 0, &mut buf, 0, Direction::ToServer)
            .unwrap();
        assert_eq!(buf, b"clear");
    }
}
