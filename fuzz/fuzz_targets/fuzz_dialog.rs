#![no_main]

use gatewire::crypt::dialog;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decrypting arbitrary bytes must never panic
    let _ = dialog::decrypt(data);

    // And a legitimate encrypt must always round-trip
    if let Ok(message) = dialog::encrypt(data) {
        let recovered = dialog::decrypt(&message).expect("round trip");
        assert_eq!(recovered, data);
    }
});
