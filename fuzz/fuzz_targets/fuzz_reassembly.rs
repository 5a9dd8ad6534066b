#![no_main]

use gatewire::config::MAX_FRAME_LEN;
use gatewire::core::reassembly::FrameReassembler;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes in arbitrary chunk sizes - test for panics,
    // out-of-bounds slicing, and infinite loops. Protocol violations are
    // expected outcomes, not crashes.
    let mut reassembler = FrameReassembler::new(16 * 1024, MAX_FRAME_LEN);
    let mut fed = 0usize;
    let mut chunk = 1usize;
    while fed < data.len() {
        if reassembler.check_capacity().is_err() {
            break;
        }
        let spare = reassembler.spare_mut();
        if spare.is_empty() {
            break;
        }
        let n = chunk.min(spare.len()).min(data.len() - fed);
        spare[..n].copy_from_slice(&data[fed..fed + n]);
        fed += n;
        chunk = (chunk * 3 + 1) % 97 + 1;
        if reassembler.feed(n, |_| Ok(())).is_err() {
            break;
        }
    }
});
