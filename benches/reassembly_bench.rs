use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use gatewire::config::MAX_FRAME_LEN;
use gatewire::core::frame::Frame;
use gatewire::core::reassembly::FrameReassembler;

#[allow(clippy::unwrap_used)]
fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");
    let payload_sizes = [0usize, 64, 512, 4096];

    for &size in &payload_sizes {
        let bytes = Frame {
            opcode: 0x20,
            sequence: 1,
            payload: vec![0u8; size],
        }
        .encode();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_function(format!("single_frame_{size}b"), |b| {
            b.iter_batched(
                || FrameReassembler::new(64 * 1024, MAX_FRAME_LEN),
                |mut reassembler| {
                    reassembler.spare_mut()[..bytes.len()].copy_from_slice(&bytes);
                    let emitted = reassembler.feed(bytes.len(), |_| Ok(())).unwrap();
                    assert_eq!(emitted, 1);
                },
                BatchSize::SmallInput,
            );
        });
    }

    // Many small frames in one pass, the shape of a busy client burst
    let mut burst = Vec::new();
    for i in 0..32u8 {
        burst.extend_from_slice(
            &Frame {
                opcode: 0x10,
                sequence: i,
                payload: vec![i; 24],
            }
            .encode(),
        );
    }
    group.throughput(Throughput::Bytes(burst.len() as u64));
    group.bench_function("burst_32_frames", |b| {
        b.iter_batched(
            || FrameReassembler::new(64 * 1024, MAX_FRAME_LEN),
            |mut reassembler| {
                reassembler.spare_mut()[..burst.len()].copy_from_slice(&burst);
                let emitted = reassembler.feed(burst.len(), |_| Ok(())).unwrap();
                assert_eq!(emitted, 32);
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_reassembly);
criterion_main!(benches);
