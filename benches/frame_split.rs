use avatalk::audio::frame::split;
use avatalk::defaults::{FRAME_SIZE, SAMPLE_RATE};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

/// Reply lengths in seconds of 16 kHz 16-bit mono audio
const REPLY_SECONDS: &[usize] = &[1, 5, 30];

fn bench_frame_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_split");

    for &seconds in REPLY_SECONDS {
        let reply = vec![0u8; seconds * SAMPLE_RATE as usize * 2];
        group.throughput(Throughput::Bytes(reply.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}s", seconds)),
            &reply,
            |b, reply| b.iter(|| split(black_box(reply), FRAME_SIZE)),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_frame_split);
criterion_main!(benches);
