use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use muxlink_core::frame::{uih_frame, MuxFrame, DATA_DLCI};
use muxlink_core::{crc8, FCS_INIT, FCS_POLYNOMIAL};

fn bench_crc(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc8");
    for size in [3usize, 64, 127] {
        let data = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::new("reflected", size), |b| {
            b.iter(|| crc8(&data, FCS_POLYNOMIAL, FCS_INIT, true))
        });
    }
    group.finish();
}

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");

    let payload = vec![0x7Eu8; 127];
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("encode/127", |b| {
        b.iter(|| uih_frame(DATA_DLCI, &payload).unwrap())
    });

    let raw = uih_frame(DATA_DLCI, &payload).unwrap();
    group.bench_function("parse/127", |b| {
        b.iter(|| MuxFrame::parse(raw.clone()).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_crc, bench_frame);
criterion_main!(benches);
