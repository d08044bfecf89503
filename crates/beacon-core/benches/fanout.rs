//! Fan-out and identity benchmarks for Beacon.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tenvis_beacon_core::{fan_out, ConnectionHandle, IdentityGenerator, Member, Outbound};
use tenvis_beacon_transport::ConnectionId;
use tokio::sync::mpsc;

fn build_members(count: usize) -> (Vec<Member>, Vec<mpsc::Receiver<Outbound>>) {
    let generator = IdentityGenerator::default();
    (0..count)
        .map(|i| {
            let (handle, rx) = ConnectionHandle::new(ConnectionId::next(), 16);
            let identity = generator.generate(&format!("member-{}", i));
            (Member { identity, handle }, rx)
        })
        .unzip()
}

/// Benchmark writing one frame to a room's members.
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    let frame = Bytes::from(vec![b'x'; 512]);

    for size in [10, 100, 1000] {
        let (members, mut receivers) = build_members(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &members, |b, members| {
            b.iter(|| {
                let outcome = fan_out(black_box(members), &frame);
                for rx in &mut receivers {
                    while rx.try_recv().is_ok() {}
                }
                outcome
            })
        });
    }

    group.finish();
}

/// Benchmark identity derivation.
fn bench_identity(c: &mut Criterion) {
    let generator = IdentityGenerator::default();
    let mut i = 0u64;

    c.bench_function("identity_generate", |b| {
        b.iter(|| {
            i += 1;
            generator.generate(black_box(&format!("seed-{}", i)))
        })
    });
}

criterion_group!(benches, bench_fan_out, bench_identity);
criterion_main!(benches);
