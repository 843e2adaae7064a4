//! Benchmarks for per-bin fan-out

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use reqbin::bin::Bin;
use reqbin::{BinKey, RequestRecord};

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for subscribers in [1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                let bin = Arc::new(Bin::new(BinKey::new("benchbin00")));
                let mut sessions: Vec<_> = (0..subscribers).map(|_| bin.subscribe(64)).collect();

                b.iter(|| {
                    let request = bin.append(RequestRecord::new("GET", "http://localhost/", vec![], "x"));
                    black_box(bin.fan_out(&request));
                    for session in &mut sessions {
                        black_box(session.try_next());
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_fan_out_saturated(c: &mut Criterion) {
    let bin = Arc::new(Bin::new(BinKey::new("benchbin00")));

    // Mailboxes fill once and every later delivery is a drop
    let _sessions: Vec<_> = (0..100).map(|_| bin.subscribe(1)).collect();

    c.bench_function("fan_out_saturated_100", |b| {
        b.iter(|| {
            let request = bin.append(RequestRecord::new("GET", "http://localhost/", vec![], "x"));
            black_box(bin.fan_out(&request))
        });
    });
}

criterion_group!(benches, bench_fan_out, bench_fan_out_saturated);
criterion_main!(benches);
