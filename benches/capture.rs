//! Benchmarks for the capture path

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio_util::sync::CancellationToken;

use reqbin::config::Config;
use reqbin::event::RequestEvent;
use reqbin::{BinService, CapturedRequest, RequestRecord};

fn request(body: Vec<u8>) -> RequestRecord {
    RequestRecord::new(
        "POST",
        "http://localhost:8000/g/benchbin00",
        vec![("Content-Type".to_string(), "application/json".to_string())],
        body,
    )
}

fn bench_capture_single_request(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let shutdown = CancellationToken::new();

    let (service, _broker) = rt.block_on(async { BinService::spawn(&Config::default(), shutdown.clone()) });
    let key = service.create_bin().unwrap();

    c.bench_function("capture_single_request", |b| {
        b.iter(|| {
            rt.block_on(async {
                service
                    .capture(black_box(&key), request(b"{}".to_vec()))
                    .await
                    .unwrap();
            });
        });
    });

    shutdown.cancel();
}

fn bench_capture_with_subscribers(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let shutdown = CancellationToken::new();

    let (service, _broker) = rt.block_on(async { BinService::spawn(&Config::default(), shutdown.clone()) });
    let key = service.create_bin().unwrap();
    let mut sessions: Vec<_> = (0..10).map(|_| service.subscribe(&key).unwrap()).collect();

    c.bench_function("capture_10_subscribers", |b| {
        b.iter(|| {
            rt.block_on(async {
                service
                    .capture(black_box(&key), request(b"{}".to_vec()))
                    .await
                    .unwrap();
                for session in &mut sessions {
                    black_box(session.next().await);
                }
            });
        });
    });

    shutdown.cancel();
}

fn bench_history_snapshot(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (service, _broker) = BinService::new(&Config::default());
    let key = service.create_bin().unwrap();

    // Full history, broker not draining so only the ring is measured
    for i in 0..10 {
        let body = format!("{{\"n\":{i}}}").into_bytes();
        rt.block_on(service.capture(&key, request(body))).unwrap();
    }

    c.bench_function("history_snapshot", |b| {
        b.iter(|| black_box(service.history(black_box(&key)).unwrap()));
    });
}

fn bench_event_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_encoding");

    for size in [100, 10_000, 1_000_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let captured = CapturedRequest {
                key: reqbin::BinKey::new("benchbin00"),
                seq: 1,
                record: request(vec![b'x'; size]),
            };

            b.iter(|| {
                let event = RequestEvent::from_captured(black_box(&captured), 1_000_000);
                black_box(event.to_sse_frame().unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_capture_single_request,
    bench_capture_with_subscribers,
    bench_history_snapshot,
    bench_event_encoding
);
criterion_main!(benches);
