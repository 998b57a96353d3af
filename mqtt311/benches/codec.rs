//! Benchmarks for MQTT framing primitives.
//!
//! Run with: cargo bench -p giztoy-mqtt311

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;

use giztoy_mqtt311::{ConnectMessage, FramedStream, Will, codec};

fn bench_variable_int(c: &mut Criterion) {
    let mut group = c.benchmark_group("variable_int");
    let mut buf = [0u8; 4];

    for value in [127u32, 16_383, 2_097_151, 268_435_455] {
        group.bench_with_input(BenchmarkId::new("encode", value), &value, |b, &value| {
            b.iter(|| codec::write_variable_int(&mut buf, black_box(value)))
        });

        let len = codec::write_variable_int(&mut buf, value).unwrap();
        let encoded = buf[..len].to_vec();
        group.bench_with_input(BenchmarkId::new("decode", value), &encoded, |b, encoded| {
            b.iter(|| codec::read_variable_int(black_box(encoded)))
        });
    }

    group.finish();
}

fn bench_connect(c: &mut Criterion) {
    let minimal = ConnectMessage::new("bench-client");
    let full = ConnectMessage {
        username: Some("user".into()),
        password: Some(b"password".to_vec()),
        will: Some(Will::new("devices/bench/status", b"offline".to_vec())),
        keep_alive: Duration::from_secs(60),
        ..ConnectMessage::new("bench-client")
    };

    let mut group = c.benchmark_group("connect_encode");
    for (name, msg) in [("minimal", &minimal), ("will_and_credentials", &full)] {
        let mut buf = vec![0u8; msg.wire_size()];
        group.bench_function(name, |b| b.iter(|| black_box(msg).write_to(&mut buf)));
    }
    group.finish();
}

fn bench_frame_roundtrip(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let mut group = c.benchmark_group("frame_roundtrip");

    for size in [64usize, 1024, 16 * 1024] {
        let payload = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.to_async(&rt).iter(|| async {
                let (a, b) = tokio::io::duplex(64 * 1024);
                let mut tx = FramedStream::new(a).unwrap();
                let mut rx = FramedStream::new(b).unwrap();
                tx.write_frame(0x30, payload).await.unwrap();
                let mut out = bytes::BytesMut::new();
                rx.read_frame(&mut out).await.unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_variable_int, bench_connect, bench_frame_roundtrip);
criterion_main!(benches);
