//! Codec benchmarks for herald-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use herald_protocol::{codec, BusCodec, DomainEvent, RoomMessage, ServerFrame};

fn room_message(size: usize) -> DomainEvent {
    DomainEvent::NewMessage(RoomMessage {
        id: Some("0b7c6a4e-1f49-4c1e-9e36-0d2f3c8e5a11".to_string()),
        room: "general".to_string(),
        sender: "alice".to_string(),
        content: "x".repeat(size),
        timestamp: 1_700_000_000_000,
    })
}

fn bench_bus_encode(c: &mut Criterion) {
    let event = room_message(64);

    let mut group = c.benchmark_group("bus_encode");
    group.throughput(Throughput::Elements(1));
    for codec in [BusCodec::Json, BusCodec::Msgpack] {
        group.bench_function(codec.name(), |b| {
            b.iter(|| codec.encode(black_box(&event)))
        });
    }
    group.finish();
}

fn bench_bus_decode(c: &mut Criterion) {
    let event = room_message(64);

    let mut group = c.benchmark_group("bus_decode");
    for codec in [BusCodec::Json, BusCodec::Msgpack] {
        let encoded = codec.encode(&event).unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_function(codec.name(), |b| {
            b.iter(|| codec.decode(black_box(&encoded)))
        });
    }
    group.finish();
}

fn bench_server_frame(c: &mut Criterion) {
    let event = room_message(256);

    c.bench_function("server_frame_256B", |b| {
        b.iter(|| codec::encode_frame(&ServerFrame::from(black_box(&event))).unwrap())
    });
}

criterion_group!(
    benches,
    bench_bus_encode,
    bench_bus_decode,
    bench_server_frame
);
criterion_main!(benches);
