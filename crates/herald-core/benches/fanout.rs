//! Fan-out benchmarks for Herald.
//!
//! Measures registry broadcast and room routing across connection counts.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use herald_core::{
    Connection, ConnectionRegistry, FanoutRouter, MemoryPendingQueue, MemoryRoomDirectory,
};
use herald_protocol::{DomainEvent, RoomMessage, ServerFrame};
use std::sync::Arc;
use tokio::sync::mpsc;

type Receivers = Vec<mpsc::Receiver<Arc<ServerFrame>>>;

/// Register `count` connections with buffers large enough for one iteration.
fn populate(registry: &ConnectionRegistry, count: usize) -> Receivers {
    (0..count)
        .map(|i| {
            let (conn, rx) = Connection::channel(4);
            registry.register(format!("user-{i}"), conn);
            rx
        })
        .collect()
}

fn drain(receivers: &mut Receivers) {
    for rx in receivers.iter_mut() {
        while rx.try_recv().is_ok() {}
    }
}

/// Benchmark `broadcast_all`.
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast_all");

    for count in [10, 100, 1_000] {
        let registry = ConnectionRegistry::new();
        let mut receivers = populate(&registry, count);
        let frame = Arc::new(ServerFrame::from(&DomainEvent::presence("bench", true)));

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let delivered = registry.broadcast_all(black_box(Arc::clone(&frame)));
                drain(&mut receivers);
                delivered
            });
        });
    }

    group.finish();
}

/// Benchmark routing a room message to every member.
fn bench_room_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("room_message");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    for count in [10, 100, 1_000] {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(MemoryRoomDirectory::new());
        let mut receivers = populate(&registry, count);
        for i in 0..count {
            rooms.join("general", format!("user-{i}"));
        }
        let router = FanoutRouter::new(registry, rooms, Arc::new(MemoryPendingQueue::new()));

        let event = DomainEvent::NewMessage(RoomMessage {
            id: None,
            room: "general".to_string(),
            sender: "user-0".to_string(),
            content: "hello".to_string(),
            timestamp: 0,
        });

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let delivery = runtime.block_on(router.route(black_box(&event))).unwrap();
                drain(&mut receivers);
                delivery
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_broadcast, bench_room_message);
criterion_main!(benches);
