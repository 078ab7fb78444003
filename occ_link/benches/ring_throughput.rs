//! Ring buffer and packet view throughput benchmarks

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use occ::packet::Packet;
use occ::packet::command::Command;
use occ_link::PacketList;
use occ_link::ring::{CircularBuffer, local_ring};
use std::hint::black_box;

/// Benchmark push/wait/consume cycles with a wrapping producer offset
fn bench_push_consume(c: &mut Criterion) {
    let (mut tx, mut rx) = local_ring(1 << 20).unwrap();
    let chunk = vec![0x5Au8; 9000];

    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Bytes(chunk.len() as u64));
    group.bench_function("push_wait_consume_9k", |b| {
        b.iter(|| {
            let accepted = tx.push(black_box(&chunk));
            let window = rx.wait().unwrap();
            let len = black_box(window.len());
            rx.consume(len).unwrap();
            accepted
        });
    });
    group.finish();
}

/// Benchmark walking a window of small packets
fn bench_packet_walk(c: &mut Criterion) {
    let mut window = Vec::new();
    for i in 0..256u32 {
        let pkt = Packet::create_occ(0x0A00_0001, Command::ReadStatus, 0, &[i; 14]).unwrap();
        window.extend_from_slice(pkt.as_bytes());
    }

    c.bench_function("packet_list_walk_256", |b| {
        b.iter(|| {
            let list = PacketList::new();
            let _ = list.reset(&window[..]);
            let count = list.reserve().map(|r| r.packets().count()).unwrap_or(0);
            list.release();
            black_box(list.wait_all_released());
            count
        });
    });
}

criterion_group!(benches, bench_push_consume, bench_packet_walk);
criterion_main!(benches);
