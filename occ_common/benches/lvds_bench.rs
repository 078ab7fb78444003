//! Packet encoding benchmarks

use criterion::{Criterion, criterion_group, criterion_main};
use occ_common::prelude::*;
use std::hint::black_box;

/// Benchmark LVDS framing for typical configuration payload sizes
fn bench_lvds_encode(c: &mut Criterion) {
    let small = vec![0xA5u8; 16];
    let config = vec![0xA5u8; 512];

    c.bench_function("lvds_encode_16_bytes", |b| {
        b.iter(|| black_box(Packet::create_lvds(0x0A00_0001, Command::WriteConfig, 0, &small).unwrap()));
    });

    c.bench_function("lvds_encode_512_bytes", |b| {
        b.iter(|| black_box(Packet::create_lvds(0x0A00_0001, Command::WriteConfig, 0, &config).unwrap()));
    });
}

/// Benchmark LVDS decoding with parity checks
fn bench_lvds_decode(c: &mut Criterion) {
    let pkt = Packet::create_lvds(0x0A00_0001, Command::WriteConfig, 0, &[0x5Au8; 512]).unwrap();

    c.bench_function("lvds_decode_512_bytes", |b| {
        b.iter(|| black_box(pkt.view().decode_lvds(Addressing::Unicast).unwrap()));
    });
}

/// Benchmark response accessors used on every received packet
fn bench_response_accessors(c: &mut Criterion) {
    let info = (CommandFlags::IS_COMMAND | CommandFlags::IS_RESPONSE | CommandFlags::IS_PASSTHRU)
        .bits()
        | 0x41;
    let pkt = Packet::new(HWID_SELF, 0x1532_5501, info, &[0x0A00_0001, 0x22, 1, 2, 3]).unwrap();

    c.bench_function("response_type_passthru_ack", |b| {
        b.iter(|| {
            let view = black_box(pkt.view());
            black_box((view.response_type(), view.source_address(), view.payload_length()))
        });
    });
}

criterion_group!(
    benches,
    bench_lvds_encode,
    bench_lvds_decode,
    bench_response_accessors
);
criterion_main!(benches);
