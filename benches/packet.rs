// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use criterion::{criterion_group, criterion_main, Criterion};
use puller::rtcp;
use puller::rtp::{RawPacket, RawPacketBuilder};
use std::convert::TryFrom;

/// A burst of 1400-byte video packets, as a camera would send for one frame.
fn burst() -> Vec<Box<[u8]>> {
    (0..64u16)
        .map(|i| {
            RawPacketBuilder {
                sequence_number: i,
                timestamp: 90_000,
                payload_type: 96,
                ssrc: 0x4cac_c3d1,
                mark: i == 63,
            }
            .build(std::iter::repeat(0xab).take(1388))
            .unwrap()
            .into_inner()
        })
        .collect()
}

// Sender report followed by a BYE, as sent at the end of a stream.
const SR_BYE: &[u8] = b"\
    \x80\xc8\x00\x06\x4c\xac\xc3\xd1\xe4\x0c\x8f\x8d\xa1\x2e\x61\x47\
    \x00\x01\x5f\x90\x00\x00\x00\x40\x00\x01\x5e\x80\
    \x81\xcb\x00\x01\x4c\xac\xc3\xd1";

fn criterion_benchmark(c: &mut Criterion) {
    let packets = burst();
    let total: usize = packets.iter().map(|p| p.len()).sum();
    let mut g = c.benchmark_group("packet");
    g.throughput(criterion::Throughput::Bytes(u64::try_from(total).unwrap()))
        .bench_function("validate_burst", |b| {
            b.iter(|| {
                for p in &packets {
                    let range = RawPacket::new(p).validate().unwrap();
                    criterion::black_box(&p[range]);
                }
            })
        });
    g.throughput(criterion::Throughput::Bytes(
        u64::try_from(SR_BYE.len()).unwrap(),
    ))
    .bench_function("find_bye", |b| {
        b.iter(|| assert!(rtcp::find_bye(criterion::black_box(SR_BYE)).is_some()))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
