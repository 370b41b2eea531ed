// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]
use libfuzzer_sys::fuzz_target;

use puller::rtp::RawPacket;

fuzz_target!(|data: &[u8]| {
    let pkt = RawPacket::new(data);
    let _ = (pkt.sequence_number(), pkt.timestamp(), pkt.ssrc(), pkt.mark());
    let _ = pkt.header_len();
    let Ok(range) = pkt.validate() else {
        assert!(pkt.payload().is_empty());
        assert!(pkt.to_owned_packet().is_err());
        return;
    };
    assert!(range.start <= range.end && range.end <= data.len());
    assert_eq!(pkt.payload(), &data[range]);
    let mut owned = pkt.to_owned_packet().unwrap();
    owned.set_sequence_number(pkt.sequence_number().wrapping_add(1));
});
