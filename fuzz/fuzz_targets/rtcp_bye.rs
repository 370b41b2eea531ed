// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(bye) = puller::rtcp::find_bye(data) {
        for _ in bye.ssrcs() {}
        let _ = bye.reason();
    }
});
