// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Validates and reads RTP packet headers as described in
//! [RFC 3550 section 5.1](https://datatracker.ietf.org/doc/html/rfc3550#section-5.1).
//!
//! Sinks deliver whole packets when the session asks for raw packets, so
//! callers may want to re-validate what they receive:
//!
//! ```
//! # let delivered: &[u8] = b"\x80\x60\x12\x34\x00\x00\x00\x01\x00\x00\x00\x02hello";
//! let pkt = puller::rtp::RawPacket::new(delivered);
//! if pkt.header_is_valid() {
//!     assert_eq!(pkt.sequence_number(), 0x1234);
//!     assert_eq!(pkt.payload(), b"hello");
//! }
//! ```

use std::ops::Range;

/// The length of an RTP header with no CSRCs or extensions.
pub const MIN_HEADER_LEN: usize = 12;

/// The only RTP version in use.
pub const RTP_VERSION: u8 = 2;

/// Borrowed view of an RTP packet without state-specific interpretation.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           synchronization source (SSRC) identifier            |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |            contributing source (CSRC) identifiers             |
/// |                             ....                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Construction never fails and never copies; [`RawPacket::header_is_valid`]
/// decides whether the header accessors are meaningful. On packets shorter
/// than [`MIN_HEADER_LEN`] they read the missing bytes as zero.
#[derive(Copy, Clone)]
pub struct RawPacket<'a>(&'a [u8]);

impl<'a> RawPacket<'a> {
    /// Wraps `data`, whose length is the packet's declared total length.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        RawPacket(data)
    }

    /// Returns true if the header is not bad. A packet failing this check
    /// should simply be discarded.
    #[inline]
    pub fn header_is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Validates the header, returning the payload range within the packet.
    pub fn validate(&self) -> Result<Range<usize>, &'static str> {
        let data = self.0;
        let len = data.len();
        if len < MIN_HEADER_LEN {
            return Err("too short");
        }
        if data[0] >> 6 != RTP_VERSION {
            return Err("must be version 2");
        }
        let csrc_end = MIN_HEADER_LEN + 4 * usize::from(data[0] & 0b0000_1111);
        let payload_start = if (data[0] & 0b0001_0000) != 0 {
            if len < csrc_end + 4 {
                return Err("extension is after end of packet");
            }
            let extension_words = u16::from_be_bytes([data[csrc_end + 2], data[csrc_end + 3]]);
            csrc_end + 4 + 4 * usize::from(extension_words)
        } else {
            csrc_end
        };
        if len < payload_start {
            return Err("payload start is after end of packet");
        }
        let payload_end = if (data[0] & 0b0010_0000) != 0 {
            let padding_len = usize::from(data[len - 1]);
            if len == payload_start {
                return Err("missing padding");
            }
            if padding_len == 0 {
                return Err("invalid padding length 0");
            }
            match len.checked_sub(padding_len) {
                Some(e) if e >= payload_start => e,
                _ => return Err("bad padding"),
            }
        } else {
            len
        };
        Ok(payload_start..payload_end)
    }

    /// Returns the declared total length, including the header.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the fixed part of the header, zero-filled past the end of a
    /// short packet.
    fn fixed_header(&self) -> [u8; MIN_HEADER_LEN] {
        let mut h = [0; MIN_HEADER_LEN];
        let len = std::cmp::min(self.0.len(), MIN_HEADER_LEN);
        h[..len].copy_from_slice(&self.0[..len]);
        h
    }

    /// Returns the header length, including CSRCs and any extension.
    ///
    /// An extension whose length field lies past the end of the packet isn't
    /// counted.
    pub fn header_len(&self) -> usize {
        let csrc_end = MIN_HEADER_LEN + 4 * usize::from(self.csrc_count());
        let has_extension = (self.fixed_header()[0] & 0b0001_0000) != 0;
        match self.0.get(csrc_end + 2..csrc_end + 4) {
            Some(&[hi, lo]) if has_extension => {
                csrc_end + 4 + 4 * usize::from(u16::from_be_bytes([hi, lo]))
            }
            _ => csrc_end,
        }
    }

    #[inline]
    pub fn csrc_count(&self) -> u8 {
        self.fixed_header()[0] & 0b0000_1111
    }

    #[inline]
    pub fn mark(&self) -> bool {
        (self.fixed_header()[1] & 0b1000_0000) != 0
    }

    #[inline]
    pub fn payload_type(&self) -> u8 {
        self.fixed_header()[1] & 0b0111_1111
    }

    #[inline]
    pub fn sequence_number(&self) -> u16 {
        let h = self.fixed_header();
        u16::from_be_bytes([h[2], h[3]])
    }

    #[inline]
    pub fn timestamp(&self) -> u32 {
        let h = self.fixed_header();
        u32::from_be_bytes([h[4], h[5], h[6], h[7]])
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        let h = self.fixed_header();
        u32::from_be_bytes([h[8], h[9], h[10], h[11]])
    }

    /// Returns the payload bytes, or an empty slice if the header is invalid.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        match self.validate() {
            Ok(r) => &self.0[r],
            Err(_) => &[],
        }
    }

    /// Returns the full packet, including the header.
    #[inline]
    pub fn raw(&self) -> &'a [u8] {
        self.0
    }

    /// Copies a valid packet so it can outlive the buffer it was received into.
    pub fn to_owned_packet(&self) -> Result<OwnedRawPacket, &'static str> {
        self.validate()?;
        Ok(OwnedRawPacket(self.0.into()))
    }
}

impl std::fmt::Debug for RawPacket<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.header_is_valid() {
            return f
                .debug_tuple("RawPacket")
                .field(&crate::hex::LimitedHex::new(self.0, 64))
                .finish();
        }
        f.debug_struct("RawPacket")
            .field("ssrc", &format_args!("{:08x}", self.ssrc()))
            .field("sequence_number", &self.sequence_number())
            .field("timestamp", &self.timestamp())
            .field("payload_type", &self.payload_type())
            .field("mark", &self.mark())
            .field("payload", &crate::hex::LimitedHex::new(self.payload(), 64))
            .finish()
    }
}

/// A privately owned copy of an RTP packet.
///
/// Holds exactly one allocation, sized to the packet's length. Unlike
/// [`RawPacket`], the header fields can be rewritten in place. Always at
/// least [`MIN_HEADER_LEN`] bytes, as it's only built from a valid packet.
#[derive(Clone, PartialEq, Eq)]
pub struct OwnedRawPacket(Box<[u8]>);

impl OwnedRawPacket {
    #[inline]
    pub fn as_raw_packet(&self) -> RawPacket<'_> {
        RawPacket(&self.0[..])
    }

    #[inline]
    pub fn set_sequence_number(&mut self, sequence_number: u16) {
        self.0[2..4].copy_from_slice(&sequence_number.to_be_bytes());
    }

    #[inline]
    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.0[4..8].copy_from_slice(&timestamp.to_be_bytes());
    }

    #[inline]
    pub fn set_ssrc(&mut self, ssrc: u32) {
        self.0[8..12].copy_from_slice(&ssrc.to_be_bytes());
    }

    #[inline]
    pub fn into_inner(self) -> Box<[u8]> {
        self.0
    }
}

impl std::ops::Deref for OwnedRawPacket {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for OwnedRawPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.as_raw_packet(), f)
    }
}

/// Builds a simple packet: version 2, no padding, extension, or CSRCs.
#[derive(Copy, Clone, Debug, Default)]
pub struct RawPacketBuilder {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload_type: u8,
    pub ssrc: u32,
    pub mark: bool,
}

impl RawPacketBuilder {
    pub fn build<P: IntoIterator<Item = u8>>(
        self,
        payload: P,
    ) -> Result<OwnedRawPacket, &'static str> {
        if self.payload_type >= 0x80 {
            return Err("payload type too large");
        }
        let data: Vec<u8> = [
            RTP_VERSION << 6,
            if self.mark { 0b1000_0000 } else { 0 } | self.payload_type,
        ]
        .into_iter()
        .chain(self.sequence_number.to_be_bytes())
        .chain(self.timestamp.to_be_bytes())
        .chain(self.ssrc.to_be_bytes())
        .chain(payload)
        .collect();
        if data.len() > usize::from(u16::MAX) {
            return Err("payload too long");
        }
        Ok(OwnedRawPacket(data.into_boxed_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt() -> OwnedRawPacket {
        RawPacketBuilder {
            sequence_number: 0x1234,
            timestamp: 141_000,
            payload_type: 96,
            ssrc: 0xd25614e,
            mark: true,
        }
        .build(*b"foo")
        .unwrap()
    }

    #[test]
    fn accessors() {
        let p = pkt();
        let p = p.as_raw_packet();
        assert!(p.header_is_valid());
        assert_eq!(p.sequence_number(), 0x1234);
        assert_eq!(p.timestamp(), 141_000);
        assert_eq!(p.ssrc(), 0xd25614e);
        assert_eq!(p.payload_type(), 96);
        assert!(p.mark());
        assert_eq!(p.header_len(), MIN_HEADER_LEN);
        assert_eq!(p.payload(), b"foo");
        assert_eq!(p.len(), MIN_HEADER_LEN + 3);
    }

    #[test]
    fn setters() {
        let mut p = pkt();
        p.set_sequence_number(0xffff);
        p.set_timestamp(0x8000_0001);
        p.set_ssrc(42);
        let r = p.as_raw_packet();
        assert!(r.header_is_valid());
        assert_eq!(r.sequence_number(), 0xffff);
        assert_eq!(r.timestamp(), 0x8000_0001);
        assert_eq!(r.ssrc(), 42);
        assert_eq!(r.payload(), b"foo");
    }

    #[test]
    fn too_short() {
        let p = pkt();
        for len in 0..MIN_HEADER_LEN {
            assert!(!RawPacket::new(&p[..len]).header_is_valid(), "len={len}");
        }
        assert!(RawPacket::new(&p[..MIN_HEADER_LEN]).header_is_valid());
    }

    #[test]
    fn bad_version() {
        let mut data = pkt().to_vec();
        for version in [0u8, 1, 3] {
            data[0] = (data[0] & 0b0011_1111) | (version << 6);
            assert_eq!(RawPacket::new(&data).validate(), Err("must be version 2"));
        }
    }

    #[test]
    fn csrcs() {
        // Two CSRCs, then a one-byte payload.
        let mut data = pkt()[..MIN_HEADER_LEN].to_vec();
        data[0] |= 2;
        data.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 2, b'x']);
        let p = RawPacket::new(&data);
        assert!(p.header_is_valid());
        assert_eq!(p.csrc_count(), 2);
        assert_eq!(p.header_len(), 20);
        assert_eq!(p.payload(), b"x");

        // CSRC count claims more than the packet holds.
        data.truncate(19);
        assert!(!RawPacket::new(&data).header_is_valid());
    }

    #[test]
    fn extension() {
        let mut data = pkt()[..MIN_HEADER_LEN].to_vec();
        data[0] |= 0b0001_0000;
        data.extend_from_slice(&[0xbe, 0xde, 0x00, 0x01, 1, 2, 3, 4, b'y']);
        let p = RawPacket::new(&data);
        assert_eq!(p.validate(), Ok(20..21));
        assert_eq!(p.header_len(), 20);
        data.truncate(14);
        assert_eq!(
            RawPacket::new(&data).validate(),
            Err("extension is after end of packet")
        );
    }

    #[test]
    fn padding() {
        let mut data = pkt().to_vec();
        data[0] |= 0b0010_0000;
        data.extend_from_slice(&[0, 0, 3]);
        assert_eq!(RawPacket::new(&data).payload(), b"foo");
        *data.last_mut().unwrap() = 0;
        assert!(!RawPacket::new(&data).header_is_valid());
        *data.last_mut().unwrap() = 200;
        assert!(!RawPacket::new(&data).header_is_valid());
    }

    #[test]
    fn owned_copy_outlives_buffer() {
        let owned = {
            let buf = pkt().to_vec();
            RawPacket::new(&buf).to_owned_packet().unwrap()
        };
        assert_eq!(owned.as_raw_packet().sequence_number(), 0x1234);
        assert_eq!(owned.into_inner().len(), MIN_HEADER_LEN + 3);
    }

    #[test]
    fn short_packets_read_as_zero() {
        for data in [&b""[..], b"\x80", b"\x80\xe0\x12\x34\x00"] {
            let p = RawPacket::new(data);
            assert!(!p.header_is_valid());
            assert_eq!(p.timestamp(), 0);
            assert_eq!(p.ssrc(), 0);
            assert_eq!(p.header_len(), MIN_HEADER_LEN);
            assert_eq!(p.payload(), b"");
            assert_eq!(p.to_owned_packet().unwrap_err(), "too short");
        }
        let p = RawPacket::new(b"\x80\xe0\x12\x34\x00");
        assert_eq!(p.sequence_number(), 0x1234);
        assert_eq!(p.payload_type(), 0x60);
        assert!(p.mark());
        let _ = format!("{p:?}");
    }

    #[test]
    fn builder_rejects_large_payload_type() {
        RawPacketBuilder {
            payload_type: 0x80,
            ..Default::default()
        }
        .build(std::iter::empty())
        .unwrap_err();
    }
}
