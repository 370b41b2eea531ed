// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reads RTCP compound packets as described in
//! [RFC 3550 section 6](https://datatracker.ietf.org/doc/html/rfc3550#section-6),
//! only as far as needed to notice a server ending a stream.

/// Payload type of a goodbye packet.
pub const PT_BYE: u8 = 203;

const COMMON_HEADER_LEN: usize = 4;

/// Validates a compound packet, returning its packets.
///
/// Checks at least what [RFC 3550 appendix
/// A.2](https://datatracker.ietf.org/doc/html/rfc3550#appendix-A.2) asks,
/// as updated by [RFC 5506](https://datatracker.ietf.org/doc/html/rfc5506):
///
/// *   there is at least one packet.
/// *   all packets are version 2.
/// *   non-final packets have no padding.
/// *   the packets' lengths add up to the compound packet's length.
pub fn parse_compound(raw: &[u8]) -> Result<Vec<PacketRef<'_>>, String> {
    let mut pkts = Vec::new();
    let mut rest = raw;
    loop {
        let (pkt, r) = PacketRef::parse(rest)?;
        rest = r;
        if !rest.is_empty() && pkt.has_padding() {
            return Err("padding on non-final packet within RTCP compound packet".to_owned());
        }
        pkts.push(pkt);
        if rest.is_empty() {
            return Ok(pkts);
        }
    }
}

/// Returns the first goodbye packet within `raw`, if it is a valid compound
/// packet containing one.
///
/// Invalid data is logged and treated as containing no goodbye.
pub fn find_bye(raw: &[u8]) -> Option<ByeRef<'_>> {
    let pkts = match parse_compound(raw) {
        Ok(p) => p,
        Err(e) => {
            log::debug!(
                "ignoring bad RTCP: {}\n{:?}",
                e,
                crate::hex::LimitedHex::new(raw, 64)
            );
            return None;
        }
    };
    pkts.into_iter().find_map(|p| p.as_bye())
}

/// A goodbye packet, as defined in
/// [RFC 3550 section 6.6](https://datatracker.ietf.org/doc/html/rfc3550#section-6.6).
///
/// ```text
///        0                   1                   2                   3
///        0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///       +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///       |V=2|P|    SC   |   PT=BYE=203  |             length            |
///       +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///       |                           SSRC/CSRC                           |
///       +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///       :                              ...                              :
///       +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// (opt) |     length    |               reason for leaving            ...
///       +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Copy, Clone, Debug)]
pub struct ByeRef<'a>(PacketRef<'a>);

impl<'a> ByeRef<'a> {
    fn validate(pkt: PacketRef<'a>) -> Result<Self, String> {
        let expected_len = COMMON_HEADER_LEN + 4 * usize::from(pkt.count());
        if pkt.payload_end < expected_len {
            return Err(format!(
                "RTCP BYE has invalid count={} with unpadded_byte_len={}",
                pkt.count(),
                pkt.payload_end
            ));
        }
        Ok(Self(pkt))
    }

    /// Returns the sources which are leaving.
    pub fn ssrcs(&self) -> impl Iterator<Item = u32> + 'a {
        let end = COMMON_HEADER_LEN + 4 * usize::from(self.0.count());
        self.0.buf[COMMON_HEADER_LEN..end]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
    }

    /// Returns the optional reason for leaving, if present and well-formed.
    pub fn reason(&self) -> Option<&'a [u8]> {
        let start = COMMON_HEADER_LEN + 4 * usize::from(self.0.count());
        let len = usize::from(*self.0.buf[..self.0.payload_end].get(start)?);
        self.0.buf[..self.0.payload_end].get(start + 1..start + 1 + len)
    }
}

/// A generic packet, not parsed as any particular payload type.
///
/// This only interprets the leading four bytes:
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|         |   PT          |             length            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Copy, Clone)]
pub struct PacketRef<'a> {
    buf: &'a [u8],
    payload_end: usize,
}

impl<'a> PacketRef<'a> {
    /// Splits off one packet, checking only the version, padding, and length.
    pub fn parse(buf: &'a [u8]) -> Result<(Self, &'a [u8]), String> {
        if buf.len() < COMMON_HEADER_LEN {
            return Err(format!(
                "RTCP packets must be at least {} bytes; have only {}",
                COMMON_HEADER_LEN,
                buf.len()
            ));
        }
        let ver = buf[0] >> 6;
        if ver != 2 {
            return Err(format!("RTCP packets must be version 2; got {ver}"));
        }

        // "The length of this RTCP packet in 32-bit words minus one,
        // including the header and any padding."
        let raw_len = u16::from_be_bytes([buf[2], buf[3]]);
        let len = (usize::from(raw_len) + 1) * 4;
        if buf.len() < len {
            return Err(format!(
                "RTCP packet header has length {} bytes; have only {}",
                len,
                buf.len()
            ));
        }
        let (this, rest) = buf.split_at(len);
        let mut payload_end = len;
        if (this[0] & 0b0010_0000) != 0 {
            let padding_bytes = usize::from(this[len - 1]);
            if raw_len == 0 || padding_bytes == 0 || padding_bytes > len - COMMON_HEADER_LEN {
                return Err(format!(
                    "RTCP packet of len {len} states invalid {padding_bytes} padding bytes"
                ));
            }
            payload_end -= padding_bytes;
        }
        Ok((
            PacketRef {
                buf: this,
                payload_end,
            },
            rest,
        ))
    }

    /// Returns the uninterpreted payload type of this RTCP packet.
    #[inline]
    pub fn payload_type(&self) -> u8 {
        self.buf[1]
    }

    /// Returns true iff this packet has padding.
    #[inline]
    pub fn has_padding(&self) -> bool {
        (self.buf[0] & 0b0010_0000) != 0
    }

    /// Returns the low 5 bits of the first octet, which is typically a count
    /// or subtype.
    #[inline]
    pub fn count(&self) -> u8 {
        self.buf[0] & 0b0001_1111
    }

    /// Returns this packet as a goodbye, if it is a well-formed one.
    pub fn as_bye(self) -> Option<ByeRef<'a>> {
        if self.payload_type() != PT_BYE {
            return None;
        }
        match ByeRef::validate(self) {
            Ok(b) => Some(b),
            Err(e) => {
                log::debug!("{}", e);
                None
            }
        }
    }

    /// Returns the full raw data, including headers.
    #[inline]
    pub fn raw(&self) -> &'a [u8] {
        self.buf
    }
}

impl std::fmt::Debug for PacketRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketRef")
            .field("payload_type", &self.payload_type())
            .field("raw", &crate::hex::LimitedHex::new(self.buf, 64))
            .finish()
    }
}
