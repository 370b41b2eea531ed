// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracks RTSP interleaved channel to stream assignments.

use std::num::NonZeroU8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ChannelType {
    Rtp,
    Rtcp,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ChannelMapping {
    pub(crate) stream_i: usize,
    pub(crate) channel_type: ChannelType,
}

/// Mapping of the 256 interleaved channels to stream indices.
///
/// Even channels carry RTP and their odd successors carry RTCP for the same
/// stream, so one slot per pair is kept. [RFC 2326 section
/// 10.12](https://tools.ietf.org/html/rfc2326#section-10.12) says
/// `interleaved=n` also assigns `n+1`; servers insisting on odd `n` aren't
/// supported. Slots hold `stream_i + 1` so at most 255 streams fit.
#[derive(Default)]
pub(crate) struct ChannelMappings(smallvec::SmallVec<[Option<NonZeroU8>; 16]>);

impl ChannelMappings {
    /// Returns the lowest unassigned even channel id, or `None` if all are taken.
    pub(crate) fn next_unassigned(&self) -> Option<u8> {
        let i = self
            .0
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.0.len());
        if i < 128 {
            Some((i as u8) << 1)
        } else {
            None
        }
    }

    /// Assigns an even channel id to RTP of `stream_i` and its successor to RTCP.
    pub(crate) fn assign(&mut self, channel_id: u8, stream_i: usize) -> Result<(), String> {
        if (channel_id & 1) != 0 {
            return Err(format!("Can't assign odd channel id {}", channel_id));
        }
        let slot_value = u8::try_from(stream_i + 1)
            .ok()
            .and_then(NonZeroU8::new)
            .ok_or_else(|| format!("Can't assign channel to stream id {stream_i} (>= 255)"))?;
        let i = usize::from(channel_id >> 1);
        if i >= self.0.len() {
            self.0.resize(i + 1, None);
        }
        match self.0[i] {
            Some(existing) => Err(format!(
                "Channel id {} is already assigned to stream {}; won't reassign to stream {}",
                channel_id,
                existing.get() - 1,
                stream_i
            )),
            None => {
                self.0[i] = Some(slot_value);
                Ok(())
            }
        }
    }

    /// Looks up a channel id's mapping.
    pub(crate) fn lookup(&self, channel_id: u8) -> Option<ChannelMapping> {
        let slot = (*self.0.get(usize::from(channel_id >> 1))?)?;
        Some(ChannelMapping {
            stream_i: usize::from(slot.get() - 1),
            channel_type: if (channel_id & 1) == 0 {
                ChannelType::Rtp
            } else {
                ChannelType::Rtcp
            },
        })
    }
}

impl std::fmt::Debug for ChannelMappings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.0.iter().enumerate().filter_map(|(i, v)| {
                v.map(|v| (format!("{}-{}", i << 1, (i << 1) + 1), v.get() - 1))
            }))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelMapping, ChannelMappings, ChannelType};

    #[test]
    fn assign_and_lookup() {
        let mut mappings = ChannelMappings::default();
        assert_eq!(mappings.next_unassigned(), Some(0));
        assert_eq!(mappings.lookup(0), None);
        mappings.assign(0, 0).unwrap();
        mappings.assign(0, 1).unwrap_err();
        mappings.assign(1, 1).unwrap_err();
        assert_eq!(
            mappings.lookup(1),
            Some(ChannelMapping {
                stream_i: 0,
                channel_type: ChannelType::Rtcp,
            })
        );
        assert_eq!(mappings.next_unassigned(), Some(2));

        // The server may pick a channel other than the one proposed.
        mappings.assign(8, 1).unwrap();
        assert_eq!(
            mappings.lookup(8),
            Some(ChannelMapping {
                stream_i: 1,
                channel_type: ChannelType::Rtp,
            })
        );
        assert_eq!(mappings.lookup(6), None);
        assert_eq!(mappings.lookup(200), None);
        assert_eq!(mappings.next_unassigned(), Some(2));
        assert_eq!(format!("{mappings:?}"), r#"{"0-1": 0, "8-9": 1}"#);
    }

    #[test]
    fn exhaustion() {
        let mut mappings = ChannelMappings::default();
        for i in 0..128 {
            let c = mappings.next_unassigned().unwrap();
            mappings.assign(c, i).unwrap();
        }
        assert_eq!(mappings.next_unassigned(), None);
        ChannelMappings::default().assign(0, 255).unwrap_err();
    }
}
