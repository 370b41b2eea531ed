// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-stream frame pump between a [`FrameSource`] and the callback.

use log::{debug, trace, warn};

use super::{FrameSource, SourceEvent};
use crate::event::{Event, Frame};
use crate::rtp::RawPacket;

/// What the session should do with a sink after a frame was handled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Request the next frame.
    Rearm,

    /// The stream is finished; drop the sink.
    Closed,
}

/// Receives frames of one stream into its own buffer and hands them on.
pub(crate) struct TrackSink<S> {
    stream_id: usize,
    source: S,
    buf: Box<[u8]>,
    raw_packets: bool,
}

impl<S: FrameSource> TrackSink<S> {
    pub(crate) fn new(stream_id: usize, source: S, buf_size: usize, raw_packets: bool) -> Self {
        Self {
            stream_id,
            source,
            buf: vec![0; buf_size].into_boxed_slice(),
            raw_packets,
        }
    }

    pub(crate) fn stream_id(&self) -> usize {
        self.stream_id
    }

    /// Waits for the next frame.
    ///
    /// The sink is moved into the returned future and handed back with the
    /// result, so at most one request per sink can be outstanding.
    pub(crate) async fn continue_playing(mut self) -> (Self, SourceEvent) {
        let ev = self.source.get_next_frame(&mut self.buf).await;
        (self, ev)
    }

    /// Delivers the result of [`Self::continue_playing`] to `callback`.
    pub(crate) fn after_getting_frame(
        &mut self,
        ev: SourceEvent,
        callback: &mut (dyn FnMut(Event<'_>) + Send),
    ) -> Disposition {
        let (len, truncated) = match ev {
            SourceEvent::Frame { len, truncated } if len > 0 => (len, truncated),
            SourceEvent::Frame { .. } | SourceEvent::Closed => {
                debug!("stream {}: source closed", self.stream_id);
                callback(Event::ConnectionBroken {
                    stream_id: self.stream_id,
                });
                return Disposition::Closed;
            }
            SourceEvent::Bye => {
                debug!("stream {}: BYE", self.stream_id);
                return Disposition::Closed;
            }
        };
        if truncated {
            warn!(
                "stream {}: frame truncated to {}-byte buffer",
                self.stream_id,
                self.buf.len()
            );
        }
        let pkt = &self.buf[..len];
        let data = if self.raw_packets {
            pkt
        } else {
            let pkt = RawPacket::new(pkt);
            match pkt.validate() {
                Ok(payload) if !payload.is_empty() => &self.buf[payload],
                Ok(_) => {
                    trace!("stream {}: skipping empty payload", self.stream_id);
                    return Disposition::Rearm;
                }
                Err(e) => {
                    debug!("stream {}: discarding invalid packet: {}", self.stream_id, e);
                    return Disposition::Rearm;
                }
            }
        };
        trace!("stream {}: {}-byte frame", self.stream_id, data.len());
        callback(Event::Frame(Frame {
            stream_id: self.stream_id,
            data,
        }));
        Disposition::Rearm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::RawPacketBuilder;
    use crate::testutil::{Recorded, ScriptedSource, Step};

    fn packet(payload: &[u8]) -> Vec<u8> {
        RawPacketBuilder {
            sequence_number: 1,
            timestamp: 90_000,
            payload_type: 96,
            ssrc: 0x4242,
            mark: true,
        }
        .build(payload.iter().copied())
        .unwrap()
        .into_inner()
        .into_vec()
    }

    async fn pump(
        sink: TrackSink<ScriptedSource>,
        recorded: &mut Recorded,
    ) -> (TrackSink<ScriptedSource>, Disposition) {
        let (mut sink, ev) = sink.continue_playing().await;
        let mut callback = recorded.callback();
        let d = sink.after_getting_frame(ev, &mut callback);
        (sink, d)
    }

    #[tokio::test]
    async fn payload_mode() {
        let source = ScriptedSource::new(vec![
            Step::Frame(packet(b"hello")),
            Step::Frame(b"\x40junk".to_vec()),
            Step::Frame(packet(b"")),
            Step::Frame(packet(b"world")),
            Step::Bye,
        ]);
        let mut recorded = Recorded::default();
        let mut sink = TrackSink::new(3, source, 1500, false);
        let mut dispositions = Vec::new();
        for _ in 0..5 {
            let (s, d) = pump(sink, &mut recorded).await;
            sink = s;
            dispositions.push(d);
        }
        assert_eq!(
            dispositions,
            [
                Disposition::Rearm,
                Disposition::Rearm,
                Disposition::Rearm,
                Disposition::Rearm,
                Disposition::Closed
            ]
        );
        assert_eq!(recorded.take(), ["frame 3: hello", "frame 3: world"]);
    }

    #[tokio::test]
    async fn raw_mode_and_truncation() {
        let full = packet(b"0123456789");
        let source = ScriptedSource::new(vec![
            Step::Frame(full.clone()),
            Step::Frame(b"\x40junk".to_vec()),
        ]);
        let mut recorded = Recorded::default();
        let sink = TrackSink::new(0, source, 16, true);
        let (sink, _) = pump(sink, &mut recorded).await;
        let (_, d) = pump(sink, &mut recorded).await;
        assert_eq!(d, Disposition::Rearm);
        let frames = recorded.take_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], &full[..16]);
        assert_eq!(frames[1], b"\x40junk");
    }

    #[tokio::test]
    async fn closed_source_reports_broken_connection() {
        let source = ScriptedSource::new(vec![Step::Frame(Vec::new())]);
        let mut recorded = Recorded::default();
        let (sink, d) = pump(TrackSink::new(1, source, 1500, false), &mut recorded).await;
        assert_eq!(d, Disposition::Closed);
        assert_eq!(sink.stream_id(), 1);
        assert_eq!(recorded.take(), ["broken 1"]);

        let source = ScriptedSource::new(vec![Step::Closed]);
        let (_, d) = pump(TrackSink::new(2, source, 1500, false), &mut recorded).await;
        assert_eq!(d, Disposition::Closed);
        assert_eq!(recorded.take(), ["broken 2"]);
    }
}
