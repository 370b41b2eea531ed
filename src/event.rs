// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events delivered to the host through the session's callback.
//!
//! Every event for a session is delivered on that session's worker thread, one
//! at a time, in the order it happened. Borrowed data (frame bytes, result
//! messages) is valid only for the duration of the callback.

/// Result codes reported with [`Event::SessionResult`].
///
/// Codes in `100..600` are RTSP status codes from the server. Negative codes
/// are OS errors (`-errno`) or `-1` when no errno was available. The
/// remaining values below are produced by the client itself.
pub mod code {
    /// Caller-initiated close. Never delivered through the callback.
    pub const OK: i32 = 0;

    /// Every stream ended, by closure or RTCP BYE.
    pub const STREAM_CLOSED: i32 = 600;

    /// The presentation's advertised duration (plus slop) elapsed.
    pub const STREAM_TIMER: i32 = 601;

    /// The description listed no stream which could be set up.
    pub const NO_MEDIA: i32 = 602;

    /// The server sent something that couldn't be understood.
    pub const PROTOCOL_ERROR: i32 = 603;

    /// A control request didn't complete in time.
    pub const TIMEOUT: i32 = 604;

    pub(crate) const STREAM_CLOSED_MSG: &str = "stream closed.";
    pub(crate) const STREAM_TIMER_MSG: &str = "stream duration elapsed.";
    pub(crate) const NO_MEDIA_MSG: &str = "no stream could be set up.";
}

/// Audio parameters from the first `a=rtpmap:` line of the description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaAttribute {
    /// RTP payload type the line maps, eg 14 for `a=rtpmap:14 MPA/44100/2`.
    pub payload_type: u8,

    /// Encoding name as written in the description, eg `MPA`.
    pub encoding_name: String,

    /// Clock rate in Hz.
    pub sample_rate: u32,

    /// Defaults to 1 when the line doesn't say.
    pub channels: u16,
}

/// One received frame.
#[derive(Copy, Clone)]
pub struct Frame<'a> {
    /// Index of the stream within the presentation.
    pub stream_id: usize,

    /// The whole RTP packet in raw-packet mode, otherwise its payload.
    pub data: &'a [u8],
}

impl std::fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("stream_id", &self.stream_id)
            .field("data", &crate::hex::LimitedHex::new(self.data, 64))
            .finish()
    }
}

#[derive(Debug)]
pub enum Event<'a> {
    /// The session ended abnormally. Fires at most once per session run; a
    /// caller-initiated close produces no event.
    SessionResult { code: i32, message: &'a str },

    /// Parsed from the description, before any stream is set up.
    MediaAttribute(MediaAttribute),

    Frame(Frame<'a>),

    /// A stream's data source ended without data.
    ConnectionBroken { stream_id: usize },
}

/// The host's event handler.
pub type Callback = Box<dyn FnMut(Event<'_>) + Send>;
