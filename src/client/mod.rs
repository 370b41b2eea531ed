// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTSP client: the control channel, per-stream frame sources, and the
//! session state machine which drives them.

use std::future::Future;
use std::num::NonZeroU16;
use std::time::Duration;

use url::Url;

use crate::event::MediaAttribute;

mod channel_mapping;
mod parse;
mod rtsp;
pub(crate) mod session;
pub(crate) mod sink;
mod source;
mod teardown;

pub use rtsp::RtspChannel;
pub use source::{InterleavedSource, RtspSource, UdpSource};

/// Default time allowed for each control request, including connecting.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default size of each stream's receive buffer; one frame must fit.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 100_000;

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Lower transport for RTP and RTCP.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Transport {
    /// Interleaved within the RTSP connection, as in
    /// [RFC 2326 section 10.12](https://datatracker.ietf.org/doc/html/rfc2326#section-10.12).
    #[default]
    Tcp,

    /// Unicast UDP to an even/odd local port pair.
    Udp,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        })
    }
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "tcp" => Transport::Tcp,
            "udp" => Transport::Udp,
            _ => return Err(format!("bad transport {s:?}; expected tcp or udp")),
        })
    }
}

/// Options which apply to a whole session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    creds: Option<Credentials>,
    transport: Transport,
    user_agent: Option<Box<str>>,
    auto_reconnect: bool,
    raw_packets: bool,
    request_timeout: Duration,
    receive_buffer_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            creds: None,
            transport: Transport::default(),
            user_agent: None,
            auto_reconnect: false,
            raw_packets: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
        }
    }
}

impl SessionOptions {
    /// Uses the given credentials when/if the server requests digest or basic
    /// authentication. The username is also sent as a `token` query
    /// parameter on `DESCRIBE`.
    pub fn creds(mut self, creds: Option<Credentials>) -> Self {
        self.creds = creds;
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Sends the given user agent string with each request.
    pub fn user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = if user_agent.is_empty() {
            None
        } else {
            Some(user_agent.into_boxed_str())
        };
        self
    }

    /// Runs the session again after an abnormal end, with backoff, until closed.
    pub fn auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    /// Delivers whole RTP packets rather than validated payloads.
    pub fn raw_packets(mut self, raw_packets: bool) -> Self {
        self.raw_packets = raw_packets;
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Sets the per-stream receive buffer size. Larger frames are truncated.
    pub fn receive_buffer_size(mut self, receive_buffer_size: usize) -> Self {
        self.receive_buffer_size = receive_buffer_size;
        self
    }

    pub(crate) fn get_creds(&self) -> Option<&Credentials> {
        self.creds.as_ref()
    }

    pub(crate) fn get_transport(&self) -> Transport {
        self.transport
    }

    pub(crate) fn get_user_agent(&self) -> &str {
        self.user_agent
            .as_deref()
            .unwrap_or(concat!("rtsp-puller ", env!("CARGO_PKG_VERSION")))
    }

    pub(crate) fn get_auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub(crate) fn get_raw_packets(&self) -> bool {
        self.raw_packets
    }

    pub(crate) fn get_request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub(crate) fn get_receive_buffer_size(&self) -> usize {
        self.receive_buffer_size
    }
}

/// The playback range advertised by an `a=range:` attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum PlayRange {
    /// Normal play time in seconds, as in `npt=0-10.5`. `end` is `None` for
    /// open-ended (live) ranges.
    Npt { start: f64, end: Option<f64> },

    /// Absolute time, as in `clock=19961108T143720.25Z-`. Passed through as-is.
    Clock(Box<str>),
}

impl PlayRange {
    /// Returns the `Range` header value to send with `PLAY`.
    pub fn header_value(&self) -> String {
        match self {
            PlayRange::Npt { start, .. } => format!("npt={start:.3}-"),
            PlayRange::Clock(c) => format!("clock={c}"),
        }
    }

    /// Returns the expected play duration, if known.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            PlayRange::Npt {
                start,
                end: Some(end),
            } if end > start => Duration::try_from_secs_f64(end - start).ok(),
            _ => None,
        }
    }
}

/// A parsed `DESCRIBE` response.
#[derive(Debug)]
pub struct Presentation {
    pub streams: Vec<Stream>,

    /// The base URL against which stream control URLs were resolved.
    pub base_url: Url,

    /// The aggregate control URL, used for `PLAY` and `TEARDOWN`.
    pub control: Url,

    pub range: Option<PlayRange>,

    /// The `a=tool:` attribute, if any.
    pub tool: Option<Box<str>>,

    pub(crate) media_attribute: Option<MediaAttribute>,
}

impl Presentation {
    /// Returns the attributes from the first `a=rtpmap:` line.
    pub fn media_attribute(&self) -> Option<&MediaAttribute> {
        self.media_attribute.as_ref()
    }

    /// Returns the expected duration, if the description gave a bounded range.
    pub fn duration(&self) -> Option<Duration> {
        self.range.as_ref().and_then(PlayRange::duration)
    }

    /// Returns the `Range` header value to send with `PLAY`.
    pub fn play_range(&self) -> String {
        match &self.range {
            Some(r @ PlayRange::Clock(_)) => r.header_value(),
            _ => "npt=0.000-".to_owned(),
        }
    }
}

/// Information about a stream offered within a presentation.
/// If multiple formats are offered, this only describes the first.
#[derive(Clone, Debug)]
pub struct Stream {
    /// Media type, eg `video` or `audio`.
    pub media: String,

    /// Encoding name in lowercase, eg `h264`.
    pub encoding_name: String,

    /// RTP payload type.
    pub rtp_payload_type: u8,

    /// RTP clock rate, in Hz.
    pub clock_rate: u32,

    /// Number of audio channels, if applicable and known.
    pub channels: Option<NonZeroU16>,

    /// The control URL, if the description specified one. Without one the
    /// presentation's control URL is used.
    pub control: Option<Url>,

    /// The media-level `a=range:` attribute, if any.
    pub range: Option<PlayRange>,
}

/// What a [`FrameSource`] produced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SourceEvent {
    /// `len` bytes were written to the start of the buffer. `truncated` is set
    /// if the frame didn't fit.
    Frame { len: usize, truncated: bool },

    /// The source has no more data.
    Closed,

    /// The server announced the end of the stream via RTCP BYE.
    Bye,
}

/// A stream's data path.
pub trait FrameSource {
    /// Waits for the next frame and copies it into `buf`.
    ///
    /// The session never calls this again on the same source until the
    /// returned future has completed.
    fn get_next_frame<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = SourceEvent> + 'a;
}

/// The control-protocol side of a session.
///
/// Calls are made strictly in order: `describe`, then `setup` once per stream
/// index in increasing order, then `play` if any stream was set up, and always
/// `teardown` last. After `teardown` the channel may be reused from `describe`.
pub trait ControlChannel {
    type Source: FrameSource;

    /// Connects and fetches the presentation description.
    fn describe(&mut self) -> impl Future<Output = Result<Presentation, crate::Error>>;

    /// Sets up stream `stream_i` of the described presentation.
    fn setup(
        &mut self,
        stream_i: usize,
    ) -> impl Future<Output = Result<Self::Source, crate::Error>>;

    /// Starts playback of all set-up streams.
    fn play(
        &mut self,
        presentation: &Presentation,
    ) -> impl Future<Output = Result<(), crate::Error>>;

    /// Ends the session, best-effort, and releases the connection.
    fn teardown(&mut self) -> impl Future<Output = ()>;
}
