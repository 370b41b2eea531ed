// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use url::Url;

use crate::client::{ControlChannel, FrameSource, PlayRange, Presentation, SourceEvent, Stream};
use crate::event::{Callback, Event, MediaAttribute};
use crate::{ConnectionContext, Error, ErrorInt, RtspMessageContext};

/// Installs `env_logger`, honouring `RUST_LOG`.
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn response(raw: &'static [u8]) -> rtsp_types::Response<Bytes> {
    let (msg, len) = rtsp_types::Message::parse(raw).unwrap();
    assert_eq!(len, raw.len());
    match msg {
        rtsp_types::Message::Response(r) => r.map_body(|b| Bytes::from_static(b)),
        _ => panic!("unexpected message type"),
    }
}

/// An error as `RtspChannel` would return for a non-success response.
pub(crate) fn response_error(
    method: rtsp_types::Method,
    status: rtsp_types::StatusCode,
) -> Error {
    wrap!(ErrorInt::RtspResponseError {
        conn_ctx: ConnectionContext::dummy(),
        msg_ctx: RtspMessageContext::dummy(),
        method,
        cseq: 1,
        status,
        description: "Unsuccessful response".to_owned(),
    })
}

/// Returns a presentation with `n` video streams.
pub(crate) fn presentation(
    n: usize,
    range: Option<PlayRange>,
    media_attribute: Option<MediaAttribute>,
) -> Presentation {
    let base_url = Url::parse("rtsp://127.0.0.1/test").unwrap();
    Presentation {
        streams: (0..n)
            .map(|i| Stream {
                media: "video".to_owned(),
                encoding_name: "h264".to_owned(),
                rtp_payload_type: 96,
                clock_rate: 90_000,
                channels: None,
                control: Some(base_url.join(&format!("test/trackID={i}")).unwrap()),
                range: None,
            })
            .collect(),
        control: base_url.clone(),
        base_url,
        range,
        tool: None,
        media_attribute,
    }
}

/// One step of a [`ScriptedSource`].
#[derive(Clone, Debug)]
pub(crate) enum Step {
    /// Delivered as a frame, truncated to the buffer.
    Frame(Vec<u8>),

    /// Sleeps before the next step.
    Wait(Duration),

    Closed,
    Bye,
}

/// Decrements the in-flight count when a request completes or is dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A [`FrameSource`] which plays back a fixed list of steps, then pends forever.
pub(crate) struct ScriptedSource {
    steps: VecDeque<Step>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns a counter of the most `get_next_frame` calls ever outstanding at once.
    pub(crate) fn max_in_flight(&self) -> Arc<AtomicUsize> {
        self.max_in_flight.clone()
    }
}

impl FrameSource for ScriptedSource {
    fn get_next_frame<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = SourceEvent> + 'a {
        async move {
            let n = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(n, Ordering::SeqCst);
            let _guard = InFlight(self.in_flight.clone());
            loop {
                match self.steps.pop_front() {
                    Some(Step::Frame(f)) => {
                        let len = std::cmp::min(f.len(), buf.len());
                        buf[..len].copy_from_slice(&f[..len]);
                        return SourceEvent::Frame {
                            len,
                            truncated: len < f.len(),
                        };
                    }
                    Some(Step::Wait(d)) => tokio::time::sleep(d).await,
                    Some(Step::Closed) => return SourceEvent::Closed,
                    Some(Step::Bye) => return SourceEvent::Bye,
                    None => std::future::pending::<()>().await,
                }
            }
        }
    }
}

/// A [`ControlChannel`] with canned results, recording each call.
///
/// Once its `describe` results are used up, further calls fail as if the
/// connection was refused.
#[derive(Default)]
pub(crate) struct ScriptedChannel {
    describes: VecDeque<Result<Presentation, Error>>,
    setups: VecDeque<Result<ScriptedSource, Error>>,
    plays: VecDeque<Result<(), Error>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedChannel {
    pub(crate) fn describe(mut self, r: Result<Presentation, Error>) -> Self {
        self.describes.push_back(r);
        self
    }

    pub(crate) fn setup(mut self, r: Result<ScriptedSource, Error>) -> Self {
        self.setups.push_back(r);
        self
    }

    pub(crate) fn play(mut self, r: Result<(), Error>) -> Self {
        self.plays.push_back(r);
        self
    }

    pub(crate) fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ControlChannel for ScriptedChannel {
    type Source = ScriptedSource;

    fn describe(&mut self) -> impl Future<Output = Result<Presentation, Error>> {
        self.record("describe".to_owned());
        let r = self.describes.pop_front().unwrap_or_else(|| {
            Err(wrap!(ErrorInt::ConnectError(
                std::io::Error::from_raw_os_error(111)
            )))
        });
        std::future::ready(r)
    }

    fn setup(&mut self, stream_i: usize) -> impl Future<Output = Result<ScriptedSource, Error>> {
        self.record(format!("setup {stream_i}"));
        let r = self.setups.pop_front().unwrap_or_else(|| {
            Err(wrap!(ErrorInt::FailedPrecondition(
                "no scripted setup".to_owned()
            )))
        });
        std::future::ready(r)
    }

    fn play(&mut self, _presentation: &Presentation) -> impl Future<Output = Result<(), Error>> {
        self.record("play".to_owned());
        std::future::ready(self.plays.pop_front().unwrap_or(Ok(())))
    }

    fn teardown(&mut self) -> impl Future<Output = ()> {
        self.record("teardown".to_owned());
        std::future::ready(())
    }
}

/// Formats an event for comparison in tests.
pub(crate) fn describe_event(event: &Event<'_>) -> String {
    match event {
        Event::SessionResult { code, message } => format!("result {code}: {message}"),
        Event::MediaAttribute(a) => format!(
            "media {} {}/{}/{}",
            a.payload_type, a.encoding_name, a.sample_rate, a.channels
        ),
        Event::Frame(f) => format!("frame {}: {}", f.stream_id, String::from_utf8_lossy(f.data)),
        Event::ConnectionBroken { stream_id } => format!("broken {stream_id}"),
    }
}

/// Collects events delivered to a callback.
#[derive(Default)]
pub(crate) struct Recorded {
    events: Vec<String>,
    frames: Vec<Vec<u8>>,
}

impl Recorded {
    fn push(&mut self, event: Event<'_>) {
        if let Event::Frame(f) = &event {
            self.frames.push(f.data.to_vec());
        }
        self.events.push(describe_event(&event));
    }

    pub(crate) fn callback(&mut self) -> impl FnMut(Event<'_>) + Send + '_ {
        move |event| self.push(event)
    }

    pub(crate) fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn take_frames(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.frames)
    }
}

/// Returns a `'static` callback recording into a shared [`Recorded`].
pub(crate) fn shared_recorder() -> (Arc<Mutex<Recorded>>, Callback) {
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let r = recorded.clone();
    (
        recorded,
        Box::new(move |event: Event<'_>| r.lock().unwrap().push(event)),
    )
}
