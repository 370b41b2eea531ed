// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The session state machine: describe, set up each stream, play, pump
//! frames until something ends the session, then tear down.

use std::borrow::Cow;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::watch;

use super::sink::{Disposition, TrackSink};
use super::{ControlChannel, SessionOptions};
use crate::event::{code, Event};
use crate::Error;

/// Added to the advertised duration before the session is ended by timer.
pub(crate) const DURATION_SLOP: Duration = Duration::from_secs(2);

/// Why a session run ended.
#[derive(Debug)]
pub(crate) enum Termination {
    /// Stop was requested.
    Closed,

    /// `describe` or `play` failed.
    Failed(Error),

    /// No stream could be set up.
    NoMedia,

    /// Every stream ended by closure or BYE.
    AllClosed,

    /// The duration timer fired.
    Timer,
}

impl Termination {
    pub(crate) fn code(&self) -> i32 {
        match self {
            Termination::Closed => code::OK,
            Termination::Failed(e) => e.result_code(),
            Termination::NoMedia => code::NO_MEDIA,
            Termination::AllClosed => code::STREAM_CLOSED,
            Termination::Timer => code::STREAM_TIMER,
        }
    }

    fn message(&self) -> Cow<'static, str> {
        match self {
            Termination::Closed => Cow::Borrowed(""),
            Termination::Failed(e) => Cow::Owned(e.to_string()),
            Termination::NoMedia => Cow::Borrowed(code::NO_MEDIA_MSG),
            Termination::AllClosed => Cow::Borrowed(code::STREAM_CLOSED_MSG),
            Termination::Timer => Cow::Borrowed(code::STREAM_TIMER_MSG),
        }
    }

    /// Returns true if an auto-reconnecting session should run again.
    pub(crate) fn should_reconnect(&self) -> bool {
        matches!(
            self,
            Termination::Failed(_) | Termination::NoMedia | Termination::AllClosed
        )
    }
}

pub(crate) struct Outcome {
    pub(crate) termination: Termination,

    /// True if `play` succeeded.
    pub(crate) reached_playing: bool,
}

/// Waits until stop is requested (or the requester went away).
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Runs one session from `describe` to `teardown`.
///
/// Frames and other events are delivered to `callback` as they occur. Once
/// the session ends, nothing more is delivered except a single
/// [`Event::SessionResult`] if the ending was abnormal.
pub(crate) async fn run<C: ControlChannel>(
    channel: &mut C,
    options: &SessionOptions,
    callback: &mut (dyn FnMut(Event<'_>) + Send),
    stop: &mut watch::Receiver<bool>,
) -> Outcome {
    let mut reached_playing = false;
    let termination = tokio::select! {
        biased;
        () = stopped(stop) => Termination::Closed,
        t = drive(channel, options, &mut *callback, &mut reached_playing) => t,
    };

    // Sinks and the timer were dropped with `drive`.
    debug!("session ending: {:?}", &termination);
    channel.teardown().await;
    let result_code = termination.code();
    if result_code != code::OK {
        let message = termination.message();
        info!("session result {}: {}", result_code, &message);
        callback(Event::SessionResult {
            code: result_code,
            message: &message,
        });
    }
    Outcome {
        termination,
        reached_playing,
    }
}

async fn drive<C: ControlChannel>(
    channel: &mut C,
    options: &SessionOptions,
    callback: &mut (dyn FnMut(Event<'_>) + Send),
    reached_playing: &mut bool,
) -> Termination {
    let presentation = match channel.describe().await {
        Ok(p) => p,
        Err(e) => return Termination::Failed(e),
    };
    if let Some(attr) = presentation.media_attribute() {
        callback(Event::MediaAttribute(attr.clone()));
    }

    // Streams are set up strictly in order; a failure only skips its stream.
    let mut pending = FuturesUnordered::new();
    for stream_i in 0..presentation.streams.len() {
        match channel.setup(stream_i).await {
            Ok(source) => {
                debug!("stream {} set up", stream_i);
                let sink = TrackSink::new(
                    stream_i,
                    source,
                    options.get_receive_buffer_size(),
                    options.get_raw_packets(),
                );
                pending.push(sink.continue_playing());
            }
            Err(e) => warn!("Skipping stream {}: {}", stream_i, e),
        }
    }
    if pending.is_empty() {
        return Termination::NoMedia;
    }

    if let Err(e) = channel.play(&presentation).await {
        return Termination::Failed(e);
    }
    *reached_playing = true;
    let deadline = presentation.duration().map(|d| d + DURATION_SLOP);
    debug!(
        "playing {} of {} streams; end timer {:?}",
        pending.len(),
        presentation.streams.len(),
        deadline
    );
    let timer = tokio::time::sleep(deadline.unwrap_or_default());
    tokio::pin!(timer);

    loop {
        tokio::select! {
            biased;
            () = &mut timer, if deadline.is_some() => return Termination::Timer,
            next = pending.next() => match next {
                None => return Termination::AllClosed,
                Some((mut sink, ev)) => match sink.after_getting_frame(ev, &mut *callback) {
                    Disposition::Rearm => pending.push(sink.continue_playing()),
                    Disposition::Closed => {
                        debug!("stream {} closed; {} remain", sink.stream_id(), pending.len())
                    }
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use rtsp_types::{Method, StatusCode};

    use super::*;
    use crate::client::PlayRange;
    use crate::event::MediaAttribute;
    use crate::rtp::RawPacketBuilder;
    use crate::testutil::{
        init_logging, presentation, response_error, Recorded, ScriptedChannel, ScriptedSource,
        Step,
    };
    use crate::ErrorInt;

    fn packet(payload: Vec<u8>) -> Vec<u8> {
        RawPacketBuilder {
            sequence_number: 7,
            timestamp: 0,
            payload_type: 96,
            ssrc: 1,
            mark: false,
        }
        .build(payload)
        .unwrap()
        .into_inner()
        .into_vec()
    }

    async fn run_scripted(
        mut channel: ScriptedChannel,
        options: SessionOptions,
        recorded: &mut Recorded,
    ) -> Outcome {
        let (_tx, mut rx) = watch::channel(false);
        let mut callback = recorded.callback();
        run(&mut channel, &options, &mut callback, &mut rx).await
    }

    #[tokio::test]
    async fn partial_setup_then_bye() {
        init_logging();
        let video = ScriptedSource::new(vec![Step::Frame(packet(vec![b'v'; 1200])), Step::Bye]);
        let max_in_flight = video.max_in_flight();
        let attr = MediaAttribute {
            payload_type: 14,
            encoding_name: "MPA".to_owned(),
            sample_rate: 44_100,
            channels: 2,
        };
        let channel = ScriptedChannel::default()
            .describe(Ok(presentation(2, None, Some(attr))))
            .setup(Ok(video))
            .setup(Err(response_error(
                Method::Setup,
                StatusCode::UnsupportedTransport,
            )));
        let calls = channel.calls();
        let mut recorded = Recorded::default();
        let outcome = run_scripted(channel, SessionOptions::default(), &mut recorded).await;
        assert!(outcome.reached_playing);
        assert_eq!(outcome.termination.code(), 600);
        let frames = recorded.take_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 1200);
        let events = recorded.take();
        assert_eq!(events[0], "media 14 MPA/44100/2");
        assert_eq!(events.last().unwrap(), "result 600: stream closed.");
        assert_eq!(events.len(), 3);
        assert_eq!(
            *calls.lock().unwrap(),
            ["describe", "setup 0", "setup 1", "play", "teardown"]
        );
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn describe_failure() {
        let e = wrap!(ErrorInt::InvalidArgument("bad URL \"\"".to_owned()));
        let message = e.to_string();
        let channel = ScriptedChannel::default().describe(Err(e));
        let calls = channel.calls();
        let mut recorded = Recorded::default();
        let outcome = run_scripted(channel, SessionOptions::default(), &mut recorded).await;
        assert!(!outcome.reached_playing);
        assert_eq!(recorded.take(), [format!("result -22: {message}")]);
        assert_eq!(*calls.lock().unwrap(), ["describe", "teardown"]);
    }

    #[tokio::test]
    async fn play_failure() {
        let channel = ScriptedChannel::default()
            .describe(Ok(presentation(1, None, None)))
            .setup(Ok(ScriptedSource::new(vec![Step::Frame(packet(b"x".to_vec()))])))
            .play(Err(response_error(Method::Play, StatusCode::NotFound)));
        let mut recorded = Recorded::default();
        let outcome = run_scripted(channel, SessionOptions::default(), &mut recorded).await;
        assert!(!outcome.reached_playing);
        let events = recorded.take();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("result 404: "), "{events:?}");
        assert!(outcome.termination.should_reconnect());
    }

    #[tokio::test]
    async fn no_media() {
        let channel = ScriptedChannel::default().describe(Ok(presentation(2, None, None)));
        let calls = channel.calls();
        let mut recorded = Recorded::default();
        let outcome = run_scripted(channel, SessionOptions::default(), &mut recorded).await;
        assert_eq!(recorded.take(), ["result 602: no stream could be set up."]);
        assert!(!outcome.reached_playing);
        assert_eq!(
            *calls.lock().unwrap(),
            ["describe", "setup 0", "setup 1", "teardown"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duration_timer() {
        let range = PlayRange::Npt {
            start: 0.0,
            end: Some(10.0),
        };
        let channel = ScriptedChannel::default()
            .describe(Ok(presentation(1, Some(range), None)))
            .setup(Ok(ScriptedSource::new(vec![
                Step::Frame(packet(b"a".to_vec())),
                Step::Wait(Duration::from_secs(60)),
                Step::Frame(packet(b"late".to_vec())),
            ])));
        let mut recorded = Recorded::default();
        let start = tokio::time::Instant::now();
        let outcome = run_scripted(channel, SessionOptions::default(), &mut recorded).await;
        assert!(start.elapsed() >= Duration::from_secs(12));
        assert!(start.elapsed() < Duration::from_secs(60));
        assert!(!outcome.termination.should_reconnect());
        assert_eq!(
            recorded.take(),
            ["frame 0: a", "result 601: stream duration elapsed."]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_silent() {
        let channel = ScriptedChannel::default()
            .describe(Ok(presentation(1, None, None)))
            .setup(Ok(ScriptedSource::new(vec![Step::Frame(packet(b"a".to_vec()))])));
        let calls = channel.calls();
        let mut channel = channel;
        let (tx, mut rx) = watch::channel(false);
        let mut recorded = Recorded::default();
        let options = SessionOptions::default();
        let outcome = {
            let mut callback = recorded.callback();
            let session = run(&mut channel, &options, &mut callback, &mut rx);
            tokio::pin!(session);
            tokio::select! {
                _ = &mut session => panic!("session ended on its own"),
                _ = tokio::time::sleep(Duration::from_secs(1)) => {},
            }
            tx.send(true).unwrap();
            session.await
        };
        assert!(matches!(outcome.termination, Termination::Closed));
        assert!(outcome.reached_playing);
        assert_eq!(recorded.take(), ["frame 0: a"]);
        assert_eq!(calls.lock().unwrap().last().unwrap(), "teardown");
    }

    #[tokio::test]
    async fn connection_broken_on_each_stream() {
        let channel = ScriptedChannel::default()
            .describe(Ok(presentation(2, None, None)))
            .setup(Ok(ScriptedSource::new(vec![Step::Closed])))
            .setup(Ok(ScriptedSource::new(vec![
                Step::Frame(packet(b"b".to_vec())),
                Step::Frame(Vec::new()),
            ])));
        let mut recorded = Recorded::default();
        let outcome = run_scripted(channel, SessionOptions::default(), &mut recorded).await;
        assert!(outcome.termination.should_reconnect());
        let mut events = recorded.take();
        assert_eq!(events.pop().unwrap(), "result 600: stream closed.");
        events.sort();
        assert_eq!(events, ["broken 0", "broken 1", "frame 1: b"]);
    }
}
