// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`Puller`], the handle which owns a session's worker thread.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::runtime::Runtime;
use tokio::sync::watch;

use crate::client::session;
use crate::client::{ControlChannel, Credentials, RtspChannel, SessionOptions, Transport};
use crate::event::{Callback, Event};
use crate::{Error, ErrorInt};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(16);

struct Worker {
    stop: watch::Sender<bool>,
    join: std::thread::JoinHandle<(Runtime, Callback)>,
}

/// Pulls one RTSP stream at a time on a dedicated worker thread.
///
/// All events are delivered to the callback on the worker thread, one at a
/// time. [`Puller::close_stream`] blocks until the worker has exited, so no
/// event is delivered after it returns. Dropping the `Puller` closes the
/// stream first.
pub struct Puller {
    runtime: Option<Runtime>,
    callback: Option<Callback>,
    worker: Option<Worker>,
}

fn build_runtime() -> Result<Runtime, Error> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| wrap!(ErrorInt::Internal(e.into())))
}

impl Puller {
    /// Creates an idle handle. No network I/O happens until a stream is started.
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            runtime: Some(build_runtime()?),
            callback: None,
            worker: None,
        })
    }

    /// Returns true between a successful start and the matching close, unless
    /// the session already ended on its own.
    pub fn is_running(&self) -> bool {
        matches!(&self.worker, Some(w) if !w.join.is_finished())
    }

    /// Sets the event handler. Not allowed while a stream is running.
    pub fn set_callback(&mut self, callback: Callback) -> Result<(), Error> {
        self.reap_finished();
        if self.worker.is_some() {
            bail!(ErrorInt::FailedPrecondition(
                "can't replace the callback while a stream is running".to_owned()
            ));
        }
        self.callback = Some(callback);
        Ok(())
    }

    /// Starts pulling `url` over RTSP.
    ///
    /// `username` (if any) is used with `password` to answer authentication
    /// challenges and is also sent as a `token` query parameter on
    /// `DESCRIBE`. With `auto_reconnect`, abnormal endings other than the
    /// duration timer are followed by a new attempt after a backoff. With
    /// `raw_packets`, frames are whole RTP packets rather than payloads.
    pub fn start_stream(
        &mut self,
        url: &str,
        transport: Transport,
        username: Option<&str>,
        password: Option<&str>,
        auto_reconnect: bool,
        raw_packets: bool,
    ) -> Result<(), Error> {
        if url.is_empty() {
            bail!(ErrorInt::InvalidArgument("url must be non-empty".to_owned()));
        }
        let creds = username.map(|username| Credentials {
            username: username.to_owned(),
            password: password.unwrap_or_default().to_owned(),
        });
        let options = SessionOptions::default()
            .creds(creds)
            .transport(transport)
            .auto_reconnect(auto_reconnect)
            .raw_packets(raw_packets);
        self.start(RtspChannel::new(url, options.clone()), options)
    }

    /// Starts a session on an arbitrary control channel.
    pub fn start<C>(&mut self, channel: C, options: SessionOptions) -> Result<(), Error>
    where
        C: ControlChannel + Send + 'static,
    {
        self.reap_finished();
        if self.worker.is_some() {
            bail!(ErrorInt::FailedPrecondition(
                "a stream is already running".to_owned()
            ));
        }
        let Some(mut callback) = self.callback.take() else {
            bail!(ErrorInt::FailedPrecondition(
                "the callback must be set before starting".to_owned()
            ));
        };
        let runtime = match self.runtime.take() {
            Some(r) => r,
            None => build_runtime()?,
        };
        let (stop, stop_rx) = watch::channel(false);
        let join = std::thread::Builder::new()
            .name("rtsp-puller".to_owned())
            .spawn(move || {
                runtime.block_on(run_until_stopped(channel, options, &mut *callback, stop_rx));
                (runtime, callback)
            })
            .map_err(|e| wrap!(ErrorInt::Internal(e.into())))?;
        self.worker = Some(Worker { stop, join });
        Ok(())
    }

    /// Stops the running stream, if any, and waits for the worker to exit.
    ///
    /// A caller-initiated close produces no [`Event::SessionResult`]. Safe to
    /// call repeatedly; the handle can be started again afterward with the
    /// same callback.
    pub fn close_stream(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        debug!("requesting worker stop");

        // Fails only if the worker already exited.
        let _ = worker.stop.send(true);
        match worker.join.join() {
            Ok((runtime, callback)) => {
                self.runtime = Some(runtime);
                self.callback = Some(callback);
            }
            Err(_) => warn!("worker thread panicked; callback must be set again"),
        }
    }

    /// Collects a worker whose session ended without a close.
    fn reap_finished(&mut self) {
        if matches!(&self.worker, Some(w) if w.join.is_finished()) {
            self.close_stream();
        }
    }
}

impl Drop for Puller {
    fn drop(&mut self) {
        self.close_stream();
    }
}

/// Runs sessions on `channel` until stopped or, without auto-reconnect,
/// until the first session ends.
async fn run_until_stopped<C: ControlChannel>(
    mut channel: C,
    options: SessionOptions,
    callback: &mut (dyn FnMut(Event<'_>) + Send),
    mut stop: watch::Receiver<bool>,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let outcome = session::run(&mut channel, &options, &mut *callback, &mut stop).await;
        if !options.get_auto_reconnect() || !outcome.termination.should_reconnect() {
            return;
        }
        if outcome.reached_playing {
            backoff = INITIAL_BACKOFF;
        }
        info!("reconnecting in {:?}", backoff);
        tokio::select! {
            biased;
            () = session::stopped(&mut stop) => return,
            () = tokio::time::sleep(backoff) => {},
        }
        backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
    }
}
