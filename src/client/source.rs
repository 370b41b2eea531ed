// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-stream [`FrameSource`]s for the RTSP channel.

use std::future::Future;

use bytes::Bytes;
use futures::stream::SplitStream;
use futures::StreamExt;
use log::{debug, trace, warn};
use rtsp_types::Message;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::channel_mapping::{ChannelMappings, ChannelType};
use super::{FrameSource, SourceEvent};
use crate::tokio::Connection;

/// Interleaved packets queued per stream before the demuxer waits.
pub(super) const QUEUE_DEPTH: usize = 64;

/// Largest possible UDP payload.
const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug)]
pub(super) enum SourceItem {
    Rtp(Bytes),
    Bye,
}

/// Copies `data` into the start of `buf`, truncating it if necessary.
fn copy_frame(data: &[u8], buf: &mut [u8]) -> SourceEvent {
    let len = std::cmp::min(data.len(), buf.len());
    buf[..len].copy_from_slice(&data[..len]);
    SourceEvent::Frame {
        len,
        truncated: len < data.len(),
    }
}

/// Packets for one stream, demultiplexed from the RTSP connection.
pub struct InterleavedSource {
    stream_id: usize,
    rx: mpsc::Receiver<SourceItem>,
}

impl InterleavedSource {
    pub(super) fn new(stream_id: usize, rx: mpsc::Receiver<SourceItem>) -> Self {
        Self { stream_id, rx }
    }
}

impl FrameSource for InterleavedSource {
    fn get_next_frame<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = SourceEvent> + 'a {
        async move {
            match self.rx.recv().await {
                Some(SourceItem::Rtp(pkt)) => copy_frame(&pkt, buf),
                Some(SourceItem::Bye) => SourceEvent::Bye,
                None => {
                    debug!("stream {}: interleaved data ended", self.stream_id);
                    SourceEvent::Closed
                }
            }
        }
    }
}

/// Routes interleaved data from `reader` to each stream's source until the
/// connection ends. Dropping `senders` on return closes every source.
pub(super) async fn demux(
    mut reader: SplitStream<Connection>,
    channels: ChannelMappings,
    mut senders: Vec<Option<mpsc::Sender<SourceItem>>>,
) {
    loop {
        let msg = match reader.next().await {
            None => {
                debug!("RTSP connection closed by peer");
                return;
            }
            Some(Err(e)) => {
                warn!("{}", e);
                return;
            }
            Some(Ok(m)) => m,
        };
        let data = match msg.msg {
            Message::Data(d) => d,
            Message::Response(r) => {
                debug!("[{}] ignoring response while playing: {:?}", msg.ctx, r.status());
                continue;
            }
            Message::Request(r) => {
                debug!("[{}] ignoring {:?} request from server", msg.ctx, r.method());
                continue;
            }
        };
        let channel_id = data.channel_id();
        let Some(m) = channels.lookup(channel_id) else {
            debug!("[{}] data on unassigned channel {}", msg.ctx, channel_id);
            continue;
        };
        let Some(tx) = senders.get(m.stream_i).and_then(Option::as_ref) else {
            continue;
        };
        let body = data.into_body();
        let item = match m.channel_type {
            ChannelType::Rtp if body.is_empty() => {
                trace!("[{}] skipping empty RTP on channel {}", msg.ctx, channel_id);
                continue;
            }
            ChannelType::Rtp => SourceItem::Rtp(body),
            ChannelType::Rtcp => {
                if crate::rtcp::find_bye(&body).is_none() {
                    continue;
                }
                SourceItem::Bye
            }
        };
        if tx.send(item).await.is_err() {
            trace!("stream {} is no longer receiving", m.stream_i);
            senders[m.stream_i] = None;
        }
    }
}

/// RTP and RTCP for one stream over UDP.
pub struct UdpSource {
    stream_id: usize,
    local_rtp_port: u16,
    rtp: UdpSocket,
    rtcp: UdpSocket,
    rtcp_buf: Box<[u8]>,
}

enum Received {
    Rtp(std::io::Result<usize>),
    Rtcp(std::io::Result<usize>),
}

impl UdpSource {
    pub(super) fn new(stream_id: usize, pair: crate::tokio::UdpPair) -> Self {
        Self {
            stream_id,
            local_rtp_port: pair.rtp_port,
            rtp: pair.rtp_socket,
            rtcp: pair.rtcp_socket,
            rtcp_buf: vec![0; MAX_DATAGRAM].into_boxed_slice(),
        }
    }

    /// Returns the local RTP port; RTCP is the next port up.
    pub fn local_rtp_port(&self) -> u16 {
        self.local_rtp_port
    }
}

impl FrameSource for UdpSource {
    fn get_next_frame<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = SourceEvent> + 'a {
        async move {
            loop {
                let received = tokio::select! {
                    r = self.rtp.recv(&mut *buf) => Received::Rtp(r),
                    r = self.rtcp.recv(&mut self.rtcp_buf) => Received::Rtcp(r),
                };
                match received {
                    Received::Rtp(Ok(0)) => {
                        trace!("stream {}: skipping empty RTP datagram", self.stream_id)
                    }
                    Received::Rtp(Ok(len)) => {
                        return SourceEvent::Frame {
                            len,
                            truncated: false,
                        }
                    }
                    Received::Rtp(Err(e)) => {
                        warn!("stream {}: RTP receive failed: {}", self.stream_id, e);
                        return SourceEvent::Closed;
                    }
                    Received::Rtcp(Ok(len)) => {
                        if crate::rtcp::find_bye(&self.rtcp_buf[..len]).is_some() {
                            return SourceEvent::Bye;
                        }
                    }
                    // eg ICMP port unreachable; RTCP is only used for BYE.
                    Received::Rtcp(Err(e)) => {
                        debug!("stream {}: RTCP receive failed: {}", self.stream_id, e)
                    }
                }
            }
        }
    }
}

/// The source returned by [`super::RtspChannel`] for its configured transport.
pub enum RtspSource {
    Interleaved(InterleavedSource),
    Udp(UdpSource),
}

impl FrameSource for RtspSource {
    fn get_next_frame<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = SourceEvent> + 'a {
        async move {
            match self {
                RtspSource::Interleaved(s) => s.get_next_frame(buf).await,
                RtspSource::Udp(s) => s.get_next_frame(buf).await,
            }
        }
    }
}
