// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Best-effort `TEARDOWN`.

use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use log::debug;
use rtsp_types::{headers, Message, Method, Request, Version};
use url::Url;

use super::rtsp::{connect, ConnState, Requester};
use crate::tokio::Connection;
use crate::{error::ErrorInt, Error};

const EXISTING_CONN_TIMEOUT: Duration = Duration::from_secs(5);
const FRESH_CONN_TIMEOUT: Duration = Duration::from_secs(1);

/// Sends `TEARDOWN` for `session_id`, first on the existing connection (if
/// any), then once on a fresh connection. Failures are logged and otherwise
/// ignored; each attempt is bounded by the smaller of its own limit and
/// `request_timeout`.
pub(super) async fn teardown(
    conn: ConnState,
    requester: &mut Requester,
    url: Url,
    session_id: &str,
    request_timeout: Duration,
) {
    debug!("TEARDOWN {} starting", session_id);
    let mut req = Request::builder(Method::Teardown, Version::V1_0)
        .request_uri(url.clone())
        .header(headers::SESSION, session_id.to_string())
        .build(Bytes::new());

    let existing_timeout = std::cmp::min(EXISTING_CONN_TIMEOUT, request_timeout);
    match conn {
        ConnState::Idle => {}
        ConnState::Open(mut conn) => {
            match tokio::time::timeout(existing_timeout, attempt(&mut req, requester, &mut conn))
                .await
            {
                Ok(Ok(())) => {
                    debug!("TEARDOWN {} on existing conn succeeded", session_id);
                    return;
                }
                Ok(Err(e)) => debug!("TEARDOWN {} on existing conn failed: {}", session_id, e),
                Err(_) => debug!("TEARDOWN {} on existing conn timed out", session_id),
            }
        }
        ConnState::Playing { mut writer, demux } => {
            // The demux task owns the read half, so the response isn't awaited.
            let r = tokio::time::timeout(existing_timeout, async {
                requester.fill_req(&mut req)?;
                writer
                    .send(Message::Request(req.clone()))
                    .await
                    .map_err(|e| wrap!(e))
            })
            .await;
            demux.abort();
            match r {
                Ok(Ok(())) => {
                    debug!("TEARDOWN {} sent on playing conn", session_id);
                    return;
                }
                Ok(Err(e)) => debug!("TEARDOWN {} on playing conn failed: {}", session_id, e),
                Err(_) => debug!("TEARDOWN {} on playing conn timed out", session_id),
            }
        }
    }

    let fresh_timeout = std::cmp::min(FRESH_CONN_TIMEOUT, request_timeout);
    let r = tokio::time::timeout(fresh_timeout, async {
        let mut conn = connect(&url, fresh_timeout).await?;
        attempt(&mut req, requester, &mut conn).await
    })
    .await;
    match r {
        Ok(Ok(())) => debug!("TEARDOWN {} on fresh conn succeeded", session_id),
        Ok(Err(e)) => debug!("TEARDOWN {} on fresh conn failed: {}", session_id, e),
        Err(_) => debug!("TEARDOWN {} on fresh conn timed out", session_id),
    }
}

/// Makes a single attempt on the supplied connection; caller is responsible for the timeout.
async fn attempt(
    req: &mut Request<Bytes>,
    requester: &mut Requester,
    conn: &mut Connection,
) -> Result<(), Error> {
    let e = match requester.send(conn, req).await {
        Ok(_) => return Ok(()),
        Err(e) => e,
    };

    // The session is gone either way.
    match *e.0 {
        ErrorInt::RtspResponseError { status, .. }
            if status == rtsp_types::StatusCode::SessionNotFound =>
        {
            Ok(())
        }
        _ => Err(e),
    }
}
