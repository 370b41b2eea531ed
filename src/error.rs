// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt::Display, sync::Arc};

use crate::event::code;
use crate::{ConnectionContext, RtspMessageContext};
use thiserror::Error;

/// An opaque `std::error::Error + Send + Sync + 'static` implementation.
///
/// The focus is on detailed human-readable messages; in most cases they carry
/// enough context to find the offending message in a packet capture. Hosts
/// which only see the C boundary get the integer from [`Error::result_code`].
#[derive(Clone)]
pub struct Error(pub(crate) Arc<ErrorInt>);

impl Error {
    /// Maps this error onto the code reported with a session result.
    ///
    /// *   non-success RTSP responses report their status code (eg 404, 461).
    /// *   I/O failures report `-errno` when the OS supplied one, else `-1`.
    /// *   malformed or unexpected messages report [`code::PROTOCOL_ERROR`].
    /// *   timed-out requests report [`code::TIMEOUT`].
    /// *   caller mistakes report `-EINVAL`.
    pub fn result_code(&self) -> i32 {
        match &*self.0 {
            ErrorInt::InvalidArgument(_) | ErrorInt::FailedPrecondition(_) => -EINVAL,
            ErrorInt::RtspFramingError { .. } => code::PROTOCOL_ERROR,
            ErrorInt::RtspResponseError { status, .. } => {
                if status.is_success() {
                    // The server said yes but what followed made no sense.
                    code::PROTOCOL_ERROR
                } else {
                    i32::from(u16::from(*status))
                }
            }
            ErrorInt::ConnectError(source)
            | ErrorInt::RtspReadError { source, .. }
            | ErrorInt::WriteError { source, .. } => io_code(source),
            ErrorInt::Internal(_) => -1,
            ErrorInt::Timeout => code::TIMEOUT,
        }
    }
}

const EINVAL: i32 = 22;

fn io_code(e: &std::io::Error) -> i32 {
    match e.raw_os_error() {
        Some(errno) if errno > 0 => -errno,
        _ => -1,
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Error)]
pub(crate) enum ErrorInt {
    /// The method's caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unparseable or unexpected RTSP message.
    #[error("[{conn_ctx}, {msg_ctx}] RTSP framing error: {description}")]
    RtspFramingError {
        conn_ctx: ConnectionContext,
        msg_ctx: RtspMessageContext,
        description: String,
    },

    /// A response which was unsuccessful or which couldn't be understood.
    #[error("[{conn_ctx}, {msg_ctx}] {status} response to {} CSeq={cseq}: \
             {description}", Into::<&str>::into(.method))]
    RtspResponseError {
        conn_ctx: ConnectionContext,
        msg_ctx: RtspMessageContext,
        method: rtsp_types::Method,
        cseq: u32,
        status: rtsp_types::StatusCode,
        description: String,
    },

    #[error("Unable to connect to RTSP server: {0}")]
    ConnectError(#[source] std::io::Error),

    #[error("[{conn_ctx}, {msg_ctx}] Error reading from RTSP peer: {source}")]
    RtspReadError {
        conn_ctx: ConnectionContext,
        msg_ctx: RtspMessageContext,
        source: std::io::Error,
    },

    #[error("[{conn_ctx}] Error writing to RTSP peer: {source}")]
    WriteError {
        conn_ctx: ConnectionContext,
        source: std::io::Error,
    },

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Internal error: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Timeout")]
    Timeout,
}
