// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! C interface to [`Puller`].
//!
//! ```c
//! typedef int (*rtsp_puller_cb)(int kind, void *data, void *ctx);
//!
//! void *h = rtsp_puller_create();
//! rtsp_puller_set_callback(h, on_event, my_ctx);
//! rtsp_puller_start_stream(h, "rtsp://cam/stream", RTP_OVER_TCP, "admin", "pw", 1, 0);
//! ...
//! rtsp_puller_close_stream(h);
//! rtsp_puller_release(h);
//! ```
//!
//! `data` points at a [`PullerState`], [`MediaAttr`], or [`RtpData`] per
//! `kind`, or is null for [`CB_CONNECTION_BROKEN`]. It and everything it
//! points to are valid only during the call.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;

use log::warn;

use crate::client::Transport;
use crate::event::{Callback, Event};
use crate::{Error, Puller};

pub const CB_PULLER_STATE: c_int = 0;
pub const CB_MEDIA_ATTR: c_int = 1;
pub const CB_RTP_DATA: c_int = 2;
pub const CB_CONNECTION_BROKEN: c_int = 3;

pub const RTP_OVER_TCP: c_int = 1;
pub const RTP_OVER_UDP: c_int = 2;

const EINVAL: c_int = 22;

pub type RtspPullerCallback =
    Option<unsafe extern "C" fn(kind: c_int, data: *mut c_void, ctx: *mut c_void) -> c_int>;

/// Session result. `result_string` is NUL-terminated.
#[repr(C)]
pub struct PullerState {
    pub result_code: c_int,
    pub result_string: *const c_char,
}

#[repr(C)]
pub struct MediaAttr {
    /// RTP payload type of the first `a=rtpmap:` line.
    pub audio_codec: c_int,
    pub audio_samplerate: c_int,
    pub audio_channel: c_int,
}

#[repr(C)]
pub struct RtpData {
    pub data_buf: *const u8,
    pub buf_len: c_int,
}

/// The caller's context pointer, handed back on the worker thread.
struct Context(*mut c_void);

// The caller promises `ctx` may be used from the worker thread.
unsafe impl Send for Context {}

impl Context {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

fn saturate(v: impl TryInto<c_int>) -> c_int {
    v.try_into().unwrap_or(c_int::MAX)
}

/// Adapts a C callback to [`Callback`].
fn c_callback(
    cb: unsafe extern "C" fn(c_int, *mut c_void, *mut c_void) -> c_int,
    ctx: Context,
) -> Callback {
    Box::new(move |event: Event<'_>| {
        let ctx = ctx.get();
        match event {
            Event::SessionResult { code, message } => {
                let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
                let mut state = PullerState {
                    result_code: code,
                    result_string: message.as_ptr(),
                };
                unsafe { cb(CB_PULLER_STATE, ptr::addr_of_mut!(state).cast(), ctx) };
            }
            Event::MediaAttribute(a) => {
                let mut attr = MediaAttr {
                    audio_codec: c_int::from(a.payload_type),
                    audio_samplerate: saturate(a.sample_rate),
                    audio_channel: c_int::from(a.channels),
                };
                unsafe { cb(CB_MEDIA_ATTR, ptr::addr_of_mut!(attr).cast(), ctx) };
            }
            Event::Frame(f) => {
                let mut data = RtpData {
                    data_buf: f.data.as_ptr(),
                    buf_len: saturate(f.data.len()),
                };
                unsafe { cb(CB_RTP_DATA, ptr::addr_of_mut!(data).cast(), ctx) };
            }
            Event::ConnectionBroken { .. } => {
                unsafe { cb(CB_CONNECTION_BROKEN, ptr::null_mut(), ctx) };
            }
        }
    })
}

fn to_c_result(r: Result<(), Error>) -> c_int {
    match r {
        Ok(()) => 0,
        Err(e) => {
            warn!("{}", e);
            std::cmp::min(e.result_code(), -1)
        }
    }
}

/// Reads an optional C string. Null and empty both mean absent.
unsafe fn opt_str<'a>(p: *const c_char) -> Result<Option<&'a str>, ()> {
    if p.is_null() {
        return Ok(None);
    }
    match CStr::from_ptr(p).to_str() {
        Ok("") => Ok(None),
        Ok(s) => Ok(Some(s)),
        Err(_) => Err(()),
    }
}

/// Creates a handle, or returns null if the runtime couldn't be created.
#[no_mangle]
pub extern "C" fn rtsp_puller_create() -> *mut Puller {
    match Puller::new() {
        Ok(p) => Box::into_raw(Box::new(p)),
        Err(e) => {
            warn!("Unable to create puller: {}", e);
            ptr::null_mut()
        }
    }
}

/// Sets the event callback. Must precede `rtsp_puller_start_stream`.
///
/// # Safety
///
/// `handle` must be null or from `rtsp_puller_create` and not yet released.
/// `cb` is called with `ctx` on the worker thread.
#[no_mangle]
pub unsafe extern "C" fn rtsp_puller_set_callback(
    handle: *mut Puller,
    cb: RtspPullerCallback,
    ctx: *mut c_void,
) -> c_int {
    let (Some(puller), Some(cb)) = (handle.as_mut(), cb) else {
        return -EINVAL;
    };
    to_c_result(puller.set_callback(c_callback(cb, Context(ctx))))
}

/// Starts pulling `url`. `conn_type` is `RTP_OVER_TCP` or `RTP_OVER_UDP`.
///
/// # Safety
///
/// `handle` as for `rtsp_puller_set_callback`. `url` must be a valid
/// NUL-terminated string; `username` and `password` must each be null or one.
#[no_mangle]
pub unsafe extern "C" fn rtsp_puller_start_stream(
    handle: *mut Puller,
    url: *const c_char,
    conn_type: c_int,
    username: *const c_char,
    password: *const c_char,
    auto_reconnect: c_int,
    raw_packets: c_int,
) -> c_int {
    let Some(puller) = handle.as_mut() else {
        return -EINVAL;
    };
    let transport = match conn_type {
        RTP_OVER_TCP => Transport::Tcp,
        RTP_OVER_UDP => Transport::Udp,
        _ => return -EINVAL,
    };
    let (Ok(Some(url)), Ok(username), Ok(password)) =
        (opt_str(url), opt_str(username), opt_str(password))
    else {
        return -EINVAL;
    };
    to_c_result(puller.start_stream(
        url,
        transport,
        username,
        password,
        auto_reconnect != 0,
        raw_packets != 0,
    ))
}

/// Stops the stream and waits for the worker thread. Idempotent.
///
/// # Safety
///
/// As for `rtsp_puller_set_callback`. Must not be called from the callback.
#[no_mangle]
pub unsafe extern "C" fn rtsp_puller_close_stream(handle: *mut Puller) -> c_int {
    let Some(puller) = handle.as_mut() else {
        return -EINVAL;
    };
    puller.close_stream();
    0
}

/// Closes the stream if necessary and frees the handle.
///
/// # Safety
///
/// As for `rtsp_puller_set_callback`; `handle` is invalid afterward.
#[no_mangle]
pub unsafe extern "C" fn rtsp_puller_release(handle: *mut Puller) -> c_int {
    if handle.is_null() {
        return -EINVAL;
    }
    drop(Box::from_raw(handle));
    0
}
