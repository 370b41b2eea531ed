// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::Bytes;
use log::{debug, warn};
use pretty_hex::PrettyHex;
use sdp_types::Media;
use std::{net::IpAddr, num::NonZeroU16};
use url::Url;

use super::{PlayRange, Presentation, Stream};
use crate::event::MediaAttribute;

/// Static payload types from the [RTP parameters
/// registry](https://www.iana.org/assignments/rtp-parameters/rtp-parameters.xhtml#rtp-parameters-1),
/// as `(encoding, media, clock rate, channels)`. The registry is closed.
#[rustfmt::skip]
static STATIC_PAYLOAD_TYPES: [Option<(&str, &str, u32, u16)>; 35] = [
    Some(("pcmu", "audio", 8_000, 1)),   // 0
    None, None,                          // 1-2 reserved
    Some(("gsm", "audio", 8_000, 1)),    // 3
    Some(("g723", "audio", 8_000, 1)),   // 4
    Some(("dvi4", "audio", 8_000, 1)),   // 5
    Some(("dvi4", "audio", 16_000, 1)),  // 6
    Some(("lpc", "audio", 8_000, 1)),    // 7
    Some(("pcma", "audio", 8_000, 1)),   // 8
    Some(("g722", "audio", 8_000, 1)),   // 9
    Some(("l16", "audio", 44_100, 2)),   // 10
    Some(("l16", "audio", 44_100, 1)),   // 11
    Some(("qcelp", "audio", 8_000, 1)),  // 12
    Some(("cn", "audio", 8_000, 1)),     // 13
    Some(("mpa", "audio", 90_000, 0)),   // 14
    Some(("g728", "audio", 8_000, 1)),   // 15
    Some(("dvi4", "audio", 11_025, 1)),  // 16
    Some(("dvi4", "audio", 22_050, 1)),  // 17
    Some(("g729", "audio", 8_000, 1)),   // 18
    None, None, None, None, None, None,  // 19-24 reserved/unassigned
    Some(("celb", "video", 90_000, 0)),  // 25
    Some(("jpeg", "video", 90_000, 0)),  // 26
    None,                                // 27
    Some(("nv", "video", 90_000, 0)),    // 28
    None, None,                          // 29-30
    Some(("h261", "video", 90_000, 0)),  // 31
    Some(("mpv", "video", 90_000, 0)),   // 32
    Some(("mp2t", "video", 90_000, 0)),  // 33
    Some(("h263", "video", 90_000, 0)),  // 34
];

/// Joins a control URL to a base URL in a non-RFC-compliant but common way.
/// This matches what live555 and ffmpeg do.
fn join_control(base_url: &Url, control: &str) -> Result<Url, String> {
    if control == "*" {
        return Ok(base_url.clone());
    }
    if let Ok(absolute_url) = Url::parse(control) {
        return Ok(absolute_url);
    }
    let sep = if base_url.as_str().ends_with('/') { "" } else { "/" };
    Url::parse(&format!("{}{}{}", base_url.as_str(), sep, control)).map_err(|e| {
        format!(
            "unable to join base url {} with control url {:?}: {}",
            base_url, control, e
        )
    })
}

/// Returns the `CSeq` from an RTSP response as a `u32`, or `None` if missing/unparseable.
pub(crate) fn get_cseq(response: &rtsp_types::Response<Bytes>) -> Option<u32> {
    response
        .header(&rtsp_types::headers::CSEQ)
        .and_then(|cseq| u32::from_str_radix(cseq.as_str().trim(), 10).ok())
}

/// Parses an NPT time: `now`, seconds (`12.5`), or `hh:mm:ss[.frac]`.
fn parse_npt_time(s: &str) -> Result<f64, String> {
    if s == "now" {
        return Ok(0.0);
    }
    let bad = || format!("bad npt time {s:?}");
    let secs = match s.split_once(':') {
        None => s.parse::<f64>().map_err(|_| bad())?,
        Some((h, rest)) => {
            let (m, sec) = rest.split_once(':').ok_or_else(bad)?;
            let h = u32::from_str_radix(h, 10).map_err(|_| bad())?;
            let m = u32::from_str_radix(m, 10).map_err(|_| bad())?;
            let sec = sec.parse::<f64>().map_err(|_| bad())?;
            f64::from(h) * 3600. + f64::from(m) * 60. + sec
        }
    };
    if !secs.is_finite() || secs < 0. {
        return Err(bad());
    }
    Ok(secs)
}

/// Parses an `a=range:` value as in
/// [RFC 2326 section 3.6](https://datatracker.ietf.org/doc/html/rfc2326#section-3.6).
pub(crate) fn parse_range(value: &str) -> Result<PlayRange, String> {
    let value = value.trim();
    if let Some(clock) = value.strip_prefix("clock=") {
        return Ok(PlayRange::Clock(clock.into()));
    }
    let npt = value
        .strip_prefix("npt=")
        .ok_or_else(|| format!("unsupported range {value:?}"))?;
    let (start, end) = npt
        .split_once('-')
        .ok_or_else(|| format!("range {value:?} has no '-'"))?;
    let start = parse_npt_time(start.trim())?;
    let end = match end.trim() {
        "" => None,
        e => Some(parse_npt_time(e)?),
    };
    Ok(PlayRange::Npt { start, end })
}

/// Parses an `a=rtpmap:` value (`<pt> <encoding>/<rate>[/<channels>]`).
fn parse_rtpmap(value: &str) -> Result<MediaAttribute, String> {
    let bad = || format!("invalid rtpmap attribute {value:?}");
    let (payload_type, rest) = value.trim().split_once(' ').ok_or_else(bad)?;
    let payload_type = u8::from_str_radix(payload_type, 10).map_err(|_| bad())?;
    let mut parts = rest.trim().split('/');
    let encoding_name = parts.next().filter(|e| !e.is_empty()).ok_or_else(bad)?;
    let sample_rate = parts
        .next()
        .and_then(|r| u32::from_str_radix(r, 10).ok())
        .ok_or_else(|| "bad clockrate in rtpmap".to_string())?;
    let channels = match parts.next() {
        None => 1,
        Some(c) => u16::from_str_radix(c, 10)
            .ok()
            .filter(|&c| c > 0)
            .ok_or_else(|| format!("Invalid channels specification {c:?}"))?,
    };
    Ok(MediaAttribute {
        payload_type,
        encoding_name: encoding_name.to_owned(),
        sample_rate,
        channels,
    })
}

/// Returns the media attribute from the description's first `a=rtpmap:` line.
fn first_media_attribute(sdp: &sdp_types::Session) -> Option<MediaAttribute> {
    let value = sdp
        .attributes
        .iter()
        .chain(sdp.medias.iter().flat_map(|m| m.attributes.iter()))
        .find(|a| a.attribute == "rtpmap")?
        .value
        .as_deref()?;
    match parse_rtpmap(value) {
        Ok(m) => Some(m),
        Err(e) => {
            warn!("no media attribute: {}", e);
            None
        }
    }
}

/// Parses a [Media] to a [Stream].
fn parse_media(base_url: &Url, media_description: &Media) -> Result<Stream, String> {
    let media = media_description.media.clone();

    // RFC 8866 section 5.14: with an RTP-based proto such as "RTP/AVP" or
    // "TCP/RTP/AVP", the <fmt> sub-fields are RTP payload types.
    if !media_description.proto.starts_with("RTP/") && !media_description.proto.contains("/RTP/") {
        return Err("Expected RTP-based proto".into());
    }

    // The first listed format is the default; only it is used.
    let rtp_payload_type_str = media_description
        .fmt
        .split_ascii_whitespace()
        .next()
        .ok_or_else(|| "no payload type in media line".to_string())?;
    let rtp_payload_type = u8::from_str_radix(rtp_payload_type_str, 10)
        .ok()
        .filter(|pt| pt & 0x80 == 0)
        .ok_or_else(|| format!("invalid RTP payload type {:?}", rtp_payload_type_str))?;

    let mut rtpmap = None;
    let mut control = None;
    let mut range = None;
    for a in &media_description.attributes {
        let value = a.value.as_deref();
        match (a.attribute.as_str(), value) {
            ("rtpmap", Some(v)) => {
                let m = parse_rtpmap(v)?;
                if m.payload_type == rtp_payload_type {
                    rtpmap = Some(m);
                }
            }
            ("rtpmap", None) => return Err("rtpmap attribute with no value".to_string()),
            ("control", Some(c)) => control = Some(join_control(base_url, c)?),
            ("range", Some(r)) => match parse_range(r) {
                Ok(r) => range = Some(r),
                Err(e) => debug!("ignoring media range: {}", e),
            },
            _ => {}
        }
    }

    let (encoding_name, clock_rate, channels) = match rtpmap {
        Some(m) => (
            m.encoding_name.to_ascii_lowercase(),
            m.sample_rate,
            NonZeroU16::new(m.channels),
        ),
        None => {
            let &(encoding, type_media, clock_rate, channels) = STATIC_PAYLOAD_TYPES
                .get(usize::from(rtp_payload_type))
                .and_then(Option::as_ref)
                .ok_or_else(|| {
                    format!(
                        "Expected rtpmap parameter or assigned static payload type (got {})",
                        rtp_payload_type
                    )
                })?;
            if type_media != media {
                return Err(format!(
                    "SDP media type {} must match RTP payload type {} ({})",
                    &media, rtp_payload_type, type_media
                ));
            }
            (encoding.to_owned(), clock_rate, NonZeroU16::new(channels))
        }
    };

    Ok(Stream {
        media,
        encoding_name,
        clock_rate,
        rtp_payload_type,
        channels,
        control,
        range,
    })
}

/// Parses a successful RTSP `DESCRIBE` response into a [Presentation].
///
/// `request_url` is the caller's URL, without any added token. Streams which
/// can't be used are logged and left out.
pub(crate) fn parse_describe(
    request_url: Url,
    response: &rtsp_types::Response<Bytes>,
) -> Result<Presentation, String> {
    let content_type = response.header(&rtsp_types::headers::CONTENT_TYPE);
    if !matches!(content_type, Some(v) if v.as_str().trim() == "application/sdp") {
        return Err(format!(
            "Describe response not of expected application/sdp content type: {:#?}",
            &response
        ));
    }

    let sdp = sdp_types::Session::parse(&response.body()[..]).map_err(|e| {
        format!(
            "Unable to parse SDP: {}\n\n{:#?}",
            e,
            response.body().hex_dump()
        )
    })?;

    // https://tools.ietf.org/html/rfc2326#appendix-C.1.1
    let base_url = response
        .header(&rtsp_types::headers::CONTENT_BASE)
        .map(|v| (rtsp_types::headers::CONTENT_BASE, v))
        .or_else(|| {
            response
                .header(&rtsp_types::headers::CONTENT_LOCATION)
                .map(|v| (rtsp_types::headers::CONTENT_LOCATION, v))
        })
        .map(|(h, v)| Url::parse(v.as_str()).map_err(|e| format!("bad {} {:?}: {}", h, v, e)))
        .unwrap_or_else(|| Ok(request_url.clone()))?;

    let mut control = None;
    let mut tool = None;
    let mut range = None;
    for a in &sdp.attributes {
        match (a.attribute.as_str(), a.value.as_deref()) {
            ("control", Some(c)) => control = Some(join_control(&base_url, c)?),
            ("tool", Some(t)) => tool = Some(t.into()),
            ("range", Some(r)) => match parse_range(r) {
                Ok(r) => range = Some(r),
                Err(e) => debug!("ignoring session range: {}", e),
            },
            _ => {}
        }
    }
    let control = control.unwrap_or(request_url);

    let mut streams = Vec::with_capacity(sdp.medias.len());
    for (i, m) in sdp.medias.iter().enumerate() {
        match parse_media(&base_url, m) {
            Ok(s) => streams.push(s),
            Err(e) => warn!("Ignoring unusable stream {}: {}\n\n{:#?}", i, e, m),
        }
    }

    // Without a session-level range, use the longest media-level one.
    let range = range.or_else(|| {
        streams
            .iter()
            .filter_map(|s| s.range.clone())
            .max_by(|a, b| {
                let a = a.duration().unwrap_or_default();
                let b = b.duration().unwrap_or_default();
                a.cmp(&b)
            })
    });

    Ok(Presentation {
        media_attribute: first_media_attribute(&sdp),
        streams,
        base_url,
        control,
        range,
        tool,
    })
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SessionHeader {
    pub(crate) id: Box<str>,
    pub(crate) timeout_sec: u32,
}

#[derive(Debug)]
pub(crate) struct SetupResponse {
    pub(crate) session: SessionHeader,
    pub(crate) ssrc: Option<u32>,
    pub(crate) channel_id: Option<u8>,
    pub(crate) source: Option<IpAddr>,
    pub(crate) server_port: Option<(u16, u16)>,
}

/// Parses `n-m` where `m` must be `n+1`, or just `n`.
fn parse_pair<T>(s: &str, what: &str) -> Result<(T, Option<T>), String>
where
    T: std::str::FromStr + Copy,
{
    let mut parts = s.splitn(2, '-');
    let first = parts.next().unwrap_or_default();
    let n = first
        .parse::<T>()
        .map_err(|_| format!("bad {} {:?}", what, first))?;
    let m = parts
        .next()
        .map(|m| m.parse::<T>().map_err(|_| format!("bad second {} {:?}", what, m)))
        .transpose()?;
    Ok((n, m))
}

/// Parses a `SETUP` response's `Session` and `Transport` headers.
pub(crate) fn parse_setup(response: &rtsp_types::Response<Bytes>) -> Result<SetupResponse, String> {
    // https://datatracker.ietf.org/doc/html/rfc2326#section-12.37
    let session = response
        .header(&rtsp_types::headers::SESSION)
        .ok_or_else(|| "Missing Session header".to_string())?;
    let session = match session.as_str().split_once(';') {
        None => SessionHeader {
            id: session.as_str().trim().into(),
            timeout_sec: 60, // default
        },
        Some((id, params)) => {
            let v = params
                .trim()
                .strip_prefix("timeout=")
                .ok_or_else(|| format!("Unparseable Session header {:?}", session.as_str()))?;
            SessionHeader {
                id: id.trim().into(),
                timeout_sec: u32::from_str_radix(v, 10)
                    .map_err(|_| format!("Unparseable timeout {}", v))?,
            }
        }
    };
    let transport = response
        .header(&rtsp_types::headers::TRANSPORT)
        .ok_or_else(|| "Missing Transport header".to_string())?;
    let mut setup = SetupResponse {
        session,
        ssrc: None,
        channel_id: None,
        source: None,
        server_port: None,
    };
    for part in transport.as_str().split(';') {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("ssrc=") {
            setup.ssrc =
                Some(u32::from_str_radix(v, 16).map_err(|_| format!("Unparseable ssrc {}", v))?);
        } else if let Some(interleaved) = part.strip_prefix("interleaved=") {
            let (n, m) = parse_pair::<u8>(interleaved, "channel number")?;
            if let Some(m) = m {
                if n.checked_add(1) != Some(m) {
                    return Err(format!("Expected adjacent channels; got {}-{}", n, m));
                }
            }
            setup.channel_id = Some(n);
        } else if let Some(s) = part.strip_prefix("source=") {
            setup.source = Some(
                s.parse()
                    .map_err(|_| format!("Transport header has unparseable source {:?}", s))?,
            );
        } else if let Some(s) = part.strip_prefix("server_port=") {
            match parse_pair::<u16>(s, "port")? {
                (n, Some(m)) => setup.server_port = Some((n, m)),
                (n, None) => setup.server_port = Some((n, n.wrapping_add(1))),
            }
        }
    }
    Ok(setup)
}
