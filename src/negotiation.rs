//! # Content Negotiation
//!
//! Pure functions computing what a request carries ([`BodySpec`]) and what
//! its response may be ([`ResponseSpec`]) from the request headers and the
//! operation's declared media types. None of them touch the body.
//!
//! `Accept` and `Accept-Charset` follow RFC 7231: ranges carry an optional
//! `q` weight, `*/*` and `type/*` are wildcards, the most specific range
//! matching a type decides its weight and `q=0` excludes it. A missing
//! header accepts everything.
//!
//! UTF-8 is the only supported charset.

use crate::errors::{ErrorCode, HttpError};
use crate::spec::Operation;
use http::header::{ACCEPT, ACCEPT_CHARSET, CONTENT_LENGTH, CONTENT_TYPE};
use http::HeaderMap;
use std::collections::BTreeSet;

pub const UTF_8: &str = "utf-8";
pub const SUPPORTED_CHARSETS: [&str; 1] = [UTF_8];
/// Media type assumed for bodies sent without `Content-Type`.
pub const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// What the request body is, derived from `Content-Type`/`Content-Length`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodySpec {
    /// `None` when the request carries no body.
    pub content_type: Option<String>,
    pub content_length: Option<usize>,
    pub charset: String,
    pub boundary: Option<String>,
}

impl BodySpec {
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.content_type.is_some()
    }
}

/// Acceptable response media types and charsets, best first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseSpec {
    pub content_types: Vec<String>,
    pub charsets: Vec<String>,
}

/// Union of the media types documented across every response of the operation.
pub fn extract_produceable_media_types(operation: &Operation) -> Vec<String> {
    operation
        .responses
        .iter()
        .flat_map(|r| r.content.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Media types declared on the request body; empty when no body is documented.
pub fn extract_consumable_media_types(operation: &Operation) -> Vec<String> {
    operation
        .request_body
        .as_ref()
        .map(|b| b.content.keys().cloned().collect())
        .unwrap_or_default()
}

/// A parsed `type/subtype; key=value` header value.
#[derive(Debug, Clone, PartialEq)]
struct MediaType {
    essence: String,
    params: Vec<(String, String)>,
}

impl MediaType {
    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

fn parse_media_type(raw: &str) -> Option<MediaType> {
    let mut parts = raw.split(';');
    let essence = parts.next()?.trim().to_ascii_lowercase();
    let (kind, subtype) = essence.split_once('/')?;
    if !is_token(kind) || !is_token(subtype) {
        return None;
    }
    let mut params = Vec::new();
    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=')?;
        let key = key.trim().to_ascii_lowercase();
        if !is_token(&key) {
            return None;
        }
        let value = value.trim().trim_matches('"').to_string();
        params.push((key, value));
    }
    Some(MediaType { essence, params })
}

/// Whether a (possibly wildcard) range covers a concrete media type.
pub fn media_range_matches(range: &str, media_type: &str) -> bool {
    if range == "*/*" || range == media_type {
        return true;
    }
    match (range.strip_suffix("/*"), media_type.split_once('/')) {
        (Some(kind), Some((candidate, _))) => kind == candidate,
        _ => false,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &http::HeaderName) -> Result<Option<&'a str>, ()> {
    match headers.get(name) {
        None => Ok(None),
        Some(v) => v.to_str().map(Some).map_err(|_| ()),
    }
}

/// Describe the request body from its headers.
///
/// A zero `Content-Length` means no body whatever the `Content-Type` says,
/// and so does a request without either header. A body without `Content-Type` is taken as
/// `application/octet-stream`. The media type is only checked against
/// `consumable_media_types` when that list is not empty; the router rejects
/// bodies sent to operations consuming nothing.
///
/// # Errors
///
/// `E_BAD_CONTENT_LENGTH`, `E_BAD_CONTENT_TYPE`, `E_UNSUPPORTED_CHARSET` or
/// `E_UNSUPPORTED_MEDIA_TYPE`.
pub fn extract_body_spec(
    headers: &HeaderMap,
    consumable_media_types: &[String],
    consumable_charsets: &[&str],
) -> Result<BodySpec, HttpError> {
    let content_length = match header_str(headers, &CONTENT_LENGTH) {
        Ok(None) => None,
        Ok(Some(raw)) => Some(raw.trim().parse::<usize>().map_err(|_| {
            HttpError::new(
                ErrorCode::BadContentLength,
                format!("Content-Length `{raw}` is not a byte count"),
            )
        })?),
        Err(()) => {
            return Err(HttpError::new(
                ErrorCode::BadContentLength,
                "Content-Length is not ASCII",
            ))
        }
    };

    if content_length == Some(0) {
        return Ok(BodySpec {
            content_type: None,
            content_length,
            charset: UTF_8.to_string(),
            boundary: None,
        });
    }

    let raw_type = header_str(headers, &CONTENT_TYPE).map_err(|()| {
        HttpError::new(ErrorCode::BadContentType, "Content-Type is not ASCII")
    })?;

    let media_type = match raw_type {
        None if content_length.is_none() => {
            return Ok(BodySpec {
                content_type: None,
                content_length,
                charset: UTF_8.to_string(),
                boundary: None,
            });
        }
        None => MediaType {
            essence: DEFAULT_MEDIA_TYPE.to_string(),
            params: Vec::new(),
        },
        Some(raw) => parse_media_type(raw).ok_or_else(|| {
            HttpError::new(
                ErrorCode::BadContentType,
                format!("Content-Type `{raw}` is malformed"),
            )
        })?,
    };

    let charset = media_type
        .param("charset")
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| UTF_8.to_string());
    if !consumable_charsets.iter().any(|c| c.eq_ignore_ascii_case(&charset)) {
        return Err(HttpError::new(
            ErrorCode::UnsupportedCharset,
            format!("charset `{charset}` is not supported"),
        )
        .with_debug(serde_json::json!({ "supported": consumable_charsets })));
    }

    if !consumable_media_types.is_empty()
        && !consumable_media_types
            .iter()
            .any(|range| media_range_matches(range, &media_type.essence))
    {
        return Err(HttpError::new(
            ErrorCode::UnsupportedMediaType,
            format!("media type `{}` is not consumed here", media_type.essence),
        )
        .with_debug(serde_json::json!({ "consumable": consumable_media_types })));
    }

    Ok(BodySpec {
        boundary: media_type.param("boundary").map(str::to_string),
        content_type: Some(media_type.essence),
        content_length,
        charset,
    })
}

/// One weighted range of an `Accept*` header.
#[derive(Debug, Clone, PartialEq)]
struct WeightedRange {
    range: String,
    q: f32,
}

fn parse_weighted(raw: &str, media: bool) -> Vec<WeightedRange> {
    raw.split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let range = parts.next()?.trim().to_ascii_lowercase();
            if range.is_empty() || (media && !range.contains('/')) {
                return None;
            }
            let mut q = 1.0_f32;
            for param in parts {
                if let Some((key, value)) = param.split_once('=') {
                    if key.trim().eq_ignore_ascii_case("q") {
                        q = value.trim().parse().ok().filter(|q| (0.0..=1.0).contains(q))?;
                    }
                }
            }
            Some(WeightedRange { range, q })
        })
        .collect()
}

fn specificity(range: &str) -> u8 {
    if range == "*/*" || range == "*" {
        0
    } else if range.ends_with("/*") {
        1
    } else {
        2
    }
}

/// Order `available` by the weights `ranges` give them, dropping refused ones.
fn negotiate(
    available: &[String],
    ranges: &[WeightedRange],
    matches: impl Fn(&str, &str) -> bool,
) -> Vec<String> {
    let mut weighted: Vec<(f32, usize, &String)> = available
        .iter()
        .enumerate()
        .filter_map(|(index, candidate)| {
            ranges
                .iter()
                .filter(|r| matches(&r.range, candidate))
                .max_by_key(|r| specificity(&r.range))
                .filter(|r| r.q > 0.0)
                .map(|r| (r.q, index, candidate))
        })
        .collect();
    weighted.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    weighted.into_iter().map(|(_, _, c)| c.clone()).collect()
}

/// Negotiate the response media type and charset.
///
/// An empty `supported_media_types` means the operation produces no body and
/// nothing is negotiated.
///
/// # Errors
///
/// `E_UNACCEPTABLE_MEDIA_TYPE` or `E_UNACCEPTABLE_CHARSET` when the client
/// accepts none of the supported values.
pub fn extract_response_spec(
    operation: &Operation,
    headers: &HeaderMap,
    supported_media_types: &[String],
    supported_charsets: &[&str],
) -> Result<ResponseSpec, HttpError> {
    let accept = headers.get(ACCEPT).and_then(|v| v.to_str().ok());
    let accept_charset = headers.get(ACCEPT_CHARSET).and_then(|v| v.to_str().ok());

    let content_types = match accept {
        _ if supported_media_types.is_empty() => Vec::new(),
        None => supported_media_types.to_vec(),
        Some(raw) => {
            let ranges = parse_weighted(raw, true);
            negotiate(supported_media_types, &ranges, media_range_matches)
        }
    };
    if content_types.is_empty() && !supported_media_types.is_empty() {
        return Err(HttpError::new(
            ErrorCode::UnacceptableMediaType,
            format!(
                "none of the media types produced by {} is acceptable",
                operation.operation_id
            ),
        )
        .with_debug(serde_json::json!({
            "accept": accept,
            "produceable": supported_media_types,
        })));
    }

    let supported_charsets: Vec<String> =
        supported_charsets.iter().map(|c| c.to_string()).collect();
    let charsets = match accept_charset {
        None => supported_charsets.clone(),
        Some(raw) => {
            let ranges = parse_weighted(raw, false);
            negotiate(&supported_charsets, &ranges, |range, charset| {
                range == "*" || range.eq_ignore_ascii_case(charset)
            })
        }
    };
    if charsets.is_empty() {
        return Err(HttpError::new(
            ErrorCode::UnacceptableCharset,
            "none of the supported charsets is acceptable",
        )
        .with_debug(serde_json::json!({
            "accept_charset": accept_charset,
            "supported": supported_charsets,
        })));
    }

    Ok(ResponseSpec {
        content_types,
        charsets,
    })
}
