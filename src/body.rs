//! # Body Codec
//!
//! Decoding: bodies documented without a schema, or as
//! `{type: string, format: binary}`, are handed to the handler as the raw
//! stream. Everything else is buffered up to `buffer_limit` bytes, checked
//! against `Content-Length` and parsed by the parser registered for its media
//! type. The limit is enforced on the declared length before reading and on
//! the bytes actually read, never buffering more than `buffer_limit + 1`.
//!
//! Encoding: streamed response bodies pass through untouched; values go
//! through the stringifier of the negotiated media type. Every body is sent
//! with a charset-qualified `Content-Type`.
//!
//! Parsers and stringifiers for `application/json` (and any `+json` type) and
//! `text/plain` are registered by default.

use crate::errors::{ErrorCode, HttpError};
use crate::handler::ResponseBody;
use crate::negotiation::{BodySpec, UTF_8};
use crate::parameters::RequestBody;
use crate::validator_cache::CompiledSchema;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

pub type BodyParser = Arc<dyn Fn(&[u8]) -> Result<Value, String> + Send + Sync>;
pub type BodyStringifier = Arc<dyn Fn(&Value) -> Result<Vec<u8>, String> + Send + Sync>;

pub const JSON: &str = "application/json";
pub const TEXT: &str = "text/plain";

/// Encoded response body.
pub enum EncodedBody {
    Empty,
    Bytes(Vec<u8>),
    Stream(Box<dyn Read + Send>),
}

impl fmt::Debug for EncodedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodedBody::Empty => f.write_str("Empty"),
            EncodedBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            EncodedBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A response ready for the wire.
#[derive(Debug)]
pub struct EncodedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: EncodedBody,
    /// Operation that produced the response, when one was resolved.
    pub operation_id: Option<String>,
    /// Error code for error responses.
    pub error_code: Option<String>,
}

impl EncodedResponse {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error_code.is_some()
    }

    /// Buffered body bytes, `None` for empty and streamed bodies.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.body {
            EncodedBody::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Bodies with these schemas are streamed.
#[must_use]
pub fn is_streamable(schema: Option<&Value>) -> bool {
    match schema {
        None => true,
        Some(s) => {
            s.get("type").and_then(Value::as_str) == Some("string")
                && s.get("format").and_then(Value::as_str) == Some("binary")
        }
    }
}

fn content_type_header(media_type: &str, charset: &str) -> Result<HeaderValue, HttpError> {
    HeaderValue::from_str(&format!("{media_type}; charset={charset}")).map_err(|_| {
        HttpError::new(
            ErrorCode::Unexpected,
            format!("`{media_type}` cannot be used as a Content-Type"),
        )
    })
}

#[derive(Clone)]
pub struct BodyCodec {
    buffer_limit: usize,
    debug: bool,
    parsers: HashMap<String, BodyParser>,
    stringifiers: HashMap<String, BodyStringifier>,
}

impl fmt::Debug for BodyCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyCodec")
            .field("buffer_limit", &self.buffer_limit)
            .field("debug", &self.debug)
            .field("parsers", &self.parsers.keys().collect::<Vec<_>>())
            .field("stringifiers", &self.stringifiers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BodyCodec {
    /// Codec with the JSON and plain text parsers and stringifiers.
    pub fn new(buffer_limit: usize, debug: bool) -> Self {
        Self {
            buffer_limit,
            debug,
            parsers: HashMap::new(),
            stringifiers: HashMap::new(),
        }
        .with_parser(JSON, |bytes: &[u8]| {
            serde_json::from_slice(bytes).map_err(|e| e.to_string())
        })
        .with_parser(TEXT, |bytes: &[u8]| {
            std::str::from_utf8(bytes)
                .map(|s| Value::String(s.to_string()))
                .map_err(|e| e.to_string())
        })
        .with_stringifier(JSON, |value: &Value| {
            serde_json::to_vec(value).map_err(|e| e.to_string())
        })
        .with_stringifier(TEXT, |value: &Value| {
            Ok(match value {
                Value::String(s) => s.clone().into_bytes(),
                other => other.to_string().into_bytes(),
            })
        })
    }

    #[must_use]
    pub fn with_parser(
        mut self,
        media_type: &str,
        parser: impl Fn(&[u8]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.parsers
            .insert(media_type.to_ascii_lowercase(), Arc::new(parser));
        self
    }

    #[must_use]
    pub fn with_stringifier(
        mut self,
        media_type: &str,
        stringifier: impl Fn(&Value) -> Result<Vec<u8>, String> + Send + Sync + 'static,
    ) -> Self {
        self.stringifiers
            .insert(media_type.to_ascii_lowercase(), Arc::new(stringifier));
        self
    }

    #[must_use]
    pub fn buffer_limit(&self) -> usize {
        self.buffer_limit
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    fn lookup<'a, T>(table: &'a HashMap<String, T>, media_type: &str) -> Option<&'a T> {
        table.get(media_type).or_else(|| {
            media_type
                .ends_with("+json")
                .then(|| table.get(JSON))
                .flatten()
        })
    }

    /// Decode a request body.
    ///
    /// `schema` is the schema documented for the body's media type.
    ///
    /// # Errors
    ///
    /// `E_PARSER_LACK`, `E_REQUEST_CONTENT_TOO_LARGE`, `E_REQUEST_FAILURE`,
    /// `E_BAD_BODY_LENGTH` or `E_BAD_BODY`.
    pub fn decode(
        &self,
        body: Box<dyn Read + Send>,
        spec: &BodySpec,
        schema: Option<&Value>,
    ) -> Result<Option<RequestBody>, HttpError> {
        let Some(media_type) = spec.content_type.as_deref() else {
            return Ok(None);
        };
        if is_streamable(schema) {
            debug!(media_type = %media_type, "Streaming request body");
            return Ok(Some(RequestBody::Stream(body)));
        }

        let parser = Self::lookup(&self.parsers, media_type).ok_or_else(|| {
            HttpError::new(
                ErrorCode::ParserLack,
                format!("no parser for `{media_type}`"),
            )
        })?;

        let limit = self.buffer_limit;
        if let Some(declared) = spec.content_length {
            if declared > limit {
                return Err(too_large(limit));
            }
        }

        let mut buffer = Vec::with_capacity(spec.content_length.unwrap_or(0).min(limit));
        let limit_plus_one = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
        body.take(limit_plus_one)
            .read_to_end(&mut buffer)
            .map_err(|e| {
                HttpError::new(
                    ErrorCode::RequestFailure,
                    format!("reading the request body failed: {e}"),
                )
            })?;
        if buffer.len() > limit {
            return Err(too_large(limit));
        }
        if let Some(declared) = spec.content_length {
            if declared != buffer.len() {
                return Err(HttpError::new(
                    ErrorCode::BadBodyLength,
                    format!(
                        "received {} bytes but Content-Length is {declared}",
                        buffer.len()
                    ),
                ));
            }
        }

        let value = parser(&buffer).map_err(|e| {
            HttpError::new(ErrorCode::BadBody, format!("the `{media_type}` body is malformed"))
                .with_debug(serde_json::json!({ "parser": e }))
        })?;
        debug!(media_type = %media_type, bytes = buffer.len(), "Request body parsed");
        Ok(Some(RequestBody::Json(value)))
    }

    /// Encode a response body for the negotiated media type and charset.
    ///
    /// In debug mode values are validated against `validator` first; a
    /// failure is logged and the response still goes out.
    ///
    /// # Errors
    ///
    /// `E_STRINGIFYER_LACK` when no stringifier handles `media_type`.
    pub fn encode(
        &self,
        body: ResponseBody,
        media_type: &str,
        charset: &str,
        schema: Option<&Value>,
        validator: Option<&CompiledSchema>,
    ) -> Result<(EncodedBody, HeaderValue), HttpError> {
        if !charset.eq_ignore_ascii_case(UTF_8) {
            return Err(HttpError::new(
                ErrorCode::UnacceptableCharset,
                format!("cannot encode bodies as `{charset}`"),
            ));
        }
        let content_type = content_type_header(media_type, UTF_8)?;
        match body {
            ResponseBody::Stream(reader) => {
                if !is_streamable(schema) {
                    warn!(
                        media_type = %media_type,
                        "Handler returned a stream for a response documented with a schema"
                    );
                }
                Ok((EncodedBody::Stream(reader), content_type))
            }
            ResponseBody::Value(value) => {
                let stringifier = Self::lookup(&self.stringifiers, media_type).ok_or_else(|| {
                    HttpError::new(
                        ErrorCode::StringifyerLack,
                        format!("no stringifier for `{media_type}`"),
                    )
                })?;
                if self.debug {
                    if let Some(validator) = validator {
                        if let Err(errors) = validator.validate(&value) {
                            warn!(
                                media_type = %media_type,
                                errors = ?errors,
                                "Response body does not match its documented schema"
                            );
                        }
                    }
                }
                let bytes = stringifier(&value).map_err(|e| {
                    HttpError::new(
                        ErrorCode::Unexpected,
                        format!("serializing the response body failed: {e}"),
                    )
                })?;
                Ok((EncodedBody::Bytes(bytes), content_type))
            }
        }
    }

    /// JSON error body, with debug data in debug mode.
    #[must_use]
    pub fn encode_error(&self, error: &HttpError) -> EncodedResponse {
        let body = error.to_body(self.debug);
        let bytes = serde_json::to_vec(&body).unwrap_or_default();
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        let status = if (100..=599).contains(&error.status()) {
            error.status()
        } else {
            500
        };
        EncodedResponse {
            status,
            headers,
            body: EncodedBody::Bytes(bytes),
            operation_id: None,
            error_code: Some(error.code().to_string()),
        }
    }
}

fn too_large(limit: usize) -> HttpError {
    HttpError::new(
        ErrorCode::RequestContentTooLarge,
        format!("the request body exceeds {limit} bytes"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::DEFAULT_MEDIA_TYPE;
    use crate::validator_cache::{SchemaCaching, SchemaValidatorRegistry};
    use serde_json::json;
    use std::io::{self, Cursor};

    fn spec(media_type: &str, length: Option<usize>) -> BodySpec {
        BodySpec {
            content_type: Some(media_type.to_string()),
            content_length: length,
            charset: UTF_8.to_string(),
            boundary: None,
        }
    }

    fn reader(bytes: &[u8]) -> Box<dyn Read + Send> {
        Box::new(Cursor::new(bytes.to_vec()))
    }

    fn object_schema() -> Value {
        json!({"type": "object"})
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"))
        }
    }

    #[test]
    fn test_decode_json() {
        let codec = BodyCodec::new(1024, false);
        let body = br#"{"echo":"hi"}"#;
        let decoded = codec
            .decode(reader(body), &spec(JSON, Some(body.len())), Some(&object_schema()))
            .unwrap()
            .unwrap();
        assert_eq!(decoded.as_json(), Some(&json!({"echo": "hi"})));
    }

    #[test]
    fn test_no_body() {
        let codec = BodyCodec::new(1024, false);
        let none = BodySpec {
            content_type: None,
            content_length: Some(0),
            charset: UTF_8.to_string(),
            boundary: None,
        };
        assert!(codec.decode(reader(b""), &none, None).unwrap().is_none());
    }

    #[test]
    fn test_streams_without_schema_or_binary() {
        let codec = BodyCodec::new(4, false);
        let big = vec![b'x'; 64];
        let decoded = codec
            .decode(reader(&big), &spec(DEFAULT_MEDIA_TYPE, Some(64)), None)
            .unwrap();
        assert!(matches!(decoded, Some(RequestBody::Stream(_))));

        let binary = json!({"type": "string", "format": "binary"});
        let decoded = codec
            .decode(reader(&big), &spec(DEFAULT_MEDIA_TYPE, None), Some(&binary))
            .unwrap();
        assert!(matches!(decoded, Some(RequestBody::Stream(_))));
    }

    #[test]
    fn test_buffer_limit_boundary() {
        let codec = BodyCodec::new(8, false);
        let schema = json!({"type": "string"});
        let exact = b"\"123456\"";
        assert_eq!(exact.len(), 8);
        let decoded = codec
            .decode(reader(exact), &spec(JSON, Some(8)), Some(&schema))
            .unwrap()
            .unwrap();
        assert_eq!(decoded.as_json(), Some(&json!("123456")));

        let over = b"\"1234567\"";
        let err = codec
            .decode(reader(over), &spec(JSON, Some(9)), Some(&schema))
            .unwrap_err();
        assert!(err.is(ErrorCode::RequestContentTooLarge));

        // Chunked upload: no declared length, the cap still applies.
        let err = codec
            .decode(reader(over), &spec(JSON, None), Some(&schema))
            .unwrap_err();
        assert!(err.is(ErrorCode::RequestContentTooLarge));
    }

    #[test]
    fn test_length_mismatch_never_parses() {
        let codec = BodyCodec::new(1024, false);
        let err = codec
            .decode(reader(b"{}"), &spec(JSON, Some(5)), Some(&object_schema()))
            .unwrap_err();
        assert!(err.is(ErrorCode::BadBodyLength));
        // Malformed JSON with a mismatched length still reports the length.
        let err = codec
            .decode(reader(b"{nope"), &spec(JSON, Some(2)), Some(&object_schema()))
            .unwrap_err();
        assert!(err.is(ErrorCode::BadBodyLength));
    }

    #[test]
    fn test_decode_errors() {
        let codec = BodyCodec::new(1024, false);
        let err = codec
            .decode(reader(b"{nope"), &spec(JSON, Some(5)), Some(&object_schema()))
            .unwrap_err();
        assert!(err.is(ErrorCode::BadBody));
        assert_eq!(err.status(), 400);

        let err = codec
            .decode(reader(b"<a/>"), &spec("application/xml", Some(4)), Some(&object_schema()))
            .unwrap_err();
        assert!(err.is(ErrorCode::ParserLack));

        let err = codec
            .decode(Box::new(Broken), &spec(JSON, None), Some(&object_schema()))
            .unwrap_err();
        assert!(err.is(ErrorCode::RequestFailure));
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_custom_parser_and_json_suffix() {
        let codec = BodyCodec::new(1024, false)
            .with_parser("application/x-www-form-urlencoded", |bytes: &[u8]| {
                Ok(Value::Object(
                    url::form_urlencoded::parse(bytes)
                        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
                        .collect(),
                ))
            });
        let decoded = codec
            .decode(
                reader(b"a=1"),
                &spec("application/x-www-form-urlencoded", Some(3)),
                Some(&object_schema()),
            )
            .unwrap()
            .unwrap();
        assert_eq!(decoded.as_json(), Some(&json!({"a": "1"})));

        let decoded = codec
            .decode(
                reader(b"{}"),
                &spec("application/problem+json", Some(2)),
                Some(&object_schema()),
            )
            .unwrap()
            .unwrap();
        assert_eq!(decoded.as_json(), Some(&json!({})));
    }

    #[test]
    fn test_encode_value_and_stream() {
        let codec = BodyCodec::new(1024, true);
        let (body, content_type) = codec
            .encode(ResponseBody::Value(json!({"pong": "pong"})), JSON, UTF_8, None, None)
            .unwrap();
        assert_eq!(content_type, "application/json; charset=utf-8");
        assert!(matches!(body, EncodedBody::Bytes(ref b) if b.as_slice() == br#"{"pong":"pong"}"#));

        let (body, content_type) = codec
            .encode(ResponseBody::Value(json!("hi")), TEXT, UTF_8, None, None)
            .unwrap();
        assert_eq!(content_type, "text/plain; charset=utf-8");
        assert!(matches!(body, EncodedBody::Bytes(ref b) if b.as_slice() == b"hi"));

        let schema = object_schema();
        let (body, _) = codec
            .encode(
                ResponseBody::Stream(reader(b"raw")),
                "application/octet-stream",
                UTF_8,
                Some(&schema),
                None,
            )
            .unwrap();
        assert!(matches!(body, EncodedBody::Stream(_)));
    }

    #[test]
    fn test_encode_invalid_value_in_debug_still_sends() {
        let registry = SchemaValidatorRegistry::new(SchemaCaching::Optimistic, None);
        let validator = registry.get(&Arc::new(json!({"type": "object"}))).unwrap();
        let codec = BodyCodec::new(1024, true);
        let (body, _) = codec
            .encode(ResponseBody::Value(json!([1])), JSON, UTF_8, None, Some(validator.as_ref()))
            .unwrap();
        assert!(matches!(body, EncodedBody::Bytes(ref b) if b.as_slice() == b"[1]"));
    }

    #[test]
    fn test_encode_missing_stringifier() {
        let codec = BodyCodec::new(1024, false);
        let err = codec
            .encode(ResponseBody::Value(json!({})), "application/xml", UTF_8, None, None)
            .unwrap_err();
        assert!(err.is(ErrorCode::StringifyerLack));
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn test_encode_error() {
        let err = HttpError::new(ErrorCode::BadBody, "the body is malformed")
            .with_debug(json!({"parser": "eof"}));
        let encoded = BodyCodec::new(1024, false).encode_error(&err);
        assert_eq!(encoded.status, 400);
        assert_eq!(encoded.headers[CONTENT_TYPE], "application/json; charset=utf-8");
        let body: Value = serde_json::from_slice(encoded.bytes().unwrap()).unwrap();
        assert_eq!(body, json!({"error": "E_BAD_BODY", "error_description": "the body is malformed"}));

        let encoded = BodyCodec::new(1024, true).encode_error(&err);
        let body: Value = serde_json::from_slice(encoded.bytes().unwrap()).unwrap();
        assert_eq!(body["error_debug_data"]["parser"], "eof");
    }
}
