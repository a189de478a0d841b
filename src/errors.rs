//! # Error Taxonomy
//!
//! Every request-time failure in the pipeline is an [`HttpError`]: an HTTP
//! status, a stable machine-readable code (`E_*`) and a human message. The
//! codes raised by the core itself form the closed [`ErrorCode`] enum; handlers
//! raise their own business codes through [`HttpError::custom`].
//!
//! | Kind                        | Status | Examples                                      |
//! |-----------------------------|--------|-----------------------------------------------|
//! | Client request errors       | 400    | `E_BAD_BODY`, `E_BAD_PARAMETER`               |
//! | Routing                     | 404    | `E_NOT_FOUND`                                 |
//! | Negotiation failures        | 406    | `E_UNACCEPTABLE_MEDIA_TYPE`                   |
//! | Handler contract violations | 500    | `E_NO_RESPONSE`, `E_NON_NUMERIC_STATUS`       |
//! | Timeout                     | 504    | `E_TRANSACTION_TIMEOUT`                       |
//!
//! Configuration errors never show up here: they are collected as
//! [`crate::validator::ValidationIssue`]s and abort startup.

use serde_json::{json, Value};
use std::borrow::Cow;
use std::fmt;

/// Error codes raised by the transaction and routing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    BadContentType,
    BadContentLength,
    UnsupportedCharset,
    UnsupportedMediaType,
    RequestContentTooLarge,
    BadBodyLength,
    BadBody,
    RequestFailure,
    RequiredParameter,
    BadParameter,
    RequiredRequestBody,
    BadRequestBody,
    NoRequestBody,
    BadTransactionId,
    TransactionIdNotUnique,
    UnacceptableMediaType,
    UnacceptableCharset,
    ParserLack,
    StringifyerLack,
    NoResponsePromise,
    NoResponse,
    NoResponseStatus,
    NonNumericStatus,
    UndocumentedStatus,
    TransactionTimeout,
    Unexpected,
}

impl ErrorCode {
    /// The wire representation sent in the `error` field of error bodies.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "E_NOT_FOUND",
            ErrorCode::BadContentType => "E_BAD_CONTENT_TYPE",
            ErrorCode::BadContentLength => "E_BAD_CONTENT_LENGTH",
            ErrorCode::UnsupportedCharset => "E_UNSUPPORTED_CHARSET",
            ErrorCode::UnsupportedMediaType => "E_UNSUPPORTED_MEDIA_TYPE",
            ErrorCode::RequestContentTooLarge => "E_REQUEST_CONTENT_TOO_LARGE",
            ErrorCode::BadBodyLength => "E_BAD_BODY_LENGTH",
            ErrorCode::BadBody => "E_BAD_BODY",
            ErrorCode::RequestFailure => "E_REQUEST_FAILURE",
            ErrorCode::RequiredParameter => "E_REQUIRED_PARAMETER",
            ErrorCode::BadParameter => "E_BAD_PARAMETER",
            ErrorCode::RequiredRequestBody => "E_REQUIRED_REQUEST_BODY",
            ErrorCode::BadRequestBody => "E_BAD_REQUEST_BODY",
            ErrorCode::NoRequestBody => "E_NO_REQUEST_BODY",
            ErrorCode::BadTransactionId => "E_BAD_TRANSACTION_ID",
            ErrorCode::TransactionIdNotUnique => "E_TRANSACTION_ID_NOT_UNIQUE",
            ErrorCode::UnacceptableMediaType => "E_UNACCEPTABLE_MEDIA_TYPE",
            ErrorCode::UnacceptableCharset => "E_UNACCEPTABLE_CHARSET",
            ErrorCode::ParserLack => "E_PARSER_LACK",
            ErrorCode::StringifyerLack => "E_STRINGIFYER_LACK",
            ErrorCode::NoResponsePromise => "E_NO_RESPONSE_PROMISE",
            ErrorCode::NoResponse => "E_NO_RESPONSE",
            ErrorCode::NoResponseStatus => "E_NO_RESPONSE_STATUS",
            ErrorCode::NonNumericStatus => "E_NON_NUMERIC_STATUS",
            ErrorCode::UndocumentedStatus => "E_UNDOCUMENTED_STATUS",
            ErrorCode::TransactionTimeout => "E_TRANSACTION_TIMEOUT",
            ErrorCode::Unexpected => "E_UNEXPECTED",
        }
    }

    /// HTTP status associated with the code.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            ErrorCode::NotFound => 404,
            ErrorCode::UnsupportedCharset
            | ErrorCode::UnsupportedMediaType
            | ErrorCode::UnacceptableMediaType
            | ErrorCode::UnacceptableCharset => 406,
            ErrorCode::ParserLack
            | ErrorCode::StringifyerLack
            | ErrorCode::NoResponsePromise
            | ErrorCode::NoResponse
            | ErrorCode::NoResponseStatus
            | ErrorCode::NonNumericStatus
            | ErrorCode::UndocumentedStatus
            | ErrorCode::Unexpected => 500,
            ErrorCode::TransactionTimeout => 504,
            _ => 400,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure that ends up as an HTTP error response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpError {
    status: u16,
    code: Cow<'static, str>,
    message: String,
    debug: Option<Value>,
}

impl HttpError {
    /// Create an error for one of the pipeline's own codes.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status(),
            code: Cow::Borrowed(code.as_str()),
            message: message.into(),
            debug: None,
        }
    }

    /// Create a business error raised by a handler, e.g.
    /// `HttpError::custom(400, "E_MUST_NOT_BE_NAMED", "...")`.
    pub fn custom(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: Cow::Owned(code.into()),
            message: message.into(),
            debug: None,
        }
    }

    /// Attach diagnostics. They are only sent to clients in debug mode.
    #[must_use]
    pub fn with_debug(mut self, debug: Value) -> Self {
        self.debug = Some(debug);
        self
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn debug_data(&self) -> Option<&Value> {
        self.debug.as_ref()
    }

    /// Whether the error carries the given pipeline code.
    #[must_use]
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.as_str()
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// JSON error body. Server errors get a generic description so handler
    /// internals never leak to clients unless `debug` is on.
    #[must_use]
    pub fn to_body(&self, debug: bool) -> Value {
        let description = if self.is_server_error() && !debug {
            "An unexpected error occurred.".to_string()
        } else {
            self.message.clone()
        };
        let mut body = json!({
            "error": self.code,
            "error_description": description,
        });
        if debug {
            if let (Some(data), Value::Object(map)) = (&self.debug, &mut body) {
                map.insert("error_debug_data".to_string(), data.clone());
            }
        }
        body
    }
}

impl From<ErrorCode> for HttpError {
    fn from(code: ErrorCode) -> Self {
        HttpError::new(code, code.as_str())
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status, self.message)
    }
}

impl std::error::Error for HttpError {}
