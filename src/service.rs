//! # Service entry point
//!
//! The boundary with the hosting HTTP server. A server hands every request
//! to [`AppService::call`] as an [`IncomingRequest`] together with a
//! [`ResponseSink`]; the service guarantees exactly one `write_head`, a
//! transaction ID header on every response and a charset-qualified
//! `Content-Type` whenever a body is sent.

use crate::handler::HandlerRegistry;
use crate::router::Router;
use crate::runtime_config::RuntimeConfig;
use crate::spec::ApiDocument;
use crate::transaction::TransactionManager;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::Arc;
use tracing::warn;

/// A request as received from the wire.
pub struct IncomingRequest {
    pub method: Method,
    /// Path and query string, e.g. `/pets?limit=10`.
    pub url: String,
    pub headers: HeaderMap,
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for IncomingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl IncomingRequest {
    /// Request without headers or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Box::new(io::empty()),
        }
    }

    /// Append a header; invalid names or values are logged and skipped.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid request header"),
        }
        self
    }

    /// Set a buffered body with its `Content-Type` and `Content-Length`.
    #[must_use]
    pub fn body(mut self, content_type: &str, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        self.headers
            .insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        self = self.header(CONTENT_TYPE.as_str(), content_type);
        self.body = Box::new(Cursor::new(bytes));
        self
    }

    /// JSON body, `application/json`.
    #[must_use]
    pub fn json(self, value: &serde_json::Value) -> Self {
        self.body("application/json", value.to_string())
    }

    /// Set a streamed body without touching the headers.
    #[must_use]
    pub fn stream(mut self, body: impl Read + Send + 'static) -> Self {
        self.body = Box::new(body);
        self
    }

    /// The path, without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.url.split_once('?').map_or(self.url.as_str(), |(p, _)| p)
    }
}

/// Where a response is written.
pub trait ResponseSink {
    /// # Errors
    ///
    /// Transport failures.
    fn write_head(&mut self, status: u16, reason: Option<&str>, headers: &HeaderMap)
        -> io::Result<()>;

    /// # Errors
    ///
    /// Transport failures.
    fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// # Errors
    ///
    /// Transport failures.
    fn end(&mut self) -> io::Result<()>;
}

/// Collects a response in memory.
#[derive(Debug, Default)]
pub struct BufferedSink {
    status: Option<u16>,
    reason: Option<String>,
    headers: HeaderMap,
    body: Vec<u8>,
    ended: bool,
}

impl BufferedSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body parsed as JSON.
    ///
    /// # Errors
    ///
    /// When the body is not JSON.
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.body)
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

impl ResponseSink for BufferedSink {
    fn write_head(
        &mut self,
        status: u16,
        reason: Option<&str>,
        headers: &HeaderMap,
    ) -> io::Result<()> {
        if self.status.is_some() {
            return Err(io::Error::other("response head already written"));
        }
        self.status = Some(status);
        self.reason = reason.map(str::to_string);
        self.headers = headers.clone();
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.status.is_none() || self.ended {
            return Err(io::Error::other("body written outside of the response"));
        }
        self.body.extend_from_slice(chunk);
        Ok(())
    }

    fn end(&mut self) -> io::Result<()> {
        if self.status.is_none() {
            return Err(io::Error::other("response ended before its head"));
        }
        self.ended = true;
        Ok(())
    }
}

/// Router plus transaction handling, ready to serve.
#[derive(Debug, Clone)]
pub struct AppService {
    manager: Arc<TransactionManager>,
}

impl AppService {
    pub fn new(manager: TransactionManager) -> Self {
        Self {
            manager: Arc::new(manager),
        }
    }

    /// Compile `document` against `handlers` and wrap it in a transaction manager.
    ///
    /// # Errors
    ///
    /// Every startup issue of [`Router::new`] and [`TransactionManager::new`].
    pub fn from_document(
        document: &ApiDocument,
        handlers: &HandlerRegistry,
        config: &RuntimeConfig,
    ) -> anyhow::Result<Self> {
        let router = Arc::new(Router::new(document, handlers, config)?);
        Ok(Self::new(TransactionManager::new(router, config)?))
    }

    #[must_use]
    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Serve one request.
    ///
    /// # Errors
    ///
    /// I/O errors of `sink`.
    pub fn call(&self, request: IncomingRequest, sink: &mut dyn ResponseSink) -> io::Result<()> {
        let manager = &self.manager;
        let mut transaction = match manager.create(request) {
            Ok(transaction) => transaction,
            Err(rejection) => return manager.reject(*rejection, sink),
        };
        match manager.start(&mut transaction) {
            Ok(response) => manager.end(transaction, response, sink),
            Err(error) => manager.catch(transaction, error, sink),
        }
    }
}
