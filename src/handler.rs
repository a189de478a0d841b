//! Handler contract and registry.
//!
//! A handler is a synchronous function of the validated [`Parameters`] and
//! the resolved [`Operation`]. It runs inside the transaction coroutine, so
//! blocking I/O yields to the `may` scheduler when done with `may` primitives.

use crate::errors::HttpError;
use crate::parameters::Parameters;
use crate::spec::Operation;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

/// Body returned by a handler.
pub enum ResponseBody {
    /// Serialized with the stringifier of the negotiated media type.
    Value(Value),
    /// Sent untouched.
    Stream(Box<dyn Read + Send>),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Value(v) => f.debug_tuple("Value").field(v).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Response produced by a handler.
#[derive(Debug)]
pub struct Response {
    /// `0` means unset and is a handler contract violation.
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Option<ResponseBody>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn json(status: u16, body: Value) -> Self {
        Self {
            body: Some(ResponseBody::Value(body)),
            ..Self::new(status)
        }
    }

    pub fn stream(status: u16, body: impl Read + Send + 'static) -> Self {
        Self {
            body: Some(ResponseBody::Stream(Box::new(body))),
            ..Self::new(status)
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

pub type HandlerResult = Result<Response, HttpError>;

/// Business logic bound to one operation.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, parameters: Parameters, operation: &Operation) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(Parameters, &Operation) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, parameters: Parameters, operation: &Operation) -> HandlerResult {
        self(parameters, operation)
    }
}

/// Lookup from `operationId` to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.handlers.keys().collect();
        ids.sort();
        f.debug_struct("HandlerRegistry").field("operations", &ids).finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same operation.
    pub fn register(&mut self, operation_id: impl Into<String>, handler: impl Handler) -> &mut Self {
        self.handlers.insert(operation_id.into(), Arc::new(handler));
        self
    }

    #[must_use]
    pub fn with(mut self, operation_id: impl Into<String>, handler: impl Handler) -> Self {
        self.register(operation_id, handler);
        self
    }

    #[must_use]
    pub fn get(&self, operation_id: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(operation_id).map(Arc::clone)
    }

    #[must_use]
    pub fn contains(&self, operation_id: &str) -> bool {
        self.handlers.contains_key(operation_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
