//! # gatehouse
//!
//! **gatehouse** turns an [OpenAPI 3](https://spec.openapis.org/oas/v3.1.0)
//! document and a set of handler functions into a validated HTTP
//! request/response pipeline running on the `may` coroutine runtime.
//!
//! ## Overview
//!
//! Handlers only ever see input that matched the document: the path was
//! resolved to an operation, the body and `Accept*` headers were negotiated,
//! every parameter and the body were checked against their compiled JSON
//! Schemas. Whatever the handler returns is checked against the documented
//! responses and encoded with a charset-qualified `Content-Type`.
//!
//! Every request runs inside a transaction that owns a unique ID, a slot
//! in the in-flight registry, a deadline and an APM event.
//!
//! ## Architecture
//!
//! - **[`spec`]** - Loads the document (YAML or JSON) into immutable [`Operation`]s
//! - **[`router`]** - [`OperationResolver`] and the per-request [`Router`] pipeline
//! - **[`negotiation`]** - `Content-Type`, `Accept` and `Accept-Charset` handling
//! - **[`parameters`]** - Parameter extraction, coercion and validation
//! - **[`body`]** - Request body buffering/streaming and response encoding
//! - **[`validator_cache`]** - Compiled JSON Schema cache with selectable keying
//! - **[`handler`]** / **[`typed`]** - Handler contract, registry and typed adapter
//! - **[`transaction`]** - Transaction IDs, in-flight registry, timeout and APM
//! - **[`service`]** - [`AppService`], the entry point for a hosting HTTP server
//!
//! ```text
//! IncomingRequest
//!   └─ TransactionManager::create   (ID, registry)
//!       └─ TransactionManager::start (coroutine + timeout)
//!           └─ Router::handle: resolve → negotiate → validate → invoke → encode
//!       └─ TransactionManager::end / catch (ResponseSink, APM, deregister)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gatehouse::{
//!     load_spec, AppService, BufferedSink, HandlerRegistry, HandlerResult, IncomingRequest,
//!     Operation, Parameters, Response, RuntimeConfig,
//! };
//! use serde_json::json;
//!
//! let document = load_spec("openapi.yaml")?;
//! let handlers = HandlerRegistry::new()
//!     .with("getPing", |_: Parameters, _: &Operation| -> HandlerResult {
//!         Ok(Response::json(200, json!({"pong": "pong"})))
//!     });
//! let service = AppService::from_document(&document, &handlers, &RuntimeConfig::from_env())?;
//!
//! let mut sink = BufferedSink::new();
//! service.call(IncomingRequest::new(http::Method::GET, "/ping"), &mut sink)?;
//! assert_eq!(sink.status(), Some(200));
//! ```
//!
//! ## Configuration
//!
//! [`RuntimeConfig`] is read from `GATEHOUSE_*` environment variables or a
//! YAML file; logging is set up with [`logging::init_logging`].

pub mod body;
pub mod errors;
pub mod handler;
pub mod ids;
pub mod logging;
pub mod negotiation;
pub mod parameters;
pub mod router;
pub mod runtime_config;
pub mod service;
pub mod spec;
pub mod transaction;
pub mod typed;
pub mod validator;
pub mod validator_cache;

pub use errors::{ErrorCode, HttpError};
pub use handler::{Handler, HandlerRegistry, HandlerResult, Response, ResponseBody};
pub use ids::TransactionId;
pub use parameters::{Parameters, RequestBody};
pub use router::{OperationResolver, Resolution, Router};
pub use runtime_config::RuntimeConfig;
pub use service::{AppService, BufferedSink, IncomingRequest, ResponseSink};
pub use spec::{load_spec, load_spec_str, ApiDocument, Operation, SpecFormat};
pub use transaction::{Apm, ApmEvent, Clock, TransactionManager, TransactionRegistry};
pub use typed::{TypedHandler, TypedRequest, TypedResponse};
pub use validator_cache::{SchemaCaching, SchemaValidatorRegistry};
