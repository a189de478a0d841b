use super::apm::{epoch_millis, Apm, ApmEvent, ApmEventKind, Clock, SystemClock, TracingApm};
use super::registry::{InFlight, RegistrationGuard, TransactionRegistry};
use crate::body::{EncodedBody, EncodedResponse};
use crate::errors::{ErrorCode, HttpError};
use crate::ids::TransactionId;
use crate::logging::Obfuscator;
use crate::router::Router;
use crate::runtime_config::RuntimeConfig;
use crate::service::{IncomingRequest, ResponseSink};
use anyhow::Context;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use may::coroutine;
use may::sync::mpsc;
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

const STREAM_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Created,
    Running,
    Completed,
    TimedOut,
    Errored,
}

/// Request facts kept for logging and APM once the request itself is gone.
#[derive(Debug, Clone)]
struct RequestSummary {
    method: Method,
    path: String,
    /// Resolved at creation; events without a router answer fall back to it.
    operation_id: Option<String>,
    started_at: SystemTime,
    headers: BTreeMap<String, String>,
}

/// One request between arrival and the last byte of its response.
///
/// Holds the registry entry of its ID; dropping the transaction, on any
/// path, deregisters it.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    summary: RequestSummary,
    request: Option<IncomingRequest>,
    state: TransactionState,
    _registration: RegistrationGuard,
}

impl Transaction {
    #[must_use]
    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    #[must_use]
    pub fn started_at(&self) -> SystemTime {
        self.summary.started_at
    }
}

/// A request refused before any handler ran.
#[derive(Debug)]
pub struct Rejection {
    /// Echoed on the error response: the supplied ID when it was well formed,
    /// a generated one otherwise.
    pub transaction_id: TransactionId,
    pub error: HttpError,
    summary: RequestSummary,
}

/// Creates, runs and finishes transactions.
///
/// `start` runs the router in a `may` coroutine and waits for it at most
/// `timeout`. A transaction that times out answers 504 right away; its
/// coroutine is not cancelled and whatever it produces later is dropped.
pub struct TransactionManager {
    router: Arc<Router>,
    registry: TransactionRegistry,
    apm: Arc<dyn Apm>,
    clock: Arc<dyn Clock>,
    obfuscator: Obfuscator,
    id_header: HeaderName,
    timeout: Duration,
    stack_size: usize,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("in_flight", &self.registry.len())
            .field("id_header", &self.id_header)
            .field("timeout", &self.timeout)
            .field("stack_size", &self.stack_size)
            .finish_non_exhaustive()
    }
}

impl TransactionManager {
    /// # Errors
    ///
    /// Fails when the configured transaction ID header is not a valid header name.
    pub fn new(router: Arc<Router>, config: &RuntimeConfig) -> anyhow::Result<Self> {
        let id_header = HeaderName::from_bytes(config.transaction_id_header.as_bytes())
            .with_context(|| {
                format!(
                    "invalid transaction ID header `{}`",
                    config.transaction_id_header
                )
            })?;
        Ok(Self {
            router,
            registry: TransactionRegistry::new(),
            apm: Arc::new(TracingApm),
            clock: Arc::new(SystemClock),
            obfuscator: Obfuscator::new(&config.obfuscated_headers),
            id_header,
            timeout: config.timeout(),
            stack_size: config.stack_size,
        })
    }

    #[must_use]
    pub fn with_apm(mut self, apm: Arc<dyn Apm>) -> Self {
        self.apm = apm;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share an existing registry, e.g. between several managers.
    #[must_use]
    pub fn with_registry(mut self, registry: TransactionRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    #[must_use]
    pub fn id_header(&self) -> &HeaderName {
        &self.id_header
    }

    /// Assign or validate the transaction ID and register it.
    ///
    /// # Errors
    ///
    /// `E_BAD_TRANSACTION_ID` for a malformed supplied ID and
    /// `E_TRANSACTION_ID_NOT_UNIQUE` when the ID is already in flight.
    pub fn create(&self, request: IncomingRequest) -> Result<Transaction, Box<Rejection>> {
        let operation_id = self
            .router
            .resolver()
            .resolve(&request.method, request.path())
            .operation()
            .map(|operation| operation.operation_id.clone());
        let summary = RequestSummary {
            method: request.method.clone(),
            path: request.path().to_string(),
            operation_id,
            started_at: self.clock.now(),
            headers: self.obfuscator.headers(&request.headers),
        };

        let id = match request.headers.get(&self.id_header) {
            None => TransactionId::generate(),
            Some(value) => {
                let parsed = value
                    .to_str()
                    .map_err(|_| {
                        HttpError::new(ErrorCode::BadTransactionId, "Transaction ID is not text")
                    })
                    .and_then(TransactionId::parse);
                match parsed {
                    Ok(id) => id,
                    Err(error) => {
                        return Err(Box::new(Rejection {
                            transaction_id: TransactionId::generate(),
                            error,
                            summary,
                        }))
                    }
                }
            }
        };

        let entry = InFlight {
            method: summary.method.clone(),
            path: summary.path.clone(),
            started_at: summary.started_at,
        };
        match self.registry.register(&id, entry) {
            Ok(registration) => {
                debug!(
                    transaction_id = %id,
                    method = %summary.method,
                    path = %summary.path,
                    "Transaction created"
                );
                Ok(Transaction {
                    id,
                    summary,
                    request: Some(request),
                    state: TransactionState::Created,
                    _registration: registration,
                })
            }
            Err(error) => {
                warn!(
                    transaction_id = %id,
                    method = %summary.method,
                    path = %summary.path,
                    "Duplicate transaction ID rejected"
                );
                Err(Box::new(Rejection {
                    transaction_id: id,
                    error,
                    summary,
                }))
            }
        }
    }

    /// Run the router for `transaction`, bounded by the timeout.
    ///
    /// # Errors
    ///
    /// `E_TRANSACTION_TIMEOUT` when the router does not answer in time,
    /// `E_NO_RESPONSE_PROMISE` when it could not be started or ended without
    /// an answer.
    #[allow(unsafe_code)]
    pub fn start(&self, transaction: &mut Transaction) -> Result<EncodedResponse, HttpError> {
        let Some(request) = transaction.request.take() else {
            transaction.state = TransactionState::Errored;
            return Err(HttpError::new(
                ErrorCode::NoResponsePromise,
                "transaction was already started",
            ));
        };
        transaction.state = TransactionState::Running;

        let (tx, rx) = mpsc::channel::<EncodedResponse>();
        let router = Arc::clone(&self.router);
        let transaction_id = transaction.id.clone();
        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
        // The closure owns everything it touches (Send + 'static) and reports
        // only through the channel; panics are caught before they reach the
        // scheduler.
        let spawned = unsafe {
            coroutine::Builder::new()
                .stack_size(self.stack_size)
                .spawn(move || {
                    let outcome = catch_unwind(AssertUnwindSafe(|| router.handle(request)));
                    match outcome {
                        Ok(response) => {
                            if tx.send(response).is_err() {
                                debug!(
                                    transaction_id = %transaction_id,
                                    "Response produced after the transaction ended"
                                );
                            }
                        }
                        Err(_) => error!(
                            transaction_id = %transaction_id,
                            "Router panicked outside the handler"
                        ),
                    }
                })
        };
        if let Err(e) = spawned {
            transaction.state = TransactionState::Errored;
            error!(
                transaction_id = %transaction.id,
                error = %e,
                stack_size = self.stack_size,
                "Failed to spawn transaction coroutine"
            );
            return Err(HttpError::new(
                ErrorCode::NoResponsePromise,
                "the request could not be scheduled",
            ));
        }

        match rx.recv_timeout(self.timeout) {
            Ok(response) => {
                transaction.state = TransactionState::Completed;
                Ok(response)
            }
            Err(RecvTimeoutError::Timeout) => {
                transaction.state = TransactionState::TimedOut;
                warn!(
                    transaction_id = %transaction.id,
                    timeout_ms = self.timeout.as_millis(),
                    "Transaction timed out"
                );
                Err(HttpError::new(
                    ErrorCode::TransactionTimeout,
                    format!(
                        "no response within {} ms",
                        self.timeout.as_millis()
                    ),
                ))
            }
            Err(RecvTimeoutError::Disconnected) => {
                transaction.state = TransactionState::Errored;
                Err(HttpError::new(
                    ErrorCode::NoResponsePromise,
                    "the request ended without a response",
                ))
            }
        }
    }

    /// Send `response`, emit the APM event and deregister.
    ///
    /// # Errors
    ///
    /// I/O errors of the sink. The transaction is deregistered regardless.
    pub fn end(
        &self,
        transaction: Transaction,
        response: EncodedResponse,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<()> {
        let Transaction { id, summary, .. } = &transaction;
        let written = self.write(id, summary, response, sink);
        drop(transaction);
        written
    }

    /// Send the error response for a failed transaction and deregister.
    ///
    /// # Errors
    ///
    /// I/O errors of the sink. The transaction is deregistered regardless.
    pub fn catch(
        &self,
        mut transaction: Transaction,
        error: HttpError,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<()> {
        if transaction.state != TransactionState::TimedOut {
            transaction.state = TransactionState::Errored;
        }
        let response = self.router.codec().encode_error(&error);
        self.end(transaction, response, sink)
    }

    /// Send the error response for a request refused by [`Self::create`].
    ///
    /// # Errors
    ///
    /// I/O errors of the sink.
    pub fn reject(&self, rejection: Rejection, sink: &mut dyn ResponseSink) -> io::Result<()> {
        let response = self.router.codec().encode_error(&rejection.error);
        self.write(&rejection.transaction_id, &rejection.summary, response, sink)
    }

    fn write(
        &self,
        id: &TransactionId,
        summary: &RequestSummary,
        response: EncodedResponse,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<()> {
        let EncodedResponse {
            status,
            mut headers,
            body,
            operation_id,
            error_code,
        } = response;
        self.stamp(&mut headers, id);
        // 1xx and 204 responses never carry Content-Length.
        if status >= 200 && status != 204 {
            if let EncodedBody::Bytes(bytes) = &body {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            } else if matches!(body, EncodedBody::Empty) {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(0u16));
            }
        }

        let reason = StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason());
        let written = sink
            .write_head(status, reason, &headers)
            .and_then(|()| write_body(body, sink))
            .and_then(|()| sink.end());

        let ended_at = self.clock.now();
        let duration = ended_at
            .duration_since(summary.started_at)
            .unwrap_or_default();
        let event = ApmEvent {
            kind: if error_code.is_some() {
                ApmEventKind::Error
            } else {
                ApmEventKind::Success
            },
            transaction_id: id.to_string(),
            operation_id: operation_id.or_else(|| summary.operation_id.clone()),
            method: summary.method.to_string(),
            path: summary.path.clone(),
            status,
            error_code,
            start_time: epoch_millis(summary.started_at),
            end_time: epoch_millis(ended_at),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            request_headers: summary.headers.clone(),
        };
        info!(
            transaction_id = %id,
            method = %summary.method,
            path = %summary.path,
            status,
            error_code = event.error_code.as_deref().unwrap_or("-"),
            duration_ms = event.duration_ms,
            "Transaction finished"
        );
        if let Err(e) = self.apm.emit(&event) {
            warn!(transaction_id = %id, error = %e, "APM emission failed");
        }
        if let Err(e) = &written {
            warn!(transaction_id = %id, error = %e, "Writing the response failed");
        }
        written
    }

    fn stamp(&self, headers: &mut HeaderMap, id: &TransactionId) {
        match HeaderValue::from_str(id.as_str()) {
            Ok(value) => {
                headers.insert(self.id_header.clone(), value);
            }
            Err(_) => {
                // Supplied IDs are visible ASCII and generated ones are ULIDs.
                error!(transaction_id = %id, "Transaction ID is not a valid header value");
            }
        }
    }
}

fn write_body(body: EncodedBody, sink: &mut dyn ResponseSink) -> io::Result<()> {
    match body {
        EncodedBody::Empty => Ok(()),
        EncodedBody::Bytes(bytes) => sink.write(&bytes),
        EncodedBody::Stream(mut reader) => {
            let mut chunk = vec![0u8; STREAM_CHUNK];
            loop {
                let read = reader.read(&mut chunk)?;
                if read == 0 {
                    return Ok(());
                }
                sink.write(&chunk[..read])?;
            }
        }
    }
}
