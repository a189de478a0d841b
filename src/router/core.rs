//! Per-request pipeline.
//!
//! `RESOLVE → NEGOTIATE → VALIDATE_PARAMS → VALIDATE_BODY → INVOKE →
//! VALIDATE_RESPONSE_SHAPE → ENCODE`, stopping at the first failure. Every
//! failure is turned into an [`HttpError`] and encoded by the same
//! [`BodyCodec`] as successful responses.

use crate::body::{BodyCodec, EncodedBody, EncodedResponse, JSON};
use crate::errors::{ErrorCode, HttpError};
use crate::handler::{Handler, HandlerRegistry, Response, ResponseBody};
use crate::negotiation::{
    extract_body_spec, extract_consumable_media_types, extract_produceable_media_types,
    extract_response_spec, media_range_matches, ResponseSpec, DEFAULT_MEDIA_TYPE,
    SUPPORTED_CHARSETS, UTF_8,
};
use crate::parameters::{ParameterValidator, Parameters, RequestBodyValidator};
use crate::runtime_config::RuntimeConfig;
use crate::service::IncomingRequest;
use crate::spec::{deref_schema, ApiDocument, Operation};
use crate::validator::{ensure_no_issues, ValidationIssue};
use crate::validator_cache::SchemaValidatorRegistry;
use http::header::CONTENT_TYPE;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::resolver::{OperationResolver, Resolution};

/// Everything compiled at startup for one operation.
struct CompiledRoute {
    operation: Arc<Operation>,
    handler: Arc<dyn Handler>,
    parameters: ParameterValidator,
    body: RequestBodyValidator,
    consumable: Vec<String>,
    produceable: Vec<String>,
}

/// Routes requests to the handlers of a compiled API document.
pub struct Router {
    resolver: OperationResolver,
    routes: HashMap<String, CompiledRoute>,
    registry: Arc<SchemaValidatorRegistry>,
    codec: BodyCodec,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("resolver", &self.resolver)
            .field("operations", &self.routes.len())
            .field("codec", &self.codec)
            .finish()
    }
}

impl Router {
    /// Compile every operation of `document`.
    ///
    /// # Errors
    ///
    /// Fails with the full list of issues when routes collide, parameters
    /// or schemas are unsupported, or an operation has no handler.
    pub fn new(
        document: &ApiDocument,
        handlers: &HandlerRegistry,
        config: &RuntimeConfig,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(SchemaValidatorRegistry::new(
            config.schema_caching,
            document.components.clone(),
        ));
        let mut issues: Vec<ValidationIssue> = Vec::new();

        let resolver = match OperationResolver::new(&document.base_path, &document.operations) {
            Ok(resolver) => resolver,
            Err(found) => {
                issues.extend(found);
                OperationResolver::default()
            }
        };

        let mut routes = HashMap::with_capacity(document.operations.len());
        for operation in &document.operations {
            let handler = handlers.get(&operation.operation_id);
            if handler.is_none() {
                issues.push(ValidationIssue::new(
                    operation.location(),
                    "MissingHandler",
                    format!("no handler registered for `{}`", operation.operation_id),
                ));
            }
            let parameters = ParameterValidator::compile(operation, &registry)
                .map_err(|found| issues.extend(found))
                .ok();
            let body = RequestBodyValidator::compile(operation, &registry)
                .map_err(|found| issues.extend(found))
                .ok();
            if let (Some(handler), Some(parameters), Some(body)) = (handler, parameters, body) {
                routes.insert(
                    operation.operation_id.clone(),
                    CompiledRoute {
                        operation: Arc::clone(operation),
                        handler,
                        parameters,
                        body,
                        consumable: extract_consumable_media_types(operation),
                        produceable: extract_produceable_media_types(operation),
                    },
                );
            }
        }
        ensure_no_issues(issues)?;

        info!(
            title = %document.title,
            operations = routes.len(),
            schema_caching = ?registry.strategy(),
            cached_schemas = registry.size(),
            "Router ready"
        );
        Ok(Self {
            resolver,
            routes,
            registry,
            codec: BodyCodec::new(config.buffer_limit, config.debug),
        })
    }

    /// Replace the body codec, e.g. to register more parsers.
    #[must_use]
    pub fn with_codec(mut self, codec: BodyCodec) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn resolver(&self) -> &OperationResolver {
        &self.resolver
    }

    #[must_use]
    pub fn codec(&self) -> &BodyCodec {
        &self.codec
    }

    #[must_use]
    pub fn schema_registry(&self) -> &SchemaValidatorRegistry {
        &self.registry
    }

    /// Run one request through the pipeline.
    ///
    /// Never fails: errors come back as encoded error responses.
    pub fn handle(&self, request: IncomingRequest) -> EncodedResponse {
        let (path, query) = match request.url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (request.url.as_str(), None),
        };
        let (operation, path_params) = match self.resolver.resolve(&request.method, path) {
            Resolution::Found {
                operation,
                path_params,
            } => (operation, path_params),
            Resolution::NotFound => {
                let error = HttpError::new(
                    ErrorCode::NotFound,
                    format!("no operation for {} {path}", request.method),
                );
                return self.codec.encode_error(&error);
            }
        };
        let Some(route) = self.routes.get(&operation.operation_id) else {
            let error = HttpError::new(ErrorCode::Unexpected, "resolved operation is not compiled");
            return self.codec.encode_error(&error);
        };

        let query = query.map(str::to_string);
        let outcome = self
            .prepare(route, &path_params, query.as_deref(), request)
            .and_then(|(parameters, response_spec)| {
                let response = self.invoke(route, parameters)?;
                self.check_status(route, &response)?;
                self.encode(route, response, &response_spec)
            });

        match outcome {
            Ok(encoded) => encoded,
            Err(error) => {
                if error.is_server_error() {
                    error!(
                        operation_id = %route.operation.operation_id,
                        code = %error.code(),
                        message = %error.message(),
                        debug = ?error.debug_data(),
                        "Request failed"
                    );
                } else {
                    debug!(
                        operation_id = %route.operation.operation_id,
                        code = %error.code(),
                        message = %error.message(),
                        "Request rejected"
                    );
                }
                let mut encoded = self.codec.encode_error(&error);
                encoded.operation_id = Some(route.operation.operation_id.clone());
                encoded
            }
        }
    }

    /// NEGOTIATE, VALIDATE_PARAMS and VALIDATE_BODY.
    fn prepare(
        &self,
        route: &CompiledRoute,
        path_params: &[(Arc<str>, String)],
        query: Option<&str>,
        request: IncomingRequest,
    ) -> Result<(Parameters, ResponseSpec), HttpError> {
        let IncomingRequest { headers, body, .. } = request;
        let body_spec = extract_body_spec(&headers, &route.consumable, &SUPPORTED_CHARSETS)?;
        let response_spec = extract_response_spec(
            &route.operation,
            &headers,
            &route.produceable,
            &SUPPORTED_CHARSETS,
        )?;

        let values = route.parameters.extract(path_params, query, &headers)?;
        route.parameters.apply_validators(&values)?;

        let schema = body_spec.content_type.as_deref().and_then(|media_type| {
            route
                .operation
                .request_body
                .as_ref()?
                .content
                .iter()
                .find(|(range, _)| media_range_matches(range, media_type))
                .and_then(|(_, schema)| schema.as_deref())
        });
        let schema = schema.map(|s| deref_schema(s, self.registry.components()));
        let body = self.codec.decode(body, &body_spec, schema)?;
        route
            .body
            .validate(body.as_ref(), body_spec.content_type.as_deref())?;

        Ok((Parameters::new(values, body), response_spec))
    }

    /// INVOKE, with panics turned into `E_NO_RESPONSE`.
    fn invoke(&self, route: &CompiledRoute, parameters: Parameters) -> Result<Response, HttpError> {
        let operation_id = &route.operation.operation_id;
        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            route.handler.handle(parameters, &route.operation)
        }));
        match outcome {
            Ok(Ok(response)) => {
                debug!(
                    operation_id = %operation_id,
                    status = response.status,
                    duration_us = started.elapsed().as_micros(),
                    "Handler returned"
                );
                Ok(response)
            }
            Ok(Err(error)) => {
                debug!(
                    operation_id = %operation_id,
                    code = %error.code(),
                    duration_us = started.elapsed().as_micros(),
                    "Handler returned an error"
                );
                Err(error)
            }
            Err(panic) => {
                let panic_message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(
                    operation_id = %operation_id,
                    panic_message = %panic_message,
                    "Handler panicked"
                );
                Err(HttpError::new(
                    ErrorCode::NoResponse,
                    "the handler did not produce a response",
                ))
            }
        }
    }

    /// VALIDATE_RESPONSE_SHAPE.
    fn check_status(&self, route: &CompiledRoute, response: &Response) -> Result<(), HttpError> {
        let status = response.status;
        let operation = &route.operation;
        let violation = if status == 0 {
            Some(ErrorCode::NoResponseStatus)
        } else if !(100..=599).contains(&status) {
            Some(ErrorCode::NonNumericStatus)
        } else if !operation.responses.is_documented(status) {
            Some(ErrorCode::UndocumentedStatus)
        } else {
            None
        };
        match violation {
            None => Ok(()),
            Some(code) => {
                error!(
                    operation_id = %operation.operation_id,
                    status,
                    code = %code,
                    "Handler broke the response contract"
                );
                Err(HttpError::new(code, "the handler produced an invalid response")
                    .with_debug(serde_json::json!({ "status": status })))
            }
        }
    }

    /// ENCODE.
    fn encode(
        &self,
        route: &CompiledRoute,
        response: Response,
        response_spec: &ResponseSpec,
    ) -> Result<EncodedResponse, HttpError> {
        let Response {
            status,
            mut headers,
            body,
        } = response;
        let operation_id = Some(route.operation.operation_id.clone());
        let Some(body) = body else {
            headers.remove(CONTENT_TYPE);
            return Ok(EncodedResponse {
                status,
                headers,
                body: EncodedBody::Empty,
                operation_id,
                error_code: None,
            });
        };

        let documented = route.operation.responses.get(status);
        let media_type = choose_media_type(
            &headers,
            &body,
            documented.map(|d| &d.content),
            response_spec,
        );
        let charset = response_spec
            .charsets
            .first()
            .map_or(UTF_8, String::as_str);

        let original = documented
            .and_then(|d| d.content.get(&media_type))
            .and_then(Option::as_ref);
        let schema = original.map(|s| deref_schema(s, self.registry.components()));
        let validator = match original {
            Some(s) if self.codec.debug() => match self.registry.get(s) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(error = %e, "Response schema does not compile");
                    None
                }
            },
            _ => None,
        };

        let (body, content_type) =
            self.codec
                .encode(body, &media_type, charset, schema, validator.as_deref())?;
        headers.insert(CONTENT_TYPE, content_type);
        Ok(EncodedResponse {
            status,
            headers,
            body,
            operation_id,
            error_code: None,
        })
    }
}

/// Media type of a response body.
///
/// A `Content-Type` set by the handler wins; otherwise the client's best
/// choice documented for this status, then the first documented type, then
/// JSON for values and `application/octet-stream` for streams.
fn choose_media_type(
    headers: &http::HeaderMap,
    body: &ResponseBody,
    documented: Option<&std::collections::BTreeMap<String, Option<Arc<Value>>>>,
    response_spec: &ResponseSpec,
) -> String {
    if let Some(explicit) = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
    {
        return explicit;
    }
    if let Some(documented) = documented {
        if let Some(accepted) = response_spec
            .content_types
            .iter()
            .find(|t| documented.contains_key(*t))
        {
            return accepted.clone();
        }
        if let Some(first) = documented.keys().next() {
            return first.clone();
        }
    }
    match body {
        ResponseBody::Value(_) => JSON.to_string(),
        ResponseBody::Stream(_) => DEFAULT_MEDIA_TYPE.to_string(),
    }
}
