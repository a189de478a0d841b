//! # Parameters
//!
//! [`ParameterValidator`] is compiled once per operation at startup. At
//! request time it collects raw path, query and header values, coerces them
//! to their schema types and validates them. The result is a [`Parameters`]
//! bag keyed by camel-cased parameter name (`X-API-Key` → `xApiKey`), handed
//! to the handler together with the decoded body.
//!
//! Only `simple` serialization is supported (`form`, its equivalent default,
//! is accepted on query parameters): arrays are comma-separated, and query
//! arrays may also repeat their key. Cookie parameters and `content`-based
//! parameters are rejected at compile time.

use crate::errors::{ErrorCode, HttpError};
use crate::negotiation::media_range_matches;
use crate::spec::{deref_schema, Operation, ParameterLocation, ParameterMeta};
use crate::validator::ValidationIssue;
use crate::validator_cache::{CompiledSchema, SchemaValidatorRegistry};
use http::{HeaderMap, HeaderName};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Read;
use std::sync::Arc;

pub const UNSUPPORTED_PARAMETER_DEFINITION: &str = "E_UNSUPPORTED_PARAMETER_DEFINITION";

/// A decoded request body.
pub enum RequestBody {
    /// Buffered, parsed and validated payload.
    Json(Value),
    /// Raw stream for bodies documented without a schema or as binary.
    Stream(Box<dyn Read + Send>),
}

impl RequestBody {
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            RequestBody::Json(v) => Some(v),
            RequestBody::Stream(_) => None,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Json(v) => f.debug_tuple("Json").field(v).finish(),
            RequestBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Validated request parameters plus the decoded body.
#[derive(Debug, Default)]
pub struct Parameters {
    values: BTreeMap<String, Value>,
    body: Option<RequestBody>,
}

impl Parameters {
    pub fn new(values: BTreeMap<String, Value>, body: Option<RequestBody>) -> Self {
        Self { values, body }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// # Errors
    ///
    /// `E_REQUIRED_PARAMETER` when the value is missing.
    pub fn require(&self, key: &str) -> Result<&Value, HttpError> {
        self.get(key).ok_or_else(|| {
            HttpError::new(
                ErrorCode::RequiredParameter,
                format!("parameter `{key}` is required"),
            )
        })
    }

    /// Add a value, e.g. from a wrapper adding `authenticated`.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    #[must_use]
    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn take_body(&mut self) -> Option<RequestBody> {
        self.body.take()
    }

    /// Deserialize the parameters into a typed record. A JSON body is exposed
    /// under the `body` key.
    ///
    /// # Errors
    ///
    /// `E_UNEXPECTED` when the record does not match the validated values.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        let mut object: Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(RequestBody::Json(body)) = &self.body {
            object.insert("body".to_string(), body.clone());
        }
        serde_json::from_value(Value::Object(object)).map_err(|e| {
            HttpError::new(
                ErrorCode::Unexpected,
                format!("parameters do not fit the handler input: {e}"),
            )
        })
    }
}

/// Camel-case a parameter name: words split on non-alphanumerics, on
/// lower→upper transitions and before the last capital of an acronym.
///
/// ```
/// use gatehouse::parameters::camel_case;
/// assert_eq!(camel_case("X-API-Key"), "xApiKey");
/// assert_eq!(camel_case("pet_id"), "petId");
/// ```
pub fn camel_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_numeric() || (prev.is_uppercase() && next_is_lower)
            {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    let mut out = String::with_capacity(name.len());
    for (i, word) in words.iter().enumerate() {
        let lower = word.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
            continue;
        }
        let mut letters = lower.chars();
        if let Some(first) = letters.next() {
            out.extend(first.to_uppercase());
            out.push_str(letters.as_str());
        }
    }
    out
}

fn schema_type<'a>(schema: &'a Value) -> Option<&'a str> {
    match schema.get("type") {
        Some(Value::String(t)) => Some(t.as_str()),
        // OpenAPI 3.1 `type: [integer, "null"]`
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).find(|t| *t != "null"),
        _ => None,
    }
}

fn convert_primitive(val: &str, schema: Option<&Value>) -> Value {
    match schema.and_then(schema_type) {
        Some("integer") => val
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(val.to_string())),
        Some("number") => val
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(val.to_string())),
        Some("boolean") => val
            .parse::<bool>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(val.to_string())),
        _ => Value::String(val.to_string()),
    }
}

#[derive(Debug)]
struct CompiledParameter {
    name: String,
    key: String,
    location: ParameterLocation,
    required: bool,
    header: Option<HeaderName>,
    /// Dereferenced schema, used for coercion.
    schema: Option<Value>,
    /// Dereferenced `items` schema of array parameters.
    items: Option<Value>,
    validator: Option<Arc<CompiledSchema>>,
}

impl CompiledParameter {
    fn is_array(&self) -> bool {
        self.schema.as_ref().and_then(schema_type) == Some("array")
    }

    /// Coerce raw occurrences to the schema type. Unconvertible values stay
    /// strings so that validation reports them.
    fn coerce(&self, raw: &[String]) -> Value {
        if self.is_array() {
            let parts = raw
                .iter()
                .flat_map(|occurrence| occurrence.split(','))
                .filter(|s| !s.is_empty())
                .map(|p| convert_primitive(p.trim(), self.items.as_ref()))
                .collect();
            return Value::Array(parts);
        }
        let joined = raw.join(",");
        match self.schema.as_ref().and_then(schema_type) {
            Some("object") => serde_json::from_str(&joined).unwrap_or(Value::String(joined)),
            _ => convert_primitive(&joined, self.schema.as_ref()),
        }
    }

    fn bad(&self, message: impl Into<String>) -> HttpError {
        HttpError::new(ErrorCode::BadParameter, message).with_debug(json!({
            "parameter": self.name,
            "in": self.location.to_string(),
        }))
    }
}

/// Compiled parameter validators of one operation.
#[derive(Debug)]
pub struct ParameterValidator {
    parameters: Vec<CompiledParameter>,
}

impl ParameterValidator {
    /// Compile the validators of every parameter of `operation`.
    ///
    /// # Errors
    ///
    /// Returns every unsupported parameter shape, camel-case collision and
    /// schema that does not compile.
    pub fn compile(
        operation: &Operation,
        registry: &SchemaValidatorRegistry,
    ) -> Result<Self, Vec<ValidationIssue>> {
        let location = operation.location();
        let components = registry.components();
        let mut issues = Vec::new();
        let mut parameters: Vec<CompiledParameter> = Vec::new();

        for meta in &operation.parameters {
            if let Some(issue) = unsupported_shape(meta, &location) {
                issues.push(issue);
                continue;
            }
            let key = camel_case(&meta.name);
            if let Some(other) = parameters.iter().find(|p| p.key == key) {
                issues.push(ValidationIssue::new(
                    &location,
                    "DuplicateParameter",
                    format!(
                        "parameters `{}` and `{}` both map to `{key}`",
                        other.name, meta.name
                    ),
                ));
                continue;
            }
            let header = if meta.location == ParameterLocation::Header {
                match HeaderName::from_bytes(meta.name.to_ascii_lowercase().as_bytes()) {
                    Ok(h) => Some(h),
                    Err(_) => {
                        issues.push(ValidationIssue::new(
                            &location,
                            UNSUPPORTED_PARAMETER_DEFINITION,
                            format!("`{}` is not a valid header name", meta.name),
                        ));
                        continue;
                    }
                }
            } else {
                None
            };
            let validator = match &meta.schema {
                Some(schema) => match registry.get(schema) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        issues.push(ValidationIssue::new(
                            &location,
                            "BadSchema",
                            format!("parameter `{}`: {e}", meta.name),
                        ));
                        continue;
                    }
                },
                None => None,
            };
            let schema = meta
                .schema
                .as_deref()
                .map(|s| deref_schema(s, components).clone());
            let items = schema
                .as_ref()
                .and_then(|s| s.get("items"))
                .map(|i| deref_schema(i, components).clone());

            parameters.push(CompiledParameter {
                name: meta.name.clone(),
                key,
                location: meta.location,
                required: meta.required,
                header,
                schema,
                items,
                validator,
            });
        }

        if issues.is_empty() {
            Ok(Self { parameters })
        } else {
            Err(issues)
        }
    }

    /// Collect and coerce raw values. `path_params` are the resolver captures
    /// (still percent-encoded), `query` the raw query string.
    ///
    /// # Errors
    ///
    /// `E_BAD_PARAMETER` for invalid percent-encoding, non-UTF-8 headers and
    /// repeated non-array query keys.
    pub fn extract(
        &self,
        path_params: &[(Arc<str>, String)],
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<BTreeMap<String, Value>, HttpError> {
        let mut query_values: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(q) = query {
            for (k, v) in url::form_urlencoded::parse(q.as_bytes()) {
                query_values.entry(k.into_owned()).or_default().push(v.into_owned());
            }
        }

        let mut values = BTreeMap::new();
        for param in &self.parameters {
            let raw: Vec<String> = match param.location {
                ParameterLocation::Path => {
                    match path_params.iter().rfind(|(name, _)| name.as_ref() == param.name) {
                        Some((_, encoded)) => {
                            let decoded = urlencoding::decode(encoded).map_err(|_| {
                                param.bad(format!(
                                    "path parameter `{}` is not valid percent-encoded UTF-8",
                                    param.name
                                ))
                            })?;
                            vec![decoded.into_owned()]
                        }
                        None => Vec::new(),
                    }
                }
                ParameterLocation::Query => {
                    let occurrences = query_values.remove(&param.name).unwrap_or_default();
                    if occurrences.len() > 1 && !param.is_array() {
                        return Err(param.bad(format!(
                            "query parameter `{}` is repeated but is not an array",
                            param.name
                        )));
                    }
                    occurrences
                }
                ParameterLocation::Header => match &param.header {
                    Some(name) => headers
                        .get_all(name)
                        .iter()
                        .map(|v| {
                            v.to_str().map(str::to_string).map_err(|_| {
                                param.bad(format!("header `{}` is not valid text", param.name))
                            })
                        })
                        .collect::<Result<_, _>>()?,
                    None => Vec::new(),
                },
                // Rejected at compile time.
                ParameterLocation::Cookie => Vec::new(),
            };
            if !raw.is_empty() {
                values.insert(param.key.clone(), param.coerce(&raw));
            }
        }
        Ok(values)
    }

    /// Check required parameters are present and every value matches its schema.
    ///
    /// # Errors
    ///
    /// `E_REQUIRED_PARAMETER` or `E_BAD_PARAMETER` (with the schema errors as
    /// debug data).
    pub fn apply_validators(&self, values: &BTreeMap<String, Value>) -> Result<(), HttpError> {
        for param in &self.parameters {
            let Some(value) = values.get(&param.key) else {
                if param.required {
                    return Err(HttpError::new(
                        ErrorCode::RequiredParameter,
                        format!("{} parameter `{}` is required", param.location, param.name),
                    )
                    .with_debug(json!({ "parameter": param.name, "in": param.location.to_string() })));
                }
                continue;
            };
            if let Some(validator) = &param.validator {
                if let Err(errors) = validator.validate(value) {
                    return Err(HttpError::new(
                        ErrorCode::BadParameter,
                        format!("{} parameter `{}` is invalid", param.location, param.name),
                    )
                    .with_debug(json!({
                        "parameter": param.name,
                        "in": param.location.to_string(),
                        "value": value,
                        "errors": errors,
                    })));
                }
            }
        }
        Ok(())
    }

    /// Camel-cased keys of the compiled parameters.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.key.as_str())
    }
}

fn unsupported_shape(meta: &ParameterMeta, location: &str) -> Option<ValidationIssue> {
    let reason = if meta.location == ParameterLocation::Cookie {
        Some(format!("cookie parameter `{}` is not supported", meta.name))
    } else if meta.has_content {
        Some(format!("parameter `{}` uses `content` instead of `schema`", meta.name))
    } else {
        match meta.style.as_deref() {
            None | Some("simple") => None,
            Some("form") if meta.location == ParameterLocation::Query => None,
            Some(style) => Some(format!(
                "parameter `{}` uses the unsupported `{style}` style",
                meta.name
            )),
        }
    };
    reason.map(|r| ValidationIssue::new(location, UNSUPPORTED_PARAMETER_DEFINITION, r))
}

/// Compiled request body rules of one operation.
#[derive(Debug)]
pub struct RequestBodyValidator {
    declared: bool,
    required: bool,
    validators: Vec<(String, Option<Arc<CompiledSchema>>)>,
}

impl RequestBodyValidator {
    /// # Errors
    ///
    /// Returns an issue for every body schema that does not compile.
    pub fn compile(
        operation: &Operation,
        registry: &SchemaValidatorRegistry,
    ) -> Result<Self, Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        let mut validators = Vec::new();
        let (declared, required) = match &operation.request_body {
            Some(body) => {
                for (media_type, schema) in &body.content {
                    let validator = match schema {
                        Some(s) => match registry.get(s) {
                            Ok(v) => Some(v),
                            Err(e) => {
                                issues.push(ValidationIssue::new(
                                    operation.location(),
                                    "BadSchema",
                                    format!("request body `{media_type}`: {e}"),
                                ));
                                continue;
                            }
                        },
                        None => None,
                    };
                    validators.push((media_type.clone(), validator));
                }
                (!body.content.is_empty(), body.required)
            }
            None => (false, false),
        };
        if issues.is_empty() {
            Ok(Self {
                declared,
                required,
                validators,
            })
        } else {
            Err(issues)
        }
    }

    /// Validate the decoded body against the schema of its media type.
    ///
    /// # Errors
    ///
    /// `E_NO_REQUEST_BODY` for a body the operation does not consume,
    /// `E_REQUIRED_REQUEST_BODY` for a missing required body and
    /// `E_BAD_REQUEST_BODY` for a schema violation.
    pub fn validate(
        &self,
        body: Option<&RequestBody>,
        media_type: Option<&str>,
    ) -> Result<(), HttpError> {
        let Some(body) = body else {
            if self.required {
                return Err(HttpError::new(
                    ErrorCode::RequiredRequestBody,
                    "a request body is required",
                ));
            }
            return Ok(());
        };
        if !self.declared {
            return Err(HttpError::new(
                ErrorCode::NoRequestBody,
                "this operation does not take a request body",
            ));
        }
        let (RequestBody::Json(value), Some(media_type)) = (body, media_type) else {
            return Ok(());
        };
        let validator = self
            .validators
            .iter()
            .find(|(range, _)| media_range_matches(range, media_type))
            .and_then(|(_, v)| v.as_ref());
        if let Some(validator) = validator {
            if let Err(errors) = validator.validate(value) {
                return Err(HttpError::new(
                    ErrorCode::BadRequestBody,
                    "the request body does not match its schema",
                )
                .with_debug(json!({ "media_type": media_type, "errors": errors })));
            }
        }
        Ok(())
    }

    /// Whether the operation documents a request body with content.
    #[must_use]
    pub fn is_declared(&self) -> bool {
        self.declared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{RequestBodyMeta, Responses};
    use crate::validator_cache::SchemaCaching;
    use http::{HeaderValue, Method};
    use serde::Deserialize;

    fn param(name: &str, location: ParameterLocation, required: bool, schema: Value) -> ParameterMeta {
        ParameterMeta {
            name: name.to_string(),
            location,
            required,
            schema: Some(Arc::new(schema)),
            style: None,
            has_content: false,
        }
    }

    fn operation(parameters: Vec<ParameterMeta>) -> Operation {
        Operation {
            operation_id: "getPet".into(),
            method: Method::GET,
            path_pattern: "/pets/{petId}".into(),
            parameters,
            request_body: None,
            responses: Responses::default(),
            security: vec![],
            summary: None,
            tags: vec![],
        }
    }

    fn registry() -> SchemaValidatorRegistry {
        SchemaValidatorRegistry::new(
            SchemaCaching::Optimistic,
            Some(Arc::new(json!({
                "schemas": { "Limit": { "type": "integer", "maximum": 50 } }
            }))),
        )
    }

    fn pet_validator() -> ParameterValidator {
        ParameterValidator::compile(
            &operation(vec![
                param("petId", ParameterLocation::Path, true, json!({"type": "integer"})),
                param(
                    "tags",
                    ParameterLocation::Query,
                    false,
                    json!({"type": "array", "items": {"type": "string"}}),
                ),
                param(
                    "limit",
                    ParameterLocation::Query,
                    false,
                    json!({"$ref": "#/components/schemas/Limit"}),
                ),
                param("X-API-Key", ParameterLocation::Header, true, json!({"type": "string"})),
                param("name", ParameterLocation::Query, false, json!({"type": "string"})),
            ]),
            &registry(),
        )
        .unwrap()
    }

    fn captures(id: &str) -> Vec<(Arc<str>, String)> {
        vec![(Arc::from("petId"), id.to_string())]
    }

    fn api_key() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("secret"));
        headers
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("X-API-Key"), "xApiKey");
        assert_eq!(camel_case("petId"), "petId");
        assert_eq!(camel_case("pet_id"), "petId");
        assert_eq!(camel_case("Transaction-Id"), "transactionId");
        assert_eq!(camel_case("HTMLParser"), "htmlParser");
        assert_eq!(camel_case("v2Name"), "v2Name");
        assert_eq!(camel_case("already_camelCase"), "alreadyCamelCase");
    }

    #[test]
    fn test_extract_and_coerce() {
        let validator = pet_validator();
        let values = validator
            .extract(
                &captures("42"),
                Some("tags=a,b&tags=c&limit=10&name=Rex%20the%20dog"),
                &api_key(),
            )
            .unwrap();
        assert_eq!(values["petId"], json!(42));
        assert_eq!(values["tags"], json!(["a", "b", "c"]));
        assert_eq!(values["limit"], json!(10));
        assert_eq!(values["xApiKey"], json!("secret"));
        assert_eq!(values["name"], json!("Rex the dog"));
        validator.apply_validators(&values).unwrap();
    }

    #[test]
    fn test_path_is_percent_decoded() {
        let validator = ParameterValidator::compile(
            &operation(vec![param(
                "petId",
                ParameterLocation::Path,
                true,
                json!({"type": "string"}),
            )]),
            &registry(),
        )
        .unwrap();
        let values = validator.extract(&captures("a%2Fb"), None, &HeaderMap::new()).unwrap();
        assert_eq!(values["petId"], json!("a/b"));
        let err = validator
            .extract(&captures("%FF"), None, &HeaderMap::new())
            .unwrap_err();
        assert!(err.is(ErrorCode::BadParameter));
    }

    #[test]
    fn test_required_and_bad_values() {
        let validator = pet_validator();
        let values = validator.extract(&captures("42"), None, &HeaderMap::new()).unwrap();
        let err = validator.apply_validators(&values).unwrap_err();
        assert!(err.is(ErrorCode::RequiredParameter));

        let values = validator.extract(&captures("forty-two"), None, &api_key()).unwrap();
        assert_eq!(values["petId"], json!("forty-two"));
        let err = validator.apply_validators(&values).unwrap_err();
        assert!(err.is(ErrorCode::BadParameter));
        assert_eq!(err.debug_data().unwrap()["parameter"], "petId");

        let values = validator
            .extract(&captures("1"), Some("limit=51"), &api_key())
            .unwrap();
        let err = validator.apply_validators(&values).unwrap_err();
        assert!(err.is(ErrorCode::BadParameter));
    }

    #[test]
    fn test_repeated_scalar_query_is_rejected() {
        let err = pet_validator()
            .extract(&captures("1"), Some("name=a&name=b"), &api_key())
            .unwrap_err();
        assert!(err.is(ErrorCode::BadParameter));
    }

    #[test]
    fn test_unsupported_shapes() {
        let mut cookie = param("session", ParameterLocation::Cookie, false, json!({"type": "string"}));
        cookie.style = None;
        let mut matrix = param("petId", ParameterLocation::Path, true, json!({"type": "string"}));
        matrix.style = Some("matrix".into());
        let mut content = param("filter", ParameterLocation::Query, false, json!({}));
        content.has_content = true;
        let mut form = param("q", ParameterLocation::Query, false, json!({"type": "string"}));
        form.style = Some("form".into());

        let issues =
            ParameterValidator::compile(&operation(vec![cookie, matrix, content, form]), &registry())
                .unwrap_err();
        assert_eq!(issues.len(), 3);
        assert!(issues
            .iter()
            .all(|i| i.kind == UNSUPPORTED_PARAMETER_DEFINITION));
    }

    #[test]
    fn test_camel_case_collision() {
        let issues = ParameterValidator::compile(
            &operation(vec![
                param("pet-id", ParameterLocation::Query, false, json!({"type": "string"})),
                param("pet_id", ParameterLocation::Header, false, json!({"type": "string"})),
            ]),
            &registry(),
        )
        .unwrap_err();
        assert_eq!(issues[0].kind, "DuplicateParameter");
    }

    #[test]
    fn test_body_rules() {
        let registry = registry();
        let mut op = operation(vec![]);
        op.request_body = Some(RequestBodyMeta {
            required: true,
            content: BTreeMap::from([(
                "application/json".to_string(),
                Some(Arc::new(json!({
                    "type": "object",
                    "required": ["echo"],
                    "properties": {"echo": {"type": "string"}}
                }))),
            )]),
        });
        let validator = RequestBodyValidator::compile(&op, &registry).unwrap();
        let ok = RequestBody::Json(json!({"echo": "hi"}));
        validator.validate(Some(&ok), Some("application/json")).unwrap();

        let bad = RequestBody::Json(json!({"echo": 1}));
        let err = validator.validate(Some(&bad), Some("application/json")).unwrap_err();
        assert!(err.is(ErrorCode::BadRequestBody));

        let err = validator.validate(None, None).unwrap_err();
        assert!(err.is(ErrorCode::RequiredRequestBody));

        let none = RequestBodyValidator::compile(&operation(vec![]), &registry).unwrap();
        let err = none.validate(Some(&ok), Some("application/json")).unwrap_err();
        assert!(err.is(ErrorCode::NoRequestBody));
        none.validate(None, None).unwrap();
    }

    #[test]
    fn test_deserialize_typed_record() {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Input {
            pet_id: i64,
            body: Value,
        }
        let mut values = BTreeMap::new();
        values.insert("petId".to_string(), json!(7));
        let params = Parameters::new(values, Some(RequestBody::Json(json!({"a": 1}))));
        let input: Input = params.deserialize().unwrap();
        assert_eq!(input.pet_id, 7);
        assert_eq!(input.body["a"], 1);
        assert_eq!(params.get_i64("petId"), Some(7));
        assert!(params.require("missing").unwrap_err().is(ErrorCode::RequiredParameter));
    }
}
