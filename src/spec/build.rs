use super::types::{
    ApiDocument, Operation, ParameterLocation, ParameterMeta, RequestBodyMeta, ResponseMeta,
    Responses, SecurityRequirement,
};
use crate::validator::{ensure_no_issues, ValidationIssue};
use http::Method;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

pub(crate) const METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

const MAX_REF_HOPS: usize = 16;

/// Follow local `$ref`s (`#/components/...`) until a concrete value is reached.
///
/// # Errors
///
/// Returns a description of the problem for external, dangling or cyclic
/// references.
pub fn resolve_ref<'a>(root: &'a Value, value: &'a Value) -> Result<&'a Value, String> {
    let mut current = value;
    for _ in 0..MAX_REF_HOPS {
        let Some(reference) = current.get("$ref").and_then(Value::as_str) else {
            return Ok(current);
        };
        let pointer = reference
            .strip_prefix('#')
            .ok_or_else(|| format!("external reference `{reference}` is not supported"))?;
        current = root
            .pointer(pointer)
            .ok_or_else(|| format!("unresolvable reference `{reference}`"))?;
    }
    Err("too many nested references".to_string())
}

/// Follow schema references (`#/components/...`) against the document's
/// `components` object. Unresolvable references are returned as-is.
pub fn deref_schema<'a>(schema: &'a Value, components: Option<&'a Value>) -> &'a Value {
    let mut current = schema;
    for _ in 0..MAX_REF_HOPS {
        let next = current
            .get("$ref")
            .and_then(Value::as_str)
            .and_then(|r| r.strip_prefix("#/components"))
            .and_then(|pointer| components.and_then(|c| c.pointer(pointer)));
        match next {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}

/// Base path from the first server URL: its path component without the
/// trailing slash, or an empty string for `/`.
pub fn base_path_from_server(url: Option<&str>) -> String {
    let Some(url_str) = url else {
        return String::new();
    };
    url::Url::parse(url_str)
        .or_else(|_| url::Url::parse(&format!("http://placeholder{url_str}")))
        .map(|u| {
            let p = u.path().trim_end_matches('/');
            if p == "/" || p.is_empty() {
                String::new()
            } else {
                p.to_string()
            }
        })
        .unwrap_or_default()
}

fn extract_parameter(
    root: &Value,
    raw: &Value,
    location: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<ParameterMeta> {
    let param = match resolve_ref(root, raw) {
        Ok(p) => p,
        Err(e) => {
            issues.push(ValidationIssue::new(location, "BadReference", e));
            return None;
        }
    };
    let Some(name) = param.get("name").and_then(Value::as_str) else {
        issues.push(ValidationIssue::new(location, "MissingName", "parameter without a name"));
        return None;
    };
    let raw_in = param.get("in").and_then(Value::as_str).unwrap_or_default();
    let Some(param_location) = ParameterLocation::parse(raw_in) else {
        issues.push(ValidationIssue::new(
            location,
            "E_UNSUPPORTED_PARAMETER_DEFINITION",
            format!("parameter `{name}` has an unknown location `{raw_in}`"),
        ));
        return None;
    };
    Some(ParameterMeta {
        name: name.to_string(),
        location: param_location,
        // Path parameters are always required.
        required: param_location == ParameterLocation::Path
            || param.get("required").and_then(Value::as_bool).unwrap_or(false),
        schema: param.get("schema").cloned().map(Arc::new),
        style: param.get("style").and_then(Value::as_str).map(str::to_string),
        has_content: param.get("content").is_some(),
    })
}

/// Merge path-level and operation-level parameters; the operation wins on
/// the same (`name`, `in`) pair.
fn extract_parameters(
    root: &Value,
    path_level: Option<&Value>,
    operation_level: Option<&Value>,
    location: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<ParameterMeta> {
    let mut out: Vec<ParameterMeta> = Vec::new();
    for list in [path_level, operation_level].into_iter().flatten() {
        let Some(items) = list.as_array() else {
            continue;
        };
        for raw in items {
            if let Some(param) = extract_parameter(root, raw, location, issues) {
                out.retain(|p| !(p.name == param.name && p.location == param.location));
                out.push(param);
            }
        }
    }
    out
}

fn extract_content(content: Option<&Value>) -> BTreeMap<String, Option<Arc<Value>>> {
    content
        .and_then(Value::as_object)
        .map(|media_types| {
            media_types
                .iter()
                .map(|(media_type, media)| {
                    (
                        media_type.to_ascii_lowercase(),
                        media.get("schema").cloned().map(Arc::new),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn extract_request_body(
    root: &Value,
    operation: &Map<String, Value>,
    location: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<RequestBodyMeta> {
    let raw = operation.get("requestBody")?;
    match resolve_ref(root, raw) {
        Ok(body) => Some(RequestBodyMeta {
            required: body.get("required").and_then(Value::as_bool).unwrap_or(false),
            content: extract_content(body.get("content")),
        }),
        Err(e) => {
            issues.push(ValidationIssue::new(location, "BadReference", e));
            None
        }
    }
}

fn extract_responses(
    root: &Value,
    operation: &Map<String, Value>,
    location: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Responses {
    let mut responses = Responses::default();
    let Some(map) = operation.get("responses").and_then(Value::as_object) else {
        return responses;
    };
    for (key, raw) in map {
        let response = match resolve_ref(root, raw) {
            Ok(r) => ResponseMeta {
                content: extract_content(r.get("content")),
            },
            Err(e) => {
                issues.push(ValidationIssue::new(location, "BadReference", e));
                continue;
            }
        };
        let upper = key.to_ascii_uppercase();
        if upper == "DEFAULT" {
            responses.default = Some(response);
        } else if let Ok(status) = key.parse::<u16>() {
            responses.by_status.insert(status, response);
        } else if let Some(Ok(digit @ 1..=5)) = upper.strip_suffix("XX").map(str::parse::<u16>) {
            responses.by_range.insert(digit, response);
        } else {
            issues.push(ValidationIssue::new(
                location,
                "BadResponseKey",
                format!("`{key}` is not a status code, a status range or `default`"),
            ));
        }
    }
    responses
}

fn parse_security(raw: &Value) -> Vec<SecurityRequirement> {
    raw.as_array()
        .map(|alternatives| {
            alternatives
                .iter()
                .filter_map(Value::as_object)
                .map(|requirement| {
                    requirement
                        .iter()
                        .map(|(scheme, scopes)| {
                            let scopes = scopes
                                .as_array()
                                .map(|s| {
                                    s.iter()
                                        .filter_map(Value::as_str)
                                        .map(str::to_string)
                                        .collect()
                                })
                                .unwrap_or_default();
                            (scheme.clone(), scopes)
                        })
                        .collect()
                })
                .collect()
        })
        .unwrap_or_default()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Walk `paths` and build every operation, collecting issues.
pub fn build_operations(root: &Value, issues: &mut Vec<ValidationIssue>) -> Vec<Operation> {
    let mut operations = Vec::new();
    let mut seen_ids = HashSet::new();
    let document_security = root.get("security").map(parse_security).unwrap_or_default();

    let Some(paths) = root.get("paths").and_then(Value::as_object) else {
        return operations;
    };

    for (path, raw_item) in paths {
        let item = match resolve_ref(root, raw_item) {
            Ok(item) => item,
            Err(e) => {
                issues.push(ValidationIssue::new(path.as_str(), "BadReference", e));
                continue;
            }
        };
        for method_name in METHODS {
            let Some(operation) = item.get(method_name).and_then(Value::as_object) else {
                continue;
            };
            let method = match Method::from_bytes(method_name.to_ascii_uppercase().as_bytes()) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let location = format!("{path} -> {method}");

            let Some(operation_id) = operation.get("operationId").and_then(Value::as_str) else {
                issues.push(ValidationIssue::new(
                    &location,
                    "MissingOperationId",
                    "Missing operationId",
                ));
                continue;
            };
            if !seen_ids.insert(operation_id.to_string()) {
                issues.push(ValidationIssue::new(
                    &location,
                    "DuplicateOperationId",
                    format!("operationId `{operation_id}` is used more than once"),
                ));
                continue;
            }

            let parameters = extract_parameters(
                root,
                item.get("parameters"),
                operation.get("parameters"),
                &location,
                issues,
            );
            let request_body = extract_request_body(root, operation, &location, issues);
            let responses = extract_responses(root, operation, &location, issues);
            let security = operation
                .get("security")
                .map(parse_security)
                .unwrap_or_else(|| document_security.clone());

            debug!(
                operation_id = %operation_id,
                method = %method,
                path = %path,
                parameters = parameters.len(),
                "Operation built"
            );

            operations.push(Operation {
                operation_id: operation_id.to_string(),
                method,
                path_pattern: path.clone(),
                parameters,
                request_body,
                responses,
                security,
                summary: operation
                    .get("summary")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                tags: string_list(operation.get("tags")),
            });
        }
    }
    operations
}

/// Build the immutable [`ApiDocument`] from the raw document value.
///
/// # Errors
///
/// Fails with every collected issue when the document has problems that
/// prevent serving it (missing or duplicate `operationId`, dangling `$ref`s,
/// unknown parameter locations).
pub fn build_document(
    root: &Value,
    title: &str,
    server_url: Option<&str>,
) -> anyhow::Result<ApiDocument> {
    let mut issues = Vec::new();
    let operations = build_operations(root, &mut issues);
    ensure_no_issues(issues)?;

    let base_path = base_path_from_server(server_url);
    info!(
        title = %title,
        base_path = %base_path,
        operations = operations.len(),
        "API document built"
    );

    Ok(ApiDocument {
        title: title.to_string(),
        base_path,
        operations: operations.into_iter().map(Arc::new).collect(),
        components: root.get("components").cloned().map(Arc::new),
    })
}
