//! Operation resolution: method + path → documented operation.
//!
//! Every path template is compiled to an anchored regex at startup, with the
//! document's base path prepended. Placeholders match one path segment and
//! may sit inside a segment (`/files/{name}.json`). Templates are kept per
//! method, ordered so that literal segments win over placeholders
//! (`/pets/mine` before `/pets/{petId}`).

use crate::spec::Operation;
use crate::validator::ValidationIssue;
use http::Method;
use regex::Regex;
use smallvec::SmallVec;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Maximum number of path parameters before heap allocation.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Captured path parameters, still percent-encoded.
///
/// Names are shared with the compiled template; values belong to the request.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

pub const DUPLICATE_ROUTE: &str = "E_DUPLICATE_ROUTE";

/// Outcome of [`OperationResolver::resolve`].
#[derive(Debug, Clone)]
pub enum Resolution {
    Found {
        operation: Arc<Operation>,
        path_params: ParamVec,
    },
    NotFound,
}

impl Resolution {
    #[must_use]
    pub fn operation(&self) -> Option<&Arc<Operation>> {
        match self {
            Resolution::Found { operation, .. } => Some(operation),
            Resolution::NotFound => None,
        }
    }
}

/// Segment ranks, most specific first.
const LITERAL: u8 = 2;
const MIXED: u8 = 1;
const PLACEHOLDER: u8 = 0;

#[derive(Debug)]
struct CompiledTemplate {
    regex: Regex,
    param_names: Vec<Arc<str>>,
    ranks: Vec<u8>,
    /// Template with placeholder names erased; equal shapes collide.
    shape: String,
    operation: Arc<Operation>,
}

/// Trim the trailing slash, keeping the root as `/`.
fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Convert a path template to an anchored regex.
///
/// Returns the regex source, the placeholder names in order, the rank of
/// every segment and the template shape.
pub(crate) fn template_to_regex(template: &str) -> (String, Vec<Arc<str>>, Vec<u8>, String) {
    let template = normalize(template);
    if template == "/" {
        return ("^/$".to_string(), Vec::new(), Vec::new(), "/".to_string());
    }

    let mut pattern = String::with_capacity(template.len() + 8);
    pattern.push('^');
    let mut names = Vec::new();
    let mut ranks = Vec::new();
    let mut shape = String::with_capacity(template.len());

    for segment in template.split('/').filter(|s| !s.is_empty()) {
        pattern.push('/');
        shape.push('/');
        let mut literal = String::new();
        let mut placeholders = 0usize;
        let mut rest = segment;
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|c| open + c) else {
                break;
            };
            literal.push_str(&rest[..open]);
            pattern.push_str(&regex::escape(&literal));
            shape.push_str(&literal);
            literal.clear();
            pattern.push_str("([^/]+?)");
            shape.push_str("{}");
            names.push(Arc::from(&rest[open + 1..close]));
            placeholders += 1;
            rest = &rest[close + 1..];
        }
        literal.push_str(rest);
        pattern.push_str(&regex::escape(&literal));
        shape.push_str(&literal);

        ranks.push(match placeholders {
            0 => LITERAL,
            1 if segment.starts_with('{') && segment.ends_with('}') => PLACEHOLDER,
            _ => MIXED,
        });
    }
    pattern.push('$');
    (pattern, names, ranks, shape)
}

/// Compiled routing table.
#[derive(Debug, Default)]
pub struct OperationResolver {
    base_path: String,
    by_method: HashMap<Method, Vec<CompiledTemplate>>,
}

impl OperationResolver {
    /// Compile the templates of every operation.
    ///
    /// # Errors
    ///
    /// Returns an `E_DUPLICATE_ROUTE` issue for every template that has the
    /// same shape as an earlier one on the same method, and an issue for
    /// templates that do not compile.
    pub fn new(base_path: &str, operations: &[Arc<Operation>]) -> Result<Self, Vec<ValidationIssue>> {
        let base_path = base_path.trim_end_matches('/').to_string();
        let mut issues = Vec::new();
        let mut by_method: HashMap<Method, Vec<CompiledTemplate>> = HashMap::new();

        for operation in operations {
            let (source, param_names, ranks, shape) =
                template_to_regex(&operation.path_pattern);
            let source = if base_path.is_empty() {
                source
            } else if source == "^/$" {
                format!("^{}$", regex::escape(&base_path))
            } else {
                format!("^{}{}", regex::escape(&base_path), &source[1..])
            };

            let templates = by_method.entry(operation.method.clone()).or_default();
            if let Some(existing) = templates.iter().find(|t| t.shape == shape) {
                issues.push(ValidationIssue::new(
                    operation.location(),
                    DUPLICATE_ROUTE,
                    format!(
                        "`{}` collides with `{}` ({})",
                        operation.path_pattern,
                        existing.operation.path_pattern,
                        existing.operation.operation_id
                    ),
                ));
                continue;
            }
            let regex = match Regex::new(&source) {
                Ok(regex) => regex,
                Err(e) => {
                    issues.push(ValidationIssue::new(
                        operation.location(),
                        "BadPathTemplate",
                        e.to_string(),
                    ));
                    continue;
                }
            };
            templates.push(CompiledTemplate {
                regex,
                param_names,
                ranks,
                shape,
                operation: Arc::clone(operation),
            });
        }

        if !issues.is_empty() {
            return Err(issues);
        }
        for templates in by_method.values_mut() {
            // Stable: equally specific templates keep document order.
            templates.sort_by_key(|t| Reverse(t.ranks.clone()));
        }

        let routes_count: usize = by_method.values().map(Vec::len).sum();
        info!(
            routes_count,
            base_path = %base_path,
            "Routing table loaded"
        );
        Ok(Self {
            base_path,
            by_method,
        })
    }

    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// `METHOD /base/path/template` for every compiled route.
    #[must_use]
    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self
            .by_method
            .iter()
            .flat_map(|(method, templates)| {
                templates.iter().map(move |t| {
                    format!("{method} {}{}", self.base_path, t.operation.path_pattern)
                })
            })
            .collect();
        routes.sort();
        routes
    }

    /// Find the operation documented for `method` and `path`.
    ///
    /// `path` must not carry the query string.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution {
        let path = normalize(path);
        let Some(templates) = self.by_method.get(method) else {
            debug!(method = %method, path = %path, "No route for method");
            return Resolution::NotFound;
        };
        for template in templates {
            let Some(captures) = template.regex.captures(path) else {
                continue;
            };
            let path_params: ParamVec = template
                .param_names
                .iter()
                .zip(captures.iter().skip(1))
                .filter_map(|(name, m)| m.map(|m| (Arc::clone(name), m.as_str().to_string())))
                .collect();
            debug!(
                method = %method,
                path = %path,
                operation_id = %template.operation.operation_id,
                path_params = ?path_params,
                "Route matched"
            );
            return Resolution::Found {
                operation: Arc::clone(&template.operation),
                path_params,
            };
        }
        debug!(method = %method, path = %path, "No route matched");
        Resolution::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Responses;

    fn op(id: &str, method: Method, path: &str) -> Arc<Operation> {
        Arc::new(Operation {
            operation_id: id.into(),
            method,
            path_pattern: path.into(),
            parameters: vec![],
            request_body: None,
            responses: Responses::default(),
            security: vec![],
            summary: None,
            tags: vec![],
        })
    }

    fn found(resolution: &Resolution) -> (&str, Vec<(String, String)>) {
        match resolution {
            Resolution::Found {
                operation,
                path_params,
            } => (
                operation.operation_id.as_str(),
                path_params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            ),
            Resolution::NotFound => panic!("expected a match"),
        }
    }

    #[test]
    fn test_root_path() {
        let (re, params, _, _) = template_to_regex("/");
        assert_eq!(re, "^/$");
        assert!(params.is_empty());
    }

    #[test]
    fn test_parameterized_path() {
        let (re, params, ranks, shape) = template_to_regex("/items/{id}");
        let re = Regex::new(&re).unwrap();
        assert!(re.is_match("/items/123"));
        assert!(!re.is_match("/items/123/more"));
        assert_eq!(params, vec![Arc::<str>::from("id")]);
        assert_eq!(ranks, vec![LITERAL, PLACEHOLDER]);
        assert_eq!(shape, "/items/{}");
    }

    #[test]
    fn test_placeholder_inside_segment() {
        let resolver =
            OperationResolver::new("", &[op("getFile", Method::GET, "/files/{name}.json")]).unwrap();
        let resolution = resolver.resolve(&Method::GET, "/files/report.json");
        assert_eq!(
            found(&resolution),
            ("getFile", vec![("name".into(), "report".into())])
        );
        assert!(matches!(
            resolver.resolve(&Method::GET, "/files/report.xml"),
            Resolution::NotFound
        ));
    }

    #[test]
    fn test_literals_win_over_placeholders() {
        let resolver = OperationResolver::new(
            "",
            &[
                op("getPet", Method::GET, "/pets/{petId}"),
                op("getMyPet", Method::GET, "/pets/mine"),
            ],
        )
        .unwrap();
        assert_eq!(found(&resolver.resolve(&Method::GET, "/pets/mine")).0, "getMyPet");
        assert_eq!(found(&resolver.resolve(&Method::GET, "/pets/12")).0, "getPet");
    }

    #[test]
    fn test_duplicate_templates_are_rejected() {
        let issues = OperationResolver::new(
            "",
            &[
                op("a", Method::GET, "/pets/{id}"),
                op("b", Method::GET, "/pets/{petId}"),
                op("c", Method::DELETE, "/pets/{petId}"),
            ],
        )
        .unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, DUPLICATE_ROUTE);
        assert_eq!(issues[0].location, "GET /pets/{petId}");
    }

    #[test]
    fn test_base_path_and_trailing_slash() {
        let resolver = OperationResolver::new(
            "/v1/",
            &[op("getPing", Method::GET, "/ping"), op("getRoot", Method::GET, "/")],
        )
        .unwrap();
        assert_eq!(found(&resolver.resolve(&Method::GET, "/v1/ping")).0, "getPing");
        assert_eq!(found(&resolver.resolve(&Method::GET, "/v1/ping/")).0, "getPing");
        assert_eq!(found(&resolver.resolve(&Method::GET, "/v1")).0, "getRoot");
        assert_eq!(found(&resolver.resolve(&Method::GET, "/v1/")).0, "getRoot");
        assert!(matches!(resolver.resolve(&Method::GET, "/ping"), Resolution::NotFound));
        assert!(matches!(resolver.resolve(&Method::POST, "/v1/ping"), Resolution::NotFound));
        assert_eq!(resolver.routes(), vec!["GET /v1/", "GET /v1/ping"]);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let resolver = OperationResolver::new("", &[op("getPet", Method::GET, "/pets/{id}")]).unwrap();
        let first = resolver.resolve(&Method::GET, "/pets/1");
        let second = resolver.resolve(&Method::GET, "/pets/1");
        assert!(Arc::ptr_eq(
            first.operation().unwrap(),
            second.operation().unwrap()
        ));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let resolver = OperationResolver::new("", &[op("dot", Method::GET, "/a.b/{x}")]).unwrap();
        assert!(matches!(resolver.resolve(&Method::GET, "/aXb/1"), Resolution::NotFound));
        assert_eq!(found(&resolver.resolve(&Method::GET, "/a.b/1")).0, "dot");
    }
}
