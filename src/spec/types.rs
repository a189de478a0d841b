use http::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// One alternative of an operation's security requirements:
/// scheme name → required scopes.
pub type SecurityRequirement = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParameterLocation {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(ParameterLocation::Path),
            "query" => Some(ParameterLocation::Query),
            "header" => Some(ParameterLocation::Header),
            "cookie" => Some(ParameterLocation::Cookie),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterLocation::Path => write!(f, "path"),
            ParameterLocation::Query => write!(f, "query"),
            ParameterLocation::Header => write!(f, "header"),
            ParameterLocation::Cookie => write!(f, "cookie"),
        }
    }
}

/// A parameter as declared in the document. Shape checks (style, `content`,
/// location) happen when the parameter validator compiles it.
#[derive(Debug, Clone)]
pub struct ParameterMeta {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    pub schema: Option<Arc<Value>>,
    pub style: Option<String>,
    /// The parameter uses `content` instead of `schema`.
    pub has_content: bool,
}

/// Request body: media type → schema (`None` when the media type has no schema).
#[derive(Debug, Clone, Default)]
pub struct RequestBodyMeta {
    pub required: bool,
    pub content: BTreeMap<String, Option<Arc<Value>>>,
}

/// One documented response: media type → schema.
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    pub content: BTreeMap<String, Option<Arc<Value>>>,
}

/// Documented responses of an operation.
///
/// Lookups try the exact status, then its `NXX` range, then `default`.
#[derive(Debug, Clone, Default)]
pub struct Responses {
    pub by_status: BTreeMap<u16, ResponseMeta>,
    /// Keyed by the leading digit of `1XX`..`5XX` entries.
    pub by_range: BTreeMap<u16, ResponseMeta>,
    pub default: Option<ResponseMeta>,
}

impl Responses {
    #[must_use]
    pub fn get(&self, status: u16) -> Option<&ResponseMeta> {
        self.by_status
            .get(&status)
            .or_else(|| self.by_range.get(&(status / 100)))
            .or(self.default.as_ref())
    }

    #[must_use]
    pub fn is_documented(&self, status: u16) -> bool {
        self.get(status).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResponseMeta> {
        self.by_status
            .values()
            .chain(self.by_range.values())
            .chain(self.default.iter())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_status.is_empty() && self.by_range.is_empty() && self.default.is_none()
    }
}

/// One documented endpoint. Built once at startup, shared read-only.
#[derive(Debug, Clone)]
pub struct Operation {
    pub operation_id: String,
    pub method: Method,
    /// Path template relative to the base path, e.g. `/pets/{petId}`.
    pub path_pattern: String,
    pub parameters: Vec<ParameterMeta>,
    pub request_body: Option<RequestBodyMeta>,
    pub responses: Responses,
    /// Alternatives; empty means public.
    pub security: Vec<SecurityRequirement>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
}

impl Operation {
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.security.is_empty() || self.security.iter().any(BTreeMap::is_empty)
    }

    /// Human-readable location for logs and issues, e.g. `GET /pets/{petId}`.
    #[must_use]
    pub fn location(&self) -> String {
        format!("{} {}", self.method, self.path_pattern)
    }
}

/// The aggregated API document: an immutable snapshot for the process lifetime.
#[derive(Debug, Clone)]
pub struct ApiDocument {
    pub title: String,
    /// Path component of `servers[0].url`, without trailing slash; empty for `/`.
    pub base_path: String,
    pub operations: Vec<Arc<Operation>>,
    /// The document's `components` object, used to resolve schema `$ref`s.
    pub components: Option<Arc<Value>>,
}

impl ApiDocument {
    #[must_use]
    pub fn operation(&self, operation_id: &str) -> Option<&Arc<Operation>> {
        self.operations
            .iter()
            .find(|op| op.operation_id == operation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> ResponseMeta {
        ResponseMeta::default()
    }

    #[test]
    fn test_response_lookup_order() {
        let mut responses = Responses::default();
        assert!(!responses.is_documented(200));

        responses.by_range.insert(4, response());
        assert!(responses.is_documented(404));
        assert!(!responses.is_documented(200));

        responses.by_status.insert(200, response());
        assert!(responses.is_documented(200));
        assert!(!responses.is_documented(201));

        responses.default = Some(response());
        assert!(responses.is_documented(201));
        assert_eq!(responses.iter().count(), 3);
    }

    #[test]
    fn test_public_operations() {
        let mut op = Operation {
            operation_id: "getPing".into(),
            method: Method::GET,
            path_pattern: "/ping".into(),
            parameters: vec![],
            request_body: None,
            responses: Responses::default(),
            security: vec![],
            summary: None,
            tags: vec![],
        };
        assert!(op.is_public());
        op.security = vec![BTreeMap::from([("bearer".to_string(), vec![])])];
        assert!(!op.is_public());
        op.security.push(BTreeMap::new());
        assert!(op.is_public());
        assert_eq!(op.location(), "GET /ping");
    }
}
