use super::build::{build_document, METHODS};
use super::types::ApiDocument;
use anyhow::Context;
use oas3::OpenApiV3Spec;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecFormat {
    Yaml,
    Json,
}

impl SpecFormat {
    /// `.yaml`/`.yml` are YAML, everything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => SpecFormat::Yaml,
            _ => SpecFormat::Json,
        }
    }
}

fn strip_unknown_verbs(val: &mut Value) {
    let Some(Value::Object(paths_map)) = val.get_mut("paths") else {
        return;
    };
    for item in paths_map.values_mut() {
        if let Value::Object(obj) = item {
            obj.retain(|k, _| {
                let lk = k.to_ascii_lowercase();
                match lk.as_str() {
                    "summary" | "description" | "servers" | "parameters" | "$ref" => true,
                    m if METHODS.contains(&m) => true,
                    _ => k.starts_with("x-"),
                }
            });
        }
    }
}

/// Parse an API document from text.
///
/// # Errors
///
/// Fails when the text is not valid YAML/JSON, is not an OpenAPI 3 document,
/// or describes operations that cannot be served.
pub fn load_spec_str(content: &str, format: SpecFormat) -> anyhow::Result<ApiDocument> {
    let mut value: Value = match format {
        SpecFormat::Yaml => serde_yaml::from_str(content).context("invalid YAML document")?,
        SpecFormat::Json => serde_json::from_str(content).context("invalid JSON document")?,
    };
    strip_unknown_verbs(&mut value);

    let spec: OpenApiV3Spec =
        serde_json::from_value(value.clone()).context("not an OpenAPI 3 document")?;
    let server_url = spec.servers.first().map(|s| s.url.as_str());

    build_document(&value, &spec.info.title, server_url)
}

/// Load an API document from a `.yaml`, `.yml` or `.json` file.
///
/// # Errors
///
/// Fails when the file cannot be read or [`load_spec_str`] fails.
pub fn load_spec(path: impl AsRef<Path>) -> anyhow::Result<ApiDocument> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read API document {}", path.display()))?;
    load_spec_str(&content, SpecFormat::from_path(path))
}
