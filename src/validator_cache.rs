//! # Schema Validator Registry
//!
//! Compiles JSON Schemas into validators once and hands out the same
//! `Arc<CompiledSchema>` for the same schema identity afterwards. Identity
//! matters downstream: parameter and body validators are bound at startup and
//! compared by pointer in tests and caches.
//!
//! ## Caching regimes
//!
//! The regime is picked with [`SchemaCaching`]:
//!
//! | Regime              | `$ref` schemas | `true`/`false` | inline schemas                  |
//! |---------------------|----------------|----------------|---------------------------------|
//! | `RefsOnly`          | cached by ref  | compiled       | compiled on every lookup        |
//! | `RefsAndBooleans`   | cached by ref  | cached         | compiled on every lookup        |
//! | `Optimistic`        | cached by ref  | cached         | cached by `Arc` pointer         |
//! | `Hashed`            | cached by ref  | cached         | cached by SHA-256 of the JSON   |
//!
//! `Optimistic` is cheap but two structurally identical schemas built
//! separately get two validators. `Hashed` deduplicates them at the cost of a
//! serialization and a hash per lookup.
//!
//! ## Concurrency
//!
//! The cache is a `DashMap`: reads after population never contend with each
//! other. A miss compiles outside of any lock and then inserts with the
//! entry API; when two threads race on the same key the first insert wins and
//! both callers return that validator. Compiling twice wastes work but never
//! yields two live validators for one key.
//!
//! ## `$ref` resolution
//!
//! Schemas are compiled with the document's `components` object grafted onto
//! their root, so `#/components/schemas/...` pointers (including recursive
//! ones) resolve without expanding them first.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Caching regime of the [`SchemaValidatorRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaCaching {
    /// Only `$ref` schemas are memoized.
    RefsOnly,
    /// `$ref` schemas and the boolean schemas.
    RefsAndBooleans,
    /// Also inline schemas, keyed by the identity of their `Arc`.
    #[default]
    Optimistic,
    /// Also inline schemas, keyed by a hash of their serialized form.
    Hashed,
}

impl FromStr for SchemaCaching {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "refs-only" | "refs_only" => Ok(SchemaCaching::RefsOnly),
            "refs-and-booleans" | "refs_and_booleans" => Ok(SchemaCaching::RefsAndBooleans),
            "optimistic" => Ok(SchemaCaching::Optimistic),
            "hashed" | "pessimistic" => Ok(SchemaCaching::Hashed),
            other => Err(format!("unknown schema caching regime `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SchemaKey {
    Ref(String),
    Boolean(bool),
    Identity(usize),
    Digest(Vec<u8>),
}

/// A compiled JSON Schema.
pub struct CompiledSchema {
    validator: jsonschema::Validator,
    // Keeps the source alive so `Identity` keys cannot be reused by another
    // allocation while the entry is cached.
    source: Arc<Value>,
}

impl CompiledSchema {
    #[must_use]
    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }

    /// Validate an instance, collecting every violation.
    ///
    /// # Errors
    ///
    /// Returns one message per schema violation.
    pub fn validate(&self, instance: &Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(instance)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// The schema this validator was compiled from.
    #[must_use]
    pub fn schema(&self) -> &Value {
        &self.source
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("schema", &self.source)
            .finish()
    }
}

/// Memoizing compiler of JSON Schema validators.
#[derive(Clone)]
pub struct SchemaValidatorRegistry {
    strategy: SchemaCaching,
    components: Option<Arc<Value>>,
    cache: Arc<DashMap<SchemaKey, Arc<CompiledSchema>>>,
}

impl fmt::Debug for SchemaValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidatorRegistry")
            .field("strategy", &self.strategy)
            .field("size", &self.cache.len())
            .finish()
    }
}

fn ref_target(schema: &Value) -> Option<&str> {
    match schema {
        Value::Object(map) if map.len() == 1 => map.get("$ref").and_then(Value::as_str),
        _ => None,
    }
}

impl SchemaValidatorRegistry {
    /// Create a registry.
    ///
    /// `components` is the API document's `components` object, used to
    /// resolve `#/components/...` references; pass `None` for standalone
    /// schemas.
    pub fn new(strategy: SchemaCaching, components: Option<Arc<Value>>) -> Self {
        info!(strategy = ?strategy, "Initializing JSON Schema validator registry");
        Self {
            strategy,
            components,
            cache: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn strategy(&self) -> SchemaCaching {
        self.strategy
    }

    /// The document's `components` object, if any.
    #[must_use]
    pub fn components(&self) -> Option<&Value> {
        self.components.as_deref()
    }

    /// Number of cached validators.
    #[must_use]
    pub fn size(&self) -> usize {
        self.cache.len()
    }

    pub fn clear(&self) {
        self.cache.clear();
        info!("Schema validator registry cleared");
    }

    fn key_for(&self, schema: &Arc<Value>) -> Option<SchemaKey> {
        if let Some(reference) = ref_target(schema) {
            return Some(SchemaKey::Ref(reference.to_string()));
        }
        match (self.strategy, schema.as_ref()) {
            (SchemaCaching::RefsOnly, _) => None,
            (_, Value::Bool(b)) => Some(SchemaKey::Boolean(*b)),
            (SchemaCaching::RefsAndBooleans, _) => None,
            (SchemaCaching::Optimistic, _) => {
                Some(SchemaKey::Identity(Arc::as_ptr(schema) as usize))
            }
            (SchemaCaching::Hashed, value) => {
                let bytes = serde_json::to_vec(value).unwrap_or_default();
                Some(SchemaKey::Digest(Sha256::digest(&bytes).to_vec()))
            }
        }
    }

    fn compile(&self, schema: &Arc<Value>) -> anyhow::Result<CompiledSchema> {
        let validator = match (schema.as_ref(), &self.components) {
            (Value::Object(map), Some(components)) if !map.contains_key("components") => {
                let mut rooted = map.clone();
                rooted.insert("components".to_string(), components.as_ref().clone());
                jsonschema::validator_for(&Value::Object(rooted))
            }
            (value, _) => jsonschema::validator_for(value),
        }
        .map_err(|e| anyhow::anyhow!("invalid JSON Schema: {e}"))?;
        Ok(CompiledSchema {
            validator,
            source: Arc::clone(schema),
        })
    }

    /// Get the validator of a schema, compiling it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error when the schema does not compile.
    pub fn get(&self, schema: &Arc<Value>) -> anyhow::Result<Arc<CompiledSchema>> {
        let Some(key) = self.key_for(schema) else {
            return self.compile(schema).map(Arc::new);
        };

        if let Some(hit) = self.cache.get(&key) {
            debug!(key = ?key, "Schema validator cache hit");
            return Ok(Arc::clone(hit.value()));
        }

        let compiled = match self.compile(schema) {
            Ok(compiled) => Arc::new(compiled),
            Err(e) => {
                error!(key = ?key, error = %e, "Failed to compile JSON Schema");
                return Err(e);
            }
        };
        let entry = self.cache.entry(key).or_insert(compiled);
        info!(
            key = ?entry.key(),
            cache_size = self.cache.len(),
            "Schema validator compiled and cached"
        );
        Ok(Arc::clone(entry.value()))
    }

    /// Shorthand for the validator of `{"$ref": reference}`.
    ///
    /// # Errors
    ///
    /// Returns an error when the referenced schema does not compile.
    pub fn get_ref(&self, reference: &str) -> anyhow::Result<Arc<CompiledSchema>> {
        let schema = Arc::new(serde_json::json!({ "$ref": reference }));
        self.get(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn components() -> Option<Arc<Value>> {
        Some(Arc::new(json!({
            "schemas": {
                "Echo": {
                    "type": "object",
                    "required": ["echo"],
                    "properties": { "echo": { "type": "string" } }
                },
                "Node": {
                    "type": "object",
                    "properties": {
                        "next": { "$ref": "#/components/schemas/Node" }
                    }
                }
            }
        })))
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("hashed".parse(), Ok(SchemaCaching::Hashed));
        assert_eq!("pessimistic".parse(), Ok(SchemaCaching::Hashed));
        assert_eq!("refs-only".parse(), Ok(SchemaCaching::RefsOnly));
        assert!("sometimes".parse::<SchemaCaching>().is_err());
    }

    #[test]
    fn test_ref_lookups_share_validator() {
        for strategy in [
            SchemaCaching::RefsOnly,
            SchemaCaching::RefsAndBooleans,
            SchemaCaching::Optimistic,
            SchemaCaching::Hashed,
        ] {
            let registry = SchemaValidatorRegistry::new(strategy, components());
            let a = registry.get_ref("#/components/schemas/Echo").unwrap();
            let b = registry.get_ref("#/components/schemas/Echo").unwrap();
            assert!(Arc::ptr_eq(&a, &b), "{strategy:?}");
            assert!(a.is_valid(&json!({"echo": "hi"})));
            assert!(!a.is_valid(&json!({"echo": 1})));
        }
    }

    #[test]
    fn test_recursive_ref_compiles() {
        let registry = SchemaValidatorRegistry::new(SchemaCaching::Optimistic, components());
        let node = registry.get_ref("#/components/schemas/Node").unwrap();
        assert!(node.is_valid(&json!({"next": {"next": {}}})));
        assert!(!node.is_valid(&json!({"next": 3})));
    }

    #[test]
    fn test_booleans() {
        let registry = SchemaValidatorRegistry::new(SchemaCaching::RefsAndBooleans, None);
        let a = registry.get(&Arc::new(json!(true))).unwrap();
        let b = registry.get(&Arc::new(json!(true))).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let never = registry.get(&Arc::new(json!(false))).unwrap();
        assert!(!never.is_valid(&json!(null)));

        let refs_only = SchemaValidatorRegistry::new(SchemaCaching::RefsOnly, None);
        let a = refs_only.get(&Arc::new(json!(true))).unwrap();
        let b = refs_only.get(&Arc::new(json!(true))).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(refs_only.size(), 0);
    }

    #[test]
    fn test_optimistic_keys_by_identity() {
        let registry = SchemaValidatorRegistry::new(SchemaCaching::Optimistic, None);
        let shared = Arc::new(json!({"type": "string"}));
        let twin = Arc::new(json!({"type": "string"}));
        let a = registry.get(&shared).unwrap();
        let b = registry.get(&Arc::clone(&shared)).unwrap();
        let c = registry.get(&twin).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.size(), 2);
    }

    #[test]
    fn test_hashed_deduplicates_structural_twins() {
        let registry = SchemaValidatorRegistry::new(SchemaCaching::Hashed, None);
        let a = registry.get(&Arc::new(json!({"type": "string"}))).unwrap();
        let b = registry.get(&Arc::new(json!({"type": "string"}))).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.size(), 1);
    }

    #[test]
    fn test_validate_reports_errors() {
        let registry = SchemaValidatorRegistry::new(SchemaCaching::Optimistic, components());
        let echo = registry.get_ref("#/components/schemas/Echo").unwrap();
        assert!(echo.validate(&json!({"echo": "hi"})).is_ok());
        let errors = echo.validate(&json!({})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("echo"));
    }

    #[test]
    fn test_invalid_schema_is_an_error() {
        let registry = SchemaValidatorRegistry::new(SchemaCaching::Optimistic, None);
        assert!(registry.get(&Arc::new(json!({"type": 12}))).is_err());
        assert_eq!(registry.size(), 0);
    }
}
