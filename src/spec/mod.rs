//! API document loading.
//!
//! The document is parsed as YAML or JSON, checked against the OpenAPI 3
//! model of `oas3`, then walked into immutable [`Operation`]s. Parameter,
//! request body and response `$ref`s are resolved here; schema `$ref`s are
//! left in place for the validator registry.

mod build;
mod load;
mod types;

pub use build::*;
pub use load::*;
pub use types::*;
