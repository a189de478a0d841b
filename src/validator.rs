//! Startup configuration issues.
//!
//! Problems found while compiling the API document into operations (missing
//! `operationId`, unsupported parameter shapes, duplicate routes, handlers
//! that are not registered) are collected as [`ValidationIssue`]s and
//! reported together, so a broken document fails once with the full list
//! instead of one problem per restart.

use std::fmt;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub location: String,
    pub kind: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(
        location: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ValidationIssue {
            location: location.into(),
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.location, self.message)
    }
}

/// Turn collected issues into a startup error.
///
/// # Errors
///
/// Returns an error listing every issue when `issues` is not empty.
pub fn ensure_no_issues(issues: Vec<ValidationIssue>) -> anyhow::Result<()> {
    if issues.is_empty() {
        return Ok(());
    }
    for issue in &issues {
        error!(
            kind = %issue.kind,
            location = %issue.location,
            message = %issue.message,
            "API document issue"
        );
    }
    let listing: Vec<String> = issues.iter().map(ToString::to_string).collect();
    anyhow::bail!(
        "API document validation failed with {} issue(s):\n{}",
        issues.len(),
        listing.join("\n")
    )
}
