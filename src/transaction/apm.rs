//! Application performance monitoring hooks.
//!
//! Emission is fail-soft: a failing [`Apm`] is logged and never changes the
//! response.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Milliseconds since the Unix epoch, `0` before it.
#[must_use]
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApmEventKind {
    Success,
    Error,
}

/// One finished transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApmEvent {
    pub kind: ApmEventKind,
    pub transaction_id: String,
    pub operation_id: Option<String>,
    pub method: String,
    /// Request path without the query string.
    pub path: String,
    pub status: u16,
    pub error_code: Option<String>,
    pub start_time: u64,
    pub end_time: u64,
    pub duration_ms: u64,
    /// Request headers with credentials masked.
    pub request_headers: BTreeMap<String, String>,
}

pub trait Apm: Send + Sync {
    /// # Errors
    ///
    /// Any failure of the monitoring backend.
    fn emit(&self, event: &ApmEvent) -> anyhow::Result<()>;
}

/// Writes APM events to the `gatehouse::apm` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingApm;

impl Apm for TracingApm {
    fn emit(&self, event: &ApmEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        info!(
            target: "gatehouse::apm",
            kind = ?event.kind,
            transaction_id = %event.transaction_id,
            operation_id = event.operation_id.as_deref().unwrap_or("-"),
            status = event.status,
            duration_ms = event.duration_ms,
            event = %payload,
            "Transaction finished"
        );
        Ok(())
    }
}
