use crate::errors::{ErrorCode, HttpError};
use crate::ids::TransactionId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use http::Method;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// What the registry knows about an in-flight transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub method: Method,
    pub path: String,
    pub started_at: SystemTime,
}

/// In-flight transactions keyed by transaction ID.
///
/// The only state shared between concurrent requests. Registration is an
/// atomic insert-if-absent on the owning shard, so two requests racing on
/// the same ID cannot both get in.
#[derive(Debug, Clone, Default)]
pub struct TransactionRegistry {
    inner: Arc<DashMap<String, InFlight>>,
}

impl TransactionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id`, returning a guard that deregisters it on drop.
    ///
    /// # Errors
    ///
    /// `E_TRANSACTION_ID_NOT_UNIQUE` when `id` is already in flight.
    pub fn register(
        &self,
        id: &TransactionId,
        entry: InFlight,
    ) -> Result<RegistrationGuard, HttpError> {
        match self.inner.entry(id.as_str().to_string()) {
            Entry::Occupied(_) => Err(HttpError::new(
                ErrorCode::TransactionIdNotUnique,
                format!("transaction `{id}` is already in flight"),
            )),
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                debug!(transaction_id = %id, in_flight = self.inner.len(), "Transaction registered");
                Ok(RegistrationGuard {
                    registry: self.clone(),
                    id: id.clone(),
                })
            }
        }
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<InFlight> {
        self.inner.get(id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// IDs currently in flight, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

/// Registration of one transaction; dropping it deregisters the ID.
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: TransactionRegistry,
    id: TransactionId,
}

impl RegistrationGuard {
    #[must_use]
    pub fn id(&self) -> &TransactionId {
        &self.id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.inner.remove(self.id.as_str());
        debug!(transaction_id = %self.id, "Transaction deregistered");
    }
}
