//! # Transactions
//!
//! A transaction wraps one router invocation:
//!
//! 1. `create` validates or generates the transaction ID and registers it
//!    in the [`TransactionRegistry`], refusing IDs already in flight.
//! 2. `start` runs the router in a coroutine and races it against the
//!    configured timeout.
//! 3. `end` / `catch` write the response through a
//!    [`ResponseSink`](crate::service::ResponseSink), emit an [`ApmEvent`] and
//!    deregister the ID.
//!
//! States: `Created → Running → Completed | TimedOut | Errored`.

mod apm;
mod lifecycle;
mod registry;

pub use apm::{epoch_millis, Apm, ApmEvent, ApmEventKind, Clock, SystemClock, TracingApm};
pub use lifecycle::{Rejection, Transaction, TransactionManager, TransactionState};
pub use registry::{InFlight, RegistrationGuard, TransactionRegistry};
