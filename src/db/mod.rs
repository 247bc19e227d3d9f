//! Routing and transaction layer.
//!
//! This module provides:
//! - The target registry and its sqlx pool adapter
//! - Per-context target selection and slot tables
//! - Connection handles with once-per-unit settings
//! - The transaction coordinator and the mapper-facing transaction
//! - Backend dispatch macros for reducing code duplication

pub mod connection;
pub mod context;
pub mod coordinator;
pub mod handle;
#[macro_use]
pub mod macros;
pub mod pool;
pub mod registry;
pub mod selector;
pub mod slots;
pub mod tracking;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{DbConnection, PhysicalConnection, PooledConnection};
pub use context::DataSourceContext;
pub use coordinator::{Completion, Outcome, TransactionCoordinator, TransactionStatus};
pub use handle::{ConnectionHandle, HandleSettings, SharedHandle};
pub use pool::{DbPool, TargetPool, create_pool};
pub use registry::{ResolvedTarget, TargetRegistry, TargetResolver};
pub use selector::{ContextSelector, SelectionScope};
pub use slots::{Acquired, SlotTable};
pub use tracking::{LastUsedCell, TrackingResolver};
pub use transaction::SwitchableTransaction;
