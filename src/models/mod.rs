//! Data models for the router.

pub mod target;
pub mod transaction;

pub use target::{DatabaseType, LastUsedTarget, PooledTargetInfo, TargetConfig, TargetConfigError};
pub use transaction::{
    IsolationLevel, Propagation, TransactionDefinition, TransactionMetadata,
    generate_transaction_id,
};
