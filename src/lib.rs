//! Multi-target connection routing
//!
//! This library routes statements to one of several named databases chosen
//! per execution context, and coordinates a unit of work that may touch
//! several of them (SQLite, PostgreSQL, MySQL).

pub mod config;
pub mod db;
pub mod error;
pub mod management;
pub mod models;

pub use config::Config;
pub use db::{DataSourceContext, SwitchableTransaction, TargetRegistry, TransactionCoordinator};
pub use error::{DbError, DbResult};
