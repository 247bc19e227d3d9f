//! Backend dispatch macros for reducing code duplication.
//!
//! `DbPool` and `PooledConnection` both carry one variant per sqlx backend.
//! When every arm runs the same expression against its inner value, this
//! macro writes the match once.

/// Run the same expression against whichever backend variant `$value` holds.
///
/// `$ty` names an enum re-exported from `crate::db` with `MySql`, `Postgres`
/// and `SQLite` variants. Each arm must evaluate to the same type.
///
/// # Example
///
/// ```ignore
/// let size = impl_db_dispatch!(DbPool, &self.pool, |p| p.size());
/// let closed = impl_db_dispatch!(PooledConnection, conn, |c| c.ping().await.is_err());
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($ty:ident, $value:expr, |$p:ident| $body:expr) => {
        match $value {
            $crate::db::$ty::MySql($p) => $body,
            $crate::db::$ty::Postgres($p) => $body,
            $crate::db::$ty::SQLite($p) => $body,
        }
    };
}

pub use impl_db_dispatch;
