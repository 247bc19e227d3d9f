//! Target-related data models.
//!
//! This module defines types for routing target configuration and pool state.

use crate::config::PoolOptions;
use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Pool kind label reported by inspection.
    pub fn pool_kind(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "sqlx-postgres",
            Self::MySQL => "sqlx-mysql",
            Self::SQLite => "sqlx-sqlite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Configuration for one routing target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub db_type: DatabaseType,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub connection_string: String,
    /// Inactive targets are never registered
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub pool_options: PoolOptions,
}

fn default_active() -> bool {
    true
}

impl TargetConfig {
    /// Create a new target configuration.
    pub fn new(
        name: impl Into<String>,
        connection_string: impl Into<String>,
        active: bool,
        is_default: bool,
        pool_options: PoolOptions,
    ) -> Result<Self, TargetConfigError> {
        let name = name.into();
        let connection_string = connection_string.into();

        if name.trim().is_empty() {
            return Err(TargetConfigError::EmptyName);
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(TargetConfigError::InvalidName(name));
        }

        let db_type = DatabaseType::from_connection_string(&connection_string)
            .ok_or_else(|| TargetConfigError::UnknownDatabaseType(mask(&connection_string)))?;

        Ok(Self {
            name,
            db_type,
            connection_string,
            active,
            is_default,
            pool_options,
        })
    }

    /// Get a display-safe version of the connection string (credentials masked).
    pub fn masked_connection_string(&self) -> String {
        mask(&self.connection_string)
    }
}

fn mask(connection_string: &str) -> String {
    let authority_start = connection_string.find("://").map_or(0, |pos| pos + 3);
    let rest = &connection_string[authority_start..];
    if let Some(at_pos) = rest.find('@') {
        if let Some(colon_pos) = rest[..at_pos].find(':') {
            let prefix = &connection_string[..authority_start + colon_pos + 1];
            let suffix = &rest[at_pos..];
            return format!("{}****{}", prefix, suffix);
        }
    }
    connection_string.to_string()
}

/// Errors that can occur when creating a target configuration.
#[derive(Debug, thiserror::Error)]
pub enum TargetConfigError {
    #[error("Target name cannot be empty")]
    EmptyName,

    #[error("Target name contains invalid characters: {0}")]
    InvalidName(String),

    #[error("Unknown database type in connection string: {0}")]
    UnknownDatabaseType(String),
}

/// Pool health of one target, as reported by inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PooledTargetInfo {
    /// Pool implementation label, e.g. "sqlx-postgres"
    #[serde(rename = "type")]
    pub kind: String,
    pub running: bool,
    /// Connections currently checked out
    pub active: u32,
    /// Connections currently opened, idle or not
    pub total: u32,
    /// Configured upper bound, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

/// Record of the most recent resolution on a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastUsedTarget {
    pub target: String,
    pub pool_kind: String,
    pub resolved_at: chrono::DateTime<chrono::Utc>,
}
