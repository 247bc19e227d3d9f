//! Context selector: which target name is current for one context.

use crate::error::{DbError, DbResult};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Current target name of one context. `None` means the default target.
#[derive(Debug, Default)]
pub struct ContextSelector {
    current: Mutex<Option<String>>,
}

impl ContextSelector {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<String>> {
        // A poisoned lock still guards a whole Option.
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `name` current. Blank names are rejected.
    pub fn set_current(&self, name: &str) -> DbResult<()> {
        if name.trim().is_empty() {
            return Err(DbError::invalid_argument(
                "Target name must not be blank; use reset() to select the default",
            ));
        }
        let mut current = self.slot();
        debug!(target_name = %name, previous = ?*current, "Switching current target");
        *current = Some(name.to_string());
        Ok(())
    }

    pub fn get_current(&self) -> Option<String> {
        self.slot().clone()
    }

    /// Back to the default target.
    pub fn reset(&self) {
        *self.slot() = None;
    }

    /// Swap in a value and return the one it replaced.
    pub(crate) fn replace(&self, value: Option<String>) -> Option<String> {
        std::mem::replace(&mut *self.slot(), value)
    }

    /// A new selector starting from a copy of this one's value.
    pub fn fork(&self) -> Self {
        Self {
            current: Mutex::new(self.get_current()),
        }
    }
}

/// Restores the previously current target when dropped.
///
/// Returned by [`DataSourceContext::select`](crate::db::DataSourceContext::select).
/// Scopes nest with stack discipline.
#[must_use = "the previous target is restored as soon as the scope is dropped"]
#[derive(Debug)]
pub struct SelectionScope<'a> {
    selector: &'a ContextSelector,
    previous: Option<String>,
}

impl<'a> SelectionScope<'a> {
    pub(crate) fn enter(selector: &'a ContextSelector, name: &str) -> DbResult<Self> {
        if name.trim().is_empty() {
            return Err(DbError::invalid_argument("Target name must not be blank"));
        }
        let previous = selector.replace(Some(name.to_string()));
        Ok(Self { selector, previous })
    }

    /// The value that will be restored.
    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }
}

impl Drop for SelectionScope<'_> {
    fn drop(&mut self) {
        self.selector.replace(self.previous.take());
    }
}
