//! Startup probe: one read-only unit of work touching every target.

use crate::db::{DataSourceContext, Outcome, TargetRegistry, TransactionCoordinator};
use crate::error::DbResult;
use crate::models::{LastUsedTarget, TransactionDefinition};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const PROBE_SQL: &str = "SELECT 1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetProbe {
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub transaction_id: Option<String>,
    pub targets: BTreeMap<String, TargetProbe>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<LastUsedTarget>,
}

impl ProbeReport {
    pub fn all_ok(&self) -> bool {
        self.targets.values().all(|p| p.ok)
    }
}

/// Run `SELECT 1` on every target inside a single read-only unit of work.
///
/// Per-target failures are recorded in the report; the unit is rolled back
/// when any target failed and committed otherwise.
pub async fn probe_targets(
    registry: Arc<TargetRegistry>,
    coordinator: &TransactionCoordinator,
    track: bool,
) -> DbResult<ProbeReport> {
    let ctx = if track {
        DataSourceContext::with_tracking(Arc::clone(&registry))
    } else {
        DataSourceContext::new(Arc::clone(&registry))
    };

    let definition = TransactionDefinition::default()
        .read_only()
        .with_name("startup-probe");
    let status = coordinator.begin(&ctx, &definition)?;

    let mut targets = BTreeMap::new();
    for name in registry.all_names().await {
        let started = Instant::now();
        let result = probe_one(&ctx, &name).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let probe = match result {
            Ok(()) => TargetProbe {
                ok: true,
                latency_ms,
                error: None,
            },
            Err(e) => {
                warn!(target_name = %name, error = %e, "Probe failed");
                TargetProbe {
                    ok: false,
                    latency_ms,
                    error: Some(e.to_string()),
                }
            }
        };
        targets.insert(name, probe);
    }

    let outcome = if targets.values().all(|p| p.ok) {
        Outcome::Commit
    } else {
        Outcome::Rollback
    };
    coordinator.complete(&ctx, &status, outcome).await?;

    let report = ProbeReport {
        transaction_id: status.transaction_id().map(str::to_string),
        targets,
        last_used: ctx.last_used(),
    };
    info!(
        targets = report.targets.len(),
        all_ok = report.all_ok(),
        "Probe finished"
    );
    Ok(report)
}

async fn probe_one(ctx: &DataSourceContext, name: &str) -> DbResult<()> {
    let _scope = ctx.select(name)?;
    let handle = ctx.acquire().await?;
    let mut handle = handle.lock().await;
    handle.fetch_scalar(PROBE_SQL).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::StubPool;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_probe_commits_when_all_targets_answer() {
        let registry = Arc::new(TargetRegistry::new());
        let orders = StubPool::shared();
        let audit = StubPool::shared();
        registry.register("orders", orders.clone(), true).await.unwrap();
        registry.register("audit", audit.clone(), false).await.unwrap();

        let report = probe_targets(registry, &TransactionCoordinator::new(), true)
            .await
            .unwrap();
        assert!(report.all_ok());
        assert!(report.transaction_id.is_some());
        assert_eq!(report.last_used.unwrap().target, "orders");

        for pool in [&orders, &audit] {
            let events = pool.connections()[0].events();
            assert!(events.contains(&"read_only=true".to_string()));
            assert!(events.contains(&"fetch:SELECT 1".to_string()));
            assert!(events.contains(&"commit".to_string()));
        }
    }

    #[tokio::test]
    async fn test_probe_records_failure_and_rolls_back() {
        let registry = Arc::new(TargetRegistry::new());
        let orders = StubPool::shared();
        let audit = StubPool::shared();
        audit.fail_acquire.store(true, Ordering::SeqCst);
        registry.register("orders", orders.clone(), true).await.unwrap();
        registry.register("audit", audit, false).await.unwrap();

        let report = probe_targets(registry, &TransactionCoordinator::new(), false)
            .await
            .unwrap();
        assert!(!report.all_ok());
        assert!(report.targets["orders"].ok);
        assert!(report.targets["audit"].error.is_some());
        assert!(report.last_used.is_none());

        let events = orders.connections()[0].events();
        assert!(events.contains(&"rollback".to_string()));
        assert!(!events.contains(&"commit".to_string()));
    }
}
