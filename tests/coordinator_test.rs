//! Integration tests for units of work spanning several targets.

mod common;

use common::{MockPool, count, entries, journal, registry_of};
use multidb_router::db::{
    Completion, DataSourceContext, Outcome, SwitchableTransaction, TransactionCoordinator,
};
use multidb_router::error::DbError;
use multidb_router::models::{IsolationLevel, Propagation, TransactionDefinition};
use std::sync::Arc;
use std::sync::atomic::Ordering;

async fn touch(ctx: &DataSourceContext, target: &str, sql: &str) {
    let _scope = ctx.select(target).unwrap();
    let handle = ctx.acquire().await.unwrap();
    handle.lock().await.execute(sql).await.unwrap();
}

#[tokio::test]
async fn test_commit_spans_every_touched_target() {
    let j = journal();
    let orders = MockPool::new("orders", &j);
    let audit = MockPool::new("audit", &j);
    let ctx = DataSourceContext::new(registry_of(&[orders.clone(), audit.clone()]).await);
    let coordinator = TransactionCoordinator::new();

    let status = coordinator
        .begin(&ctx, &TransactionDefinition::default())
        .unwrap();
    touch(&ctx, "orders", "INSERT INTO orders VALUES (1)").await;
    touch(&ctx, "audit", "INSERT INTO audit_log VALUES ('order 1')").await;
    touch(&ctx, "orders", "UPDATE orders SET total = 10").await;

    assert_eq!(ctx.transactional_targets().await, vec!["orders", "audit"]);
    assert_eq!(orders.acquired(), 1);

    let completion = coordinator
        .complete(&ctx, &status, Outcome::Commit)
        .await
        .unwrap();
    assert_eq!(completion, Completion::Committed);
    assert!(!ctx.is_active());
    assert!(ctx.transactional_targets().await.is_empty());

    for target in ["orders", "audit"] {
        assert_eq!(count(&j, target, "auto_commit=false"), 1);
        assert_eq!(count(&j, target, "commit"), 1);
        assert_eq!(count(&j, target, "auto_commit=true"), 1);
        assert_eq!(count(&j, target, "release"), 1);
    }

    // Commit order follows acquisition order.
    let log = entries(&j);
    let first = log.iter().position(|e| e == "orders:commit").unwrap();
    let second = log.iter().position(|e| e == "audit:commit").unwrap();
    assert!(first < second);
}

#[tokio::test]
async fn test_commit_failure_rolls_back_every_target() {
    let j = journal();
    let a = MockPool::new("a", &j);
    let b = MockPool::new("b", &j);
    let c = MockPool::new("c", &j);
    b.faults.commit.store(true, Ordering::SeqCst);
    let ctx = DataSourceContext::new(registry_of(&[a.clone(), b.clone(), c.clone()]).await);
    let coordinator = TransactionCoordinator::new();

    let status = coordinator
        .begin(&ctx, &TransactionDefinition::default())
        .unwrap();
    for target in ["a", "b", "c"] {
        touch(&ctx, target, "UPDATE t SET x = 1").await;
    }

    let err = coordinator
        .complete(&ctx, &status, Outcome::Commit)
        .await
        .unwrap_err();
    match &err {
        DbError::TransactionSystem {
            message, failures, ..
        } => {
            assert!(message.contains("'b'"));
            assert_eq!(*failures, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(std::error::Error::source(&err).is_some());

    assert_eq!(count(&j, "a", "commit"), 1);
    assert_eq!(count(&j, "b", "commit-failed"), 1);
    assert_eq!(count(&j, "c", "commit"), 0);
    for target in ["a", "b", "c"] {
        assert_eq!(count(&j, target, "rollback"), 1);
        assert_eq!(count(&j, target, "release"), 1);
    }
    assert!(!ctx.is_active());
}

#[tokio::test]
async fn test_rollback_keeps_going_after_failures() {
    let j = journal();
    let a = MockPool::new("a", &j);
    let b = MockPool::new("b", &j);
    let c = MockPool::new("c", &j);
    a.faults.rollback.store(true, Ordering::SeqCst);
    c.faults.rollback.store(true, Ordering::SeqCst);
    let ctx = DataSourceContext::new(registry_of(&[a, b, c]).await);
    let coordinator = TransactionCoordinator::new();

    coordinator
        .begin(&ctx, &TransactionDefinition::default())
        .unwrap();
    for target in ["a", "b", "c"] {
        touch(&ctx, target, "DELETE FROM t").await;
    }

    let err = coordinator.rollback(&ctx).await.unwrap_err();
    assert_eq!(err.failure_count(), 2);
    assert!(err.to_string().contains("rolling back"));
    assert_eq!(count(&j, "b", "rollback"), 1);

    coordinator.cleanup(&ctx).await;
    for target in ["a", "b", "c"] {
        assert_eq!(count(&j, target, "release"), 1);
    }
}

#[tokio::test]
async fn test_participant_rollback_marks_outer_rollback_only() {
    let j = journal();
    let orders = MockPool::new("orders", &j);
    let ctx = DataSourceContext::new(registry_of(&[orders]).await);
    let coordinator = TransactionCoordinator::new();

    let outer = coordinator
        .begin(&ctx, &TransactionDefinition::default())
        .unwrap();
    touch(&ctx, "orders", "INSERT INTO orders VALUES (2)").await;

    let inner = coordinator
        .begin(
            &ctx,
            &TransactionDefinition::default().with_propagation(Propagation::Mandatory),
        )
        .unwrap();
    assert!(!inner.is_new_transaction());
    assert_eq!(inner.transaction_id(), outer.transaction_id());

    let inner_result = coordinator
        .complete(&ctx, &inner, Outcome::Rollback)
        .await
        .unwrap();
    assert_eq!(inner_result, Completion::RolledBack);
    assert!(ctx.is_active());
    assert!(ctx.is_rollback_only());
    assert_eq!(count(&j, "orders", "rollback"), 0);

    let outer_result = coordinator
        .complete(&ctx, &outer, Outcome::Commit)
        .await
        .unwrap();
    assert_eq!(outer_result, Completion::RolledBack);
    assert_eq!(count(&j, "orders", "commit"), 0);
    assert_eq!(count(&j, "orders", "rollback"), 1);
}

#[tokio::test]
async fn test_settings_applied_once_per_target() {
    let j = journal();
    let orders = MockPool::new("orders", &j);
    let audit = MockPool::new("audit", &j);
    let ctx = DataSourceContext::new(registry_of(&[orders, audit]).await);
    let coordinator = TransactionCoordinator::new().with_enforce_read_only(true);

    let definition = TransactionDefinition::default()
        .with_isolation(IsolationLevel::Serializable)
        .read_only();
    let status = coordinator.begin(&ctx, &definition).unwrap();
    for _ in 0..3 {
        touch(&ctx, "orders", "SELECT 1").await;
        touch(&ctx, "audit", "SELECT 1").await;
    }
    coordinator
        .complete(&ctx, &status, Outcome::Commit)
        .await
        .unwrap();

    for target in ["orders", "audit"] {
        assert_eq!(count(&j, target, "isolation=SERIALIZABLE"), 1);
        assert_eq!(count(&j, target, "read_only=true"), 1);
        assert_eq!(count(&j, target, "enforce_read_only"), 1);
        // Restored at cleanup.
        assert_eq!(count(&j, target, "isolation=READ COMMITTED"), 1);
        assert_eq!(count(&j, target, "read_only=false"), 1);
    }
}

#[tokio::test]
async fn test_dead_connection_replaced_inside_unit() {
    let j = journal();
    let orders = MockPool::new("orders", &j);
    let ctx = DataSourceContext::new(registry_of(&[orders.clone()]).await);
    let coordinator = TransactionCoordinator::new();

    let status = coordinator
        .begin(&ctx, &TransactionDefinition::default())
        .unwrap();
    touch(&ctx, "orders", "INSERT INTO orders VALUES (3)").await;
    orders.kill(0);
    touch(&ctx, "orders", "INSERT INTO orders VALUES (4)").await;

    assert_eq!(orders.acquired(), 2);
    assert_eq!(count(&j, "orders", "discard"), 1);
    assert_eq!(ctx.transactional_targets().await, vec!["orders"]);
    // The replacement gets the unit's settings too.
    assert_eq!(count(&j, "orders", "auto_commit=false"), 2);

    coordinator
        .complete(&ctx, &status, Outcome::Commit)
        .await
        .unwrap();
    assert_eq!(count(&j, "orders", "commit"), 1);
}

#[tokio::test]
async fn test_acquire_failure_surfaces_inside_unit() {
    let j = journal();
    let orders = MockPool::new("orders", &j);
    let audit = MockPool::new("audit", &j);
    audit.faults.acquire.store(true, Ordering::SeqCst);
    let ctx = DataSourceContext::new(registry_of(&[orders, audit]).await);
    let coordinator = TransactionCoordinator::new();

    let status = coordinator
        .begin(&ctx, &TransactionDefinition::default())
        .unwrap();
    touch(&ctx, "orders", "INSERT INTO orders VALUES (5)").await;

    let err = {
        let _scope = ctx.select("audit").unwrap();
        ctx.acquire().await.unwrap_err()
    };
    assert!(matches!(err, DbError::Connection { .. }));
    assert!(err.is_retryable());

    coordinator
        .complete(&ctx, &status, Outcome::Rollback)
        .await
        .unwrap();
    assert_eq!(count(&j, "orders", "rollback"), 1);
    assert_eq!(count(&j, "orders", "release"), 1);
}

#[tokio::test]
async fn test_mapper_transaction_defers_to_unit() {
    let j = journal();
    let orders = MockPool::new("orders", &j);
    let ctx = Arc::new(DataSourceContext::new(registry_of(&[orders]).await));
    let coordinator = TransactionCoordinator::new();

    let status = coordinator
        .begin(&ctx, &TransactionDefinition::default())
        .unwrap();
    let mut tx = SwitchableTransaction::new(Arc::clone(&ctx));
    tx.connection()
        .await
        .unwrap()
        .lock()
        .await
        .execute("INSERT INTO orders VALUES (6)")
        .await
        .unwrap();
    tx.commit().await.unwrap();
    tx.close().await.unwrap();
    assert_eq!(count(&j, "orders", "commit"), 0);
    assert_eq!(count(&j, "orders", "release"), 0);

    coordinator
        .complete(&ctx, &status, Outcome::Commit)
        .await
        .unwrap();
    assert_eq!(count(&j, "orders", "commit"), 1);
    assert_eq!(count(&j, "orders", "release"), 1);
}

#[tokio::test]
async fn test_suspend_is_unsupported() {
    let j = journal();
    let ctx = DataSourceContext::new(registry_of(&[MockPool::new("orders", &j)]).await);
    let coordinator = TransactionCoordinator::new();
    coordinator
        .begin(&ctx, &TransactionDefinition::default())
        .unwrap();

    let err = coordinator
        .begin(
            &ctx,
            &TransactionDefinition::default().with_propagation(Propagation::RequiresNew),
        )
        .unwrap_err();
    assert!(matches!(err, DbError::UnsupportedOperation { .. }));
    assert!(ctx.is_active());
}
