//! Shared mock pool for integration tests.
//!
//! Every connection appends `"<pool>:<event>"` to one journal shared by all
//! pools of a test, so cross-target ordering can be asserted.

#![allow(dead_code)]

use async_trait::async_trait;
use multidb_router::db::{PhysicalConnection, TargetPool, TargetRegistry};
use multidb_router::error::{DbError, DbResult};
use multidb_router::models::IsolationLevel;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

#[derive(Debug, Default)]
pub struct Faults {
    pub commit: AtomicBool,
    pub rollback: AtomicBool,
    pub acquire: AtomicBool,
}

#[derive(Debug)]
pub struct MockPool {
    pub name: String,
    pub faults: Faults,
    journal: Journal,
    handed_out: AtomicU32,
    closed: AtomicBool,
    fail_close: bool,
    connections: Mutex<Vec<Arc<AtomicBool>>>,
}

impl MockPool {
    pub fn new(name: &str, journal: &Journal) -> Arc<Self> {
        Arc::new(Self::build(name, journal, false))
    }

    pub fn failing_close(name: &str, journal: &Journal) -> Arc<Self> {
        Arc::new(Self::build(name, journal, true))
    }

    fn build(name: &str, journal: &Journal, fail_close: bool) -> Self {
        Self {
            name: name.to_string(),
            faults: Faults::default(),
            journal: Arc::clone(journal),
            handed_out: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            fail_close,
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn acquired(&self) -> u32 {
        self.handed_out.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the `index`th connection handed out as dead.
    pub fn kill(&self, index: usize) {
        self.connections.lock().unwrap()[index].store(true, Ordering::SeqCst);
    }

    fn record(&self, event: &str) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name, event));
    }
}

#[async_trait]
impl TargetPool for MockPool {
    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn acquire(&self) -> DbResult<Box<dyn PhysicalConnection>> {
        if self.faults.acquire.load(Ordering::SeqCst) {
            return Err(DbError::connection(
                format!("{} is unreachable", self.name),
                "Check the mock",
            ));
        }
        let n = self.handed_out.fetch_add(1, Ordering::SeqCst);
        self.record(&format!("acquire#{}", n));
        let dead = Arc::new(AtomicBool::new(false));
        self.connections.lock().unwrap().push(Arc::clone(&dead));
        Ok(Box::new(MockConnection {
            pool: self.name.clone(),
            journal: Arc::clone(&self.journal),
            fail_commit: self.faults.commit.load(Ordering::SeqCst),
            fail_rollback: self.faults.rollback.load(Ordering::SeqCst),
            dead,
            auto_commit: true,
            read_only: false,
            isolation: IsolationLevel::ReadCommitted,
        }))
    }

    fn is_healthy(&self) -> bool {
        !self.is_closed()
    }

    fn active_count(&self) -> u32 {
        0
    }

    fn total_count(&self) -> u32 {
        self.acquired()
    }

    async fn close(&self) -> DbResult<()> {
        self.record("close");
        if self.fail_close {
            return Err(DbError::internal(format!("{} refused to close", self.name)));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
struct MockConnection {
    pool: String,
    journal: Journal,
    fail_commit: bool,
    fail_rollback: bool,
    dead: Arc<AtomicBool>,
    auto_commit: bool,
    read_only: bool,
    isolation: IsolationLevel,
}

impl MockConnection {
    fn record(&self, event: impl AsRef<str>) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.pool, event.as_ref()));
    }
}

#[async_trait]
impl PhysicalConnection for MockConnection {
    async fn is_closed(&mut self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> DbResult<()> {
        self.record(format!("auto_commit={}", auto_commit));
        self.auto_commit = auto_commit;
        Ok(())
    }

    async fn isolation_level(&mut self) -> DbResult<IsolationLevel> {
        Ok(self.isolation)
    }

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> DbResult<()> {
        self.record(format!("isolation={}", level));
        self.isolation = level;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn set_read_only(&mut self, read_only: bool) -> DbResult<()> {
        self.record(format!("read_only={}", read_only));
        self.read_only = read_only;
        Ok(())
    }

    async fn enforce_read_only(&mut self) -> DbResult<()> {
        self.record("enforce_read_only");
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        self.record(format!("execute:{}", sql));
        Ok(1)
    }

    async fn fetch_scalar(&mut self, sql: &str) -> DbResult<Option<i64>> {
        self.record(format!("fetch:{}", sql));
        Ok(Some(1))
    }

    async fn commit(&mut self) -> DbResult<()> {
        if self.fail_commit {
            self.record("commit-failed");
            return Err(DbError::database(
                format!("{} rejected commit", self.pool),
                Some("40001".to_string()),
                "Retry the unit of work",
            ));
        }
        self.record("commit");
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if self.fail_rollback {
            self.record("rollback-failed");
            return Err(DbError::database(
                format!("{} rejected rollback", self.pool),
                None,
                "Check the mock",
            ));
        }
        self.record("rollback");
        Ok(())
    }

    async fn release(&mut self) -> DbResult<()> {
        self.record("release");
        Ok(())
    }

    async fn discard(&mut self) {
        self.record("discard");
    }
}

/// Registry with the given pools, the first one as default.
pub async fn registry_of(pools: &[Arc<MockPool>]) -> Arc<TargetRegistry> {
    let registry = Arc::new(TargetRegistry::new());
    for (i, pool) in pools.iter().enumerate() {
        registry
            .register(pool.name.clone(), Arc::clone(pool) as Arc<dyn TargetPool>, i == 0)
            .await
            .unwrap();
    }
    registry
}

/// Number of `event` entries recorded for `pool`.
pub fn count(journal: &Journal, pool: &str, event: &str) -> usize {
    let needle = format!("{}:{}", pool, event);
    entries(journal).iter().filter(|e| **e == needle).count()
}
