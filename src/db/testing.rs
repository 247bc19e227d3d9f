//! In-memory pool and connection stubs for unit tests.

use crate::db::connection::PhysicalConnection;
use crate::db::pool::TargetPool;
use crate::error::{DbError, DbResult};
use crate::models::IsolationLevel;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Observable state of one stub connection.
#[derive(Debug)]
pub(crate) struct StubState {
    pub id: u32,
    pub closed: AtomicBool,
    pub released: AtomicBool,
    pub events: Mutex<Vec<String>>,
    auto_commit: AtomicBool,
    read_only: AtomicBool,
    isolation: Mutex<IsolationLevel>,
}

impl StubState {
    pub fn kill(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

#[derive(Debug)]
pub(crate) struct StubConnection {
    state: Arc<StubState>,
}

#[async_trait]
impl PhysicalConnection for StubConnection {
    async fn is_closed(&mut self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn is_auto_commit(&self) -> bool {
        self.state.auto_commit.load(Ordering::SeqCst)
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> DbResult<()> {
        self.state.record(format!("auto_commit={}", auto_commit));
        self.state.auto_commit.store(auto_commit, Ordering::SeqCst);
        Ok(())
    }

    async fn isolation_level(&mut self) -> DbResult<IsolationLevel> {
        Ok(*self.state.isolation.lock().unwrap())
    }

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> DbResult<()> {
        self.state.record(format!("isolation={}", level));
        *self.state.isolation.lock().unwrap() = level;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.state.read_only.load(Ordering::SeqCst)
    }

    async fn set_read_only(&mut self, read_only: bool) -> DbResult<()> {
        self.state.record(format!("read_only={}", read_only));
        self.state.read_only.store(read_only, Ordering::SeqCst);
        Ok(())
    }

    async fn enforce_read_only(&mut self) -> DbResult<()> {
        self.state.record("enforce_read_only");
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        self.state.record(format!("execute:{}", sql));
        Ok(1)
    }

    async fn fetch_scalar(&mut self, sql: &str) -> DbResult<Option<i64>> {
        self.state.record(format!("fetch:{}", sql));
        Ok(Some(i64::from(self.state.id)))
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.state.record("commit");
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.state.record("rollback");
        Ok(())
    }

    async fn release(&mut self) -> DbResult<()> {
        self.state.record("release");
        self.state.released.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn discard(&mut self) {
        self.state.record("discard");
    }
}

#[derive(Debug, Default)]
pub(crate) struct StubPool {
    next_id: AtomicU32,
    closed: AtomicBool,
    pub fail_acquire: AtomicBool,
    handed_out: Mutex<Vec<Arc<StubState>>>,
}

impl StubPool {
    pub fn shared() -> Arc<StubPool> {
        Arc::new(StubPool::default())
    }

    /// States of every connection handed out, in acquisition order.
    pub fn connections(&self) -> Vec<Arc<StubState>> {
        self.handed_out.lock().unwrap().clone()
    }

    pub fn acquired(&self) -> usize {
        self.handed_out.lock().unwrap().len()
    }
}

#[async_trait]
impl TargetPool for StubPool {
    fn kind(&self) -> &'static str {
        "stub"
    }

    async fn acquire(&self) -> DbResult<Box<dyn PhysicalConnection>> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(DbError::connection("stub pool refused", "none"));
        }
        let state = Arc::new(StubState {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            closed: AtomicBool::new(false),
            released: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
            auto_commit: AtomicBool::new(true),
            read_only: AtomicBool::new(false),
            isolation: Mutex::new(IsolationLevel::ReadCommitted),
        });
        self.handed_out.lock().unwrap().push(Arc::clone(&state));
        Ok(Box::new(StubConnection { state }))
    }

    fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn active_count(&self) -> u32 {
        self.handed_out
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.released.load(Ordering::SeqCst))
            .count() as u32
    }

    fn total_count(&self) -> u32 {
        self.acquired() as u32
    }

    async fn close(&self) -> DbResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
