// src/core/state.rs

//! The shared host aggregate: configuration, the single lock guarding the
//! metrics table and the store connection, the task budget, and the
//! lifecycle stop signal.
//!
//! One mutex guards both the metrics table and the store connection. This is
//! deliberate: the `__METRICS__` snapshot includes counts derived from the
//! store, so both must be observed in the same critical section. Store
//! operations run to completion while holding it and never suspend.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::Config;
use crate::core::HostError;
use crate::core::ffi::FfiRegistry;
use crate::core::metrics::{self, DerivedFields, MetricsSnapshot, MetricsTable};
use crate::core::oracle::ScriptOracle;
use crate::core::store::StateStore;

/// Everything behind the shared lock.
#[derive(Debug)]
pub struct HostCore {
    pub metrics: MetricsTable,
    pub store: StateStore,
    pub ffi: FfiRegistry,
}

impl HostCore {
    /// Splits the metrics table from the store so the transactional routine
    /// can update counters while it owns the connection mutably.
    pub fn split_mut(&mut self) -> (&mut MetricsTable, &mut StateStore) {
        (&mut self.metrics, &mut self.store)
    }
}

#[derive(Debug)]
pub struct ServerState {
    pub config: Config,
    pub oracle: ScriptOracle,
    started_at: Instant,
    core: Mutex<HostCore>,
    /// Counting semaphore realizing the in-flight task budget; the
    /// `inflight_async_tasks` counter is a derived observation of it.
    task_budget: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
    stop_requested: AtomicBool,
}

impl ServerState {
    /// Opens the state store and assembles the aggregate. `config` must
    /// already carry resolved ports.
    pub fn initialize(config: Config) -> Result<Arc<Self>, HostError> {
        let store = StateStore::open(&config.db_path, config.thread_count)?;
        let ffi = FfiRegistry::new();
        let mut table = MetricsTable::new();
        table.set(metrics::FFI_REGISTERED_FUNCTION_COUNT, ffi.len() as i64);

        let oracle = ScriptOracle::new(config.script_path.clone(), &config.interpreter_command);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Arc::new(Self {
            task_budget: Arc::new(Semaphore::new(config.task_budget)),
            oracle,
            started_at: Instant::now(),
            core: Mutex::new(HostCore {
                metrics: table,
                store,
                ffi,
            }),
            shutdown_tx,
            stop_requested: AtomicBool::new(false),
            config,
        }))
    }

    /// Runs `f` under the shared lock. Callers must not block or suspend
    /// inside `f`.
    pub fn with_core<R>(&self, f: impl FnOnce(&mut HostCore) -> R) -> R {
        f(&mut self.core.lock())
    }

    pub fn increment(&self, name: &str, delta: i64) {
        self.with_core(|core| core.metrics.increment(name, delta));
    }

    pub fn add_bytes(&self, name: &str, byte_count: i64) {
        self.with_core(|core| core.metrics.add_bytes(name, byte_count));
    }

    /// Takes a consistent snapshot: counters and store-derived counts from
    /// the same critical section.
    pub fn snapshot(&self) -> Result<MetricsSnapshot, HostError> {
        self.with_core(|core| {
            let thread_route_count = core.store.route_count()?;
            let persisted_state_count = core.store.state_count()?;
            Ok(core.metrics.snapshot(DerivedFields {
                thread_route_count,
                persisted_state_count,
                uptime_ms: self.started_at.elapsed().as_millis() as i64,
                runtime_name: self.config.runtime_name.clone(),
                tcp_port: self.config.tcp_port,
                udp_port: self.config.udp_port,
            }))
        })
    }

    /// Requests lifecycle shutdown. Idempotent; safe from any task.
    pub fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            debug!("Stop requested.");
            let _ = self.shutdown_tx.send(());
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Final commit-and-close of the store, under the lock.
    pub fn close_store(&self) {
        self.with_core(|core| core.store.close());
    }

    /// Waits until no dispatch unit holds a budget permit, bounded by
    /// `timeout`. Returns `false` when stragglers remain.
    pub async fn drain_inflight(&self, timeout: Duration) -> bool {
        let total = self.config.task_budget as u32;
        matches!(
            tokio::time::timeout(timeout, self.task_budget.acquire_many(total)).await,
            Ok(Ok(_))
        )
    }
}

/// Schedules one dispatch unit against the global task budget.
///
/// Returns `None` when the budget is exhausted; the caller emits
/// `ERR_BACKPRESSURE` and counts the drop. On acceptance the unit runs as a
/// spawned task whose future resolves to the dispatch's output, or to `None`
/// when the unit failed. The failure is counted as a task error and the
/// task is still considered complete.
pub fn spawn_dispatch<T, F>(state: &Arc<ServerState>, fut: F) -> Option<JoinHandle<Option<T>>>
where
    T: Send + 'static,
    F: Future<Output = Result<T, HostError>> + Send + 'static,
{
    let permit = state.task_budget.clone().try_acquire_owned().ok()?;
    state.with_core(|core| {
        core.metrics.increment(metrics::INFLIGHT_ASYNC_TASKS, 1);
        core.metrics.increment(metrics::ASYNC_SCHEDULE_COUNT, 1);
    });

    let state = state.clone();
    Some(tokio::spawn(async move {
        let result = fut.await;
        drop(permit);

        let outcome = match result {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Dispatch task failed: {e}");
                state.increment(metrics::ERROR_COUNT, 1);
                None
            }
        };
        state.with_core(|core| {
            core.metrics.increment(metrics::INFLIGHT_ASYNC_TASKS, -1);
            core.metrics.increment(metrics::ASYNC_COMPLETE_COUNT, 1);
        });
        outcome
    }))
}

/// Counts a budget rejection on the shared table.
pub fn note_backpressure_drop(state: &ServerState) {
    state.with_core(|core| {
        core.metrics.increment(metrics::BACKPRESSURE_DROP_COUNT, 1);
        core.metrics.increment(metrics::REJECTED_COMMAND_COUNT, 1);
    });
}
