//! PumpRegistry - 名前付き pump の登録と管理
//!
//! A pump is one named iterator running on its own multi-thread tokio
//! runtime with `pool_size` worker loops. Each pump gets a dedicated runtime,
//! so a slow handler on one pump cannot starve the workers of another or the
//! host application's executor.
//!
//! The registry is an explicitly constructed value: tests and hosts can keep
//! several independent registries in one process.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::app::iterator::PersistenceIterator;
use crate::app::status::{PumpStats, PumpStatus};
use crate::app::worker_loop::WorkerLoop;
use crate::config::PumpOptions;
use crate::domain::{PersistentIterable, PumpRunId};

#[derive(Debug, thiserror::Error)]
pub enum PumpError {
    #[error("pump '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("pump '{0}' is not registered")]
    NotFound(String),

    #[error("pump '{name}' has invalid options: {reason}")]
    InvalidOptions { name: String, reason: String },

    #[error("failed to start runtime for pump '{name}': {source}")]
    Runtime {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

struct Pump {
    run_id: PumpRunId,
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    runtime: Option<Runtime>,
    stats: Arc<PumpStats>,
}

impl Pump {
    /// Stops polling, waits for in-flight handlers, then releases the runtime.
    async fn stop(mut self) -> PumpStatus {
        // ignore send error: every worker may already be gone
        let _ = self.shutdown_tx.send(true);
        for join in std::mem::take(&mut self.joins) {
            if let Err(e) = join.await {
                warn!(run_id = %self.run_id, error = %e, "worker ended abnormally");
            }
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        self.stats.snapshot()
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// PumpRegistry は pump 名 → 実行中の worker group を管理
///
/// # 使用例
/// ```ignore
/// let mut pumps = PumpRegistry::new();
/// pumps.create_pump(config.pump_options(), iterator)?;
/// // ...
/// pumps.stop_all().await;
/// ```
#[derive(Default)]
pub struct PumpRegistry {
    pumps: HashMap<String, Pump>,
}

impl PumpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `options.pool_size` worker loops for `iterator` on a dedicated
    /// runtime whose threads are named `Iterator-<name>`.
    ///
    /// Returns `Ok(None)` without starting anything when the iterator is
    /// disabled by configuration.
    pub fn create_pump<T: PersistentIterable>(
        &mut self,
        options: PumpOptions,
        iterator: PersistenceIterator<T>,
    ) -> Result<Option<PumpRunId>, PumpError> {
        let name = options.name.clone();
        if !iterator.config().enabled {
            info!(iterator = %name, "iterator disabled, pump not started");
            return Ok(None);
        }
        if self.pumps.contains_key(&name) {
            return Err(PumpError::AlreadyRegistered(name));
        }
        if options.pool_size == 0 || options.poll_interval.is_zero() {
            return Err(PumpError::InvalidOptions {
                name,
                reason: "pool_size and poll_interval must be greater than 0".to_string(),
            });
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(options.pool_size)
            .thread_name(format!("Iterator-{name}"))
            .enable_all()
            .build()
            .map_err(|source| PumpError::Runtime {
                name: name.clone(),
                source,
            })?;

        let run_id = PumpRunId::generate();
        let stats = iterator.stats();
        let iterator = Arc::new(iterator);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(options.pool_size);
        for _ in 0..options.pool_size {
            let worker = WorkerLoop::new(
                Arc::clone(&iterator),
                options.poll_interval,
                shutdown_rx.clone(),
            );
            joins.push(runtime.spawn(worker.run()));
        }

        info!(
            iterator = %name,
            run_id = %run_id,
            pool_size = options.pool_size,
            poll_interval_ms = u64::try_from(options.poll_interval.as_millis()).unwrap_or(u64::MAX),
            redistribute = iterator.config().redistribute,
            scheduling_type = %iterator.config().scheduling_type,
            "pump started"
        );

        self.pumps.insert(
            name,
            Pump {
                run_id,
                shutdown_tx,
                joins,
                runtime: Some(runtime),
                stats,
            },
        );
        Ok(Some(run_id))
    }

    /// Stops one pump and returns its final counters.
    ///
    /// Sleeping workers stop immediately; a worker inside a handler finishes
    /// that entity first.
    pub async fn stop(&mut self, name: &str) -> Result<PumpStatus, PumpError> {
        let pump = self
            .pumps
            .remove(name)
            .ok_or_else(|| PumpError::NotFound(name.to_string()))?;
        let status = pump.stop().await;
        info!(iterator = %name, ?status, "pump stopped");
        Ok(status)
    }

    /// Stops every pump, in name order.
    pub async fn stop_all(&mut self) -> Vec<(String, PumpStatus)> {
        let mut stopped = Vec::with_capacity(self.pumps.len());
        for name in self.names() {
            if let Ok(status) = self.stop(&name).await {
                stopped.push((name, status));
            }
        }
        stopped
    }

    pub fn status(&self, name: &str) -> Result<PumpStatus, PumpError> {
        self.pumps
            .get(name)
            .map(|pump| pump.stats.snapshot())
            .ok_or_else(|| PumpError::NotFound(name.to_string()))
    }

    pub fn run_id(&self, name: &str) -> Option<PumpRunId> {
        self.pumps.get(name).map(|pump| pump.run_id)
    }

    /// Registered pump names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pumps.keys().cloned().collect();
        names.sort();
        names
    }
}
