//! WorkerLoop - IDLE → CLAIMING → HANDLING → IDLE
//!
//! # 設計原則
//! - shutdown は IDLE の sleep でのみ観測する（HANDLING 中の entity は最後まで実行）
//! - provider エラーで worker を落とさない（back-off して再試行）
//! - entity を処理した直後は sleep しない（まだ due な entity が残っている可能性）

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::app::backoff::Backoff;
use crate::app::iterator::{Claim, PersistenceIterator};
use crate::domain::schedule::duration_millis;
use crate::domain::{IdleReason, LoopState, PersistentIterable, WorkerId};

pub struct WorkerLoop<T: PersistentIterable> {
    worker_id: WorkerId,
    iterator: Arc<PersistenceIterator<T>>,
    poll_interval: Duration,
    backoff: Backoff,
    shutdown_rx: watch::Receiver<bool>,
    state: LoopState,
}

impl<T: PersistentIterable> WorkerLoop<T> {
    pub fn new(
        iterator: Arc<PersistenceIterator<T>>,
        poll_interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let backoff = Backoff::new(iterator.config().error_backoff, poll_interval);
        Self {
            worker_id: WorkerId::generate(),
            iterator,
            poll_interval,
            backoff,
            shutdown_rx,
            state: LoopState::Idle,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Runs until shutdown is requested (or the shutdown sender is dropped).
    pub async fn run(mut self) {
        let name = self.iterator.config().name.clone();
        info!(iterator = %name, worker_id = %self.worker_id, "worker started");

        let mut reason = IdleReason::Started;
        let mut failures: u32 = 0;
        loop {
            let sleep_for = self.idle_duration(reason, failures);
            let slept_from = self.iterator.now_millis();
            if self.idle(sleep_for).await {
                break;
            }
            self.detect_pause(slept_from, sleep_for).await;

            self.transition(LoopState::Claiming);
            reason = match self.iterator.claim().await {
                Ok(Claim::Claimed(claimed)) => {
                    failures = 0;
                    self.transition(LoopState::Handling);
                    self.iterator.handle(claimed).await;
                    IdleReason::Handled
                }
                Ok(Claim::NoCandidate) => {
                    failures = 0;
                    IdleReason::NoCandidate
                }
                Ok(Claim::Throttled) => IdleReason::Throttled,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(
                        iterator = %name,
                        worker_id = %self.worker_id,
                        failures,
                        error = %e,
                        "claim failed, backing off"
                    );
                    IdleReason::ProviderUnavailable
                }
            };
            self.transition(LoopState::Idle);
        }

        info!(iterator = %name, worker_id = %self.worker_id, "worker stopped");
    }

    fn transition(&mut self, next: LoopState) {
        trace!(worker_id = %self.worker_id, from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    fn idle_duration(&self, reason: IdleReason, failures: u32) -> Duration {
        if reason.waits_full_interval() {
            return self.poll_interval;
        }
        match reason {
            IdleReason::Started if self.iterator.config().redistribute => {
                let max = duration_millis(self.poll_interval).max(1);
                let jitter = rand::thread_rng().gen_range(0..max);
                Duration::from_millis(jitter.unsigned_abs())
            }
            IdleReason::ProviderUnavailable => self.backoff.next_delay(failures),
            _ => Duration::ZERO,
        }
    }

    /// IDLE: sleeps, returning `true` when shutdown was requested.
    async fn idle(&mut self, duration: Duration) -> bool {
        if *self.shutdown_rx.borrow() {
            return true;
        }
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return *self.shutdown_rx.borrow();
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = self.shutdown_rx.changed() => {
                // a dropped sender also means shutdown
                changed.is_err() || *self.shutdown_rx.borrow()
            }
        }
    }

    /// A sleep that took far longer on the wall clock than requested means
    /// the process was suspended; REGULAR backlogs are collapsed.
    async fn detect_pause(&self, slept_from: i64, requested: Duration) {
        let now = self.iterator.now_millis();
        let gap = now.saturating_sub(slept_from);
        let tolerated = duration_millis(requested)
            .saturating_add(duration_millis(self.iterator.config().target_interval));
        if gap > tolerated {
            debug!(
                iterator = %self.iterator.config().name,
                worker_id = %self.worker_id,
                gap_ms = gap,
                "pause detected"
            );
            self.iterator.recover_after_pause(now).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::app::IteratorBuilder;
    use crate::config::IteratorConfig;
    use crate::domain::{HandlerError, Schedule, SchedulingType};
    use crate::impls::InMemoryPersistenceProvider;
    use crate::ports::Handler;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Job {
        uuid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_iteration: Option<Schedule>,
    }

    impl PersistentIterable for Job {
        const COLLECTION: &'static str = "jobs";

        fn uuid(&self) -> &str {
            &self.uuid
        }
    }

    struct AlwaysOk;

    #[async_trait]
    impl Handler<Job> for AlwaysOk {
        async fn handle(&self, _entity: Job) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn iterator(store: &InMemoryPersistenceProvider, config: IteratorConfig) -> Arc<PersistenceIterator<Job>> {
        Arc::new(
            IteratorBuilder::new(config)
                .field_name("nextIteration")
                .provider(store.clone())
                .handler(AlwaysOk)
                .build()
                .unwrap(),
        )
    }

    fn config() -> IteratorConfig {
        IteratorConfig {
            poll_interval: Duration::from_millis(20),
            ..IteratorConfig::new("jobs", SchedulingType::Regular)
        }
    }

    #[tokio::test]
    async fn idle_durations_follow_the_idle_reason() {
        let store = InMemoryPersistenceProvider::new();
        let (_tx, rx) = watch::channel(false);
        let worker = WorkerLoop::new(iterator(&store, config()), Duration::from_millis(20), rx);

        assert_eq!(worker.idle_duration(IdleReason::Started, 0), Duration::ZERO);
        assert_eq!(worker.idle_duration(IdleReason::Handled, 0), Duration::ZERO);
        assert_eq!(worker.idle_duration(IdleReason::NoCandidate, 0), Duration::from_millis(20));
        assert_eq!(worker.idle_duration(IdleReason::Throttled, 0), Duration::from_millis(20));
        // back-off base (100ms) is capped at the poll interval
        assert_eq!(
            worker.idle_duration(IdleReason::ProviderUnavailable, 1),
            Duration::from_millis(20)
        );
    }

    #[tokio::test]
    async fn redistribute_jitters_the_first_poll_within_one_interval() {
        let store = InMemoryPersistenceProvider::new();
        let (_tx, rx) = watch::channel(false);
        let config = IteratorConfig {
            redistribute: true,
            ..config()
        };
        let worker = WorkerLoop::new(iterator(&store, config), Duration::from_millis(20), rx);

        for _ in 0..50 {
            assert!(worker.idle_duration(IdleReason::Started, 0) < Duration::from_millis(20));
        }
    }

    #[tokio::test]
    async fn worker_handles_due_entities_and_stops_on_shutdown() {
        let store = InMemoryPersistenceProvider::new();
        for id in ["a", "b", "c"] {
            store
                .insert(&Job { uuid: id.into(), next_iteration: None })
                .await
                .unwrap();
        }
        let iterator = iterator(&store, config());
        let (tx, rx) = watch::channel(false);
        let join = tokio::spawn(WorkerLoop::new(Arc::clone(&iterator), Duration::from_millis(20), rx).run());

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), join)
            .await
            .expect("worker did not stop")
            .unwrap();

        let status = iterator.stats().snapshot();
        assert_eq!(status.claimed, 3);
        assert_eq!(status.handled, 3);
        assert!(status.idle_polls >= 1);
    }

    #[tokio::test]
    async fn provider_outage_does_not_kill_the_worker() {
        let store = InMemoryPersistenceProvider::new();
        store.set_unavailable(Some("down")).await;
        let iterator = iterator(&store, config());
        let (tx, rx) = watch::channel(false);
        let join = tokio::spawn(WorkerLoop::new(Arc::clone(&iterator), Duration::from_millis(20), rx).run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        store.set_unavailable(None).await;
        store
            .insert(&Job { uuid: "late".into(), next_iteration: None })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), join)
            .await
            .expect("worker did not stop")
            .unwrap();

        let status = iterator.stats().snapshot();
        assert!(status.provider_errors >= 1);
        assert_eq!(status.handled, 1);
    }
}
