//! PersistenceIterator - claim and handle, one entity at a time.
//!
//! # フロー
//! 1. `claim()`: PersistenceProvider::claim_next で 1 件 claim（schedule は前進済み）
//! 2. irregular の場合は entity 自身に future timestamps を再計算させて書き戻す
//! 3. `handle()`: Handler を別 task で実行し、失敗・panic を閉じ込める
//!
//! The schedule advance of step 1 is never rolled back: a failing handler
//! is retried at the entity's next computed due time, not immediately.
//!
//! The first claim of a REGULAR iterator collapses the backlog left by
//! downtime before it: every single-timestamp schedule already in the past is
//! moved to just before "now", so an entity that missed many intervals runs
//! once and then resumes its cadence from the restart.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::app::status::PumpStats;
use crate::config::IteratorConfig;
use crate::domain::schedule::duration_millis;
use crate::domain::{
    EpochMillis, Filter, PersistentIterable, ProviderError, Schedule, SchedulingPolicy,
    SchedulingType,
};
use crate::ports::{Clock, EntityProcessController, Handler, PersistenceProvider, ScheduleSwap};

/// Conditional write-backs attempted before a recalculation is dropped.
const RECALCULATION_ATTEMPTS: usize = 3;

/// Result of one CLAIMING step.
#[derive(Debug)]
pub enum Claim<T> {
    Claimed(ClaimedEntity<T>),

    /// Nothing due, or the candidate was claimed by someone else first.
    NoCandidate,

    /// Every in-flight permit is taken; the provider was not asked.
    Throttled,
}

/// An entity claimed by this iterator, with the in-flight permit it holds.
#[derive(Debug)]
pub struct ClaimedEntity<T> {
    /// State of the entity before the claim advanced its schedule.
    pub entity: T,
    pub claimed_at: EpochMillis,
    _permit: Option<OwnedSemaphorePermit>,
}

/// Result of one HANDLING step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Handled,
    /// The handler returned an error or panicked.
    Failed,
    /// The process controller declined the entity.
    Skipped,
}

/// Iterator over one collection: config, schedule field, scope and handler.
///
/// Built with [`IteratorBuilder`](crate::app::IteratorBuilder). Shared by every
/// worker of a pump, or driven directly through [`process`](Self::process).
pub struct PersistenceIterator<T: PersistentIterable> {
    pub(crate) config: IteratorConfig,
    pub(crate) field_name: String,
    pub(crate) filter: Option<Filter>,
    pub(crate) provider: Arc<dyn PersistenceProvider<T>>,
    pub(crate) handler: Arc<dyn Handler<T>>,
    pub(crate) controller: Option<Arc<dyn EntityProcessController<T>>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) semaphore: Option<Arc<Semaphore>>,
    pub(crate) stats: Arc<PumpStats>,
    pub(crate) started: OnceCell<()>,
}

impl<T: PersistentIterable> PersistenceIterator<T> {
    pub fn config(&self) -> &IteratorConfig {
        &self.config
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn stats(&self) -> Arc<PumpStats> {
        Arc::clone(&self.stats)
    }

    pub(crate) fn now_millis(&self) -> EpochMillis {
        self.clock.now_millis()
    }

    /// First entity in candidate order, due or not. Does not claim.
    pub async fn find_one(&self) -> Result<Option<T>, ProviderError> {
        self.provider
            .find_one(&self.field_name, self.filter.as_ref())
            .await
    }

    /// CLAIMING: claims the best due entity, advancing its schedule.
    pub async fn claim(&self) -> Result<Claim<T>, ProviderError> {
        if let Err(e) = self.recover_on_start().await {
            self.stats.record_provider_error();
            return Err(e);
        }

        let permit = match &self.semaphore {
            Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => return Ok(Claim::Throttled),
            },
            None => None,
        };

        let base = self.clock.now_millis();
        let policy = SchedulingPolicy::for_claim(
            self.config.scheduling_type,
            self.config.target_interval,
            self.config.throttle_interval,
            base,
        );

        let entity = match self
            .provider
            .claim_next(base, &policy, &self.field_name, self.filter.as_ref())
            .await
        {
            Ok(Some(entity)) => entity,
            Ok(None) => {
                self.stats.record_idle_poll();
                return Ok(Claim::NoCandidate);
            }
            Err(e) => {
                self.stats.record_provider_error();
                return Err(e);
            }
        };
        self.stats.record_claimed();

        let previous = entity.next_iteration(&self.field_name);
        self.alert_if_overdue(&entity, previous.as_ref(), base);

        if self.config.scheduling_type.is_irregular() {
            self.recalculate(&entity, previous.as_ref(), &policy, base)
                .await;
        }

        Ok(Claim::Claimed(ClaimedEntity {
            entity,
            claimed_at: base,
            _permit: permit,
        }))
    }

    fn alert_if_overdue(&self, entity: &T, previous: Option<&Schedule>, base: EpochMillis) {
        let Some(due) = previous.and_then(Schedule::earliest) else {
            return;
        };
        let delay = base.saturating_sub(due);
        if delay > duration_millis(self.config.acceptable_no_alert_delay) {
            warn!(
                iterator = %self.config.name,
                entity_id = %entity.uuid(),
                delay_ms = delay,
                "entity handled later than the acceptable delay"
            );
        }
    }

    /// Lets an irregular entity produce its next timestamps and writes them back.
    ///
    /// Values produced at or before the claimed one (or the throttle boundary)
    /// are dropped, and the write only lands while the stored schedule is still
    /// the one this claim produced. If another claim moved it in between, the
    /// produced values are merged into the newer schedule instead, so nothing
    /// another worker consumed comes back.
    async fn recalculate(
        &self,
        entity: &T,
        previous: Option<&Schedule>,
        policy: &SchedulingPolicy,
        base: EpochMillis,
    ) {
        let (skip_missing, floor) = match policy {
            SchedulingPolicy::IrregularSkipMissed { throttle_boundary } => {
                (true, *throttle_boundary)
            }
            _ => (false, previous.and_then(Schedule::earliest).unwrap_or(base)),
        };

        let mut scratch = entity.clone();
        let Some(produced) =
            scratch.recalculate_next_iterations(&self.field_name, skip_missing, floor)
        else {
            return;
        };

        let produced: Vec<EpochMillis> = produced
            .into_iter()
            .filter(|value| *value > floor)
            .collect();
        let mut expected = policy.advance(previous, base);
        for _ in 0..RECALCULATION_ATTEMPTS {
            let mut values = expected.values();
            values.extend(produced.iter().copied());
            let merged = Schedule::irregular(values);
            if merged == expected {
                return;
            }

            match self
                .provider
                .replace_entity_field(entity, &expected, merged, &self.field_name)
                .await
            {
                Ok(ScheduleSwap::Replaced) => return,
                Ok(ScheduleSwap::Conflict {
                    current: Some(current),
                }) => {
                    debug!(
                        iterator = %self.config.name,
                        entity_id = %entity.uuid(),
                        "schedule moved by another claim, merging again"
                    );
                    expected = current;
                }
                // unset or deleted since the claim: nothing to extend
                Ok(ScheduleSwap::Conflict { current: None }) => return,
                Err(e) => {
                    self.stats.record_provider_error();
                    warn!(
                        iterator = %self.config.name,
                        entity_id = %entity.uuid(),
                        error = %e,
                        "failed to write recalculated iterations"
                    );
                    return;
                }
            }
        }
        warn!(
            iterator = %self.config.name,
            entity_id = %entity.uuid(),
            attempts = RECALCULATION_ATTEMPTS,
            "recalculated iterations dropped after repeated conflicts"
        );
    }

    /// HANDLING: runs the handler to completion. Never fails.
    pub async fn handle(&self, claimed: ClaimedEntity<T>) -> HandleOutcome {
        let ClaimedEntity {
            entity, _permit, ..
        } = claimed;
        let entity_id = entity.uuid().to_string();

        if let Some(controller) = &self.controller
            && !controller.should_process(&entity)
        {
            self.stats.record_skipped();
            debug!(iterator = %self.config.name, entity_id = %entity_id, "entity skipped by process controller");
            return HandleOutcome::Skipped;
        }

        let handler = Arc::clone(&self.handler);
        let started = Instant::now();
        let result = tokio::spawn(async move { handler.handle(entity).await }).await;
        let elapsed = started.elapsed();

        if let Some(limit) = self.config.acceptable_execution_time
            && elapsed > limit
        {
            warn!(
                iterator = %self.config.name,
                entity_id = %entity_id,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "handler exceeded the acceptable execution time"
            );
        }

        match result {
            Ok(Ok(())) => {
                self.stats.record_handled();
                HandleOutcome::Handled
            }
            Ok(Err(e)) => {
                self.stats.record_handler_failure();
                error!(
                    iterator = %self.config.name,
                    entity_id = %entity_id,
                    kind = %e.kind(),
                    error = %e,
                    "handler failed"
                );
                HandleOutcome::Failed
            }
            Err(join_error) => {
                self.stats.record_handler_failure();
                let cause = if join_error.is_panic() {
                    "handler panicked"
                } else {
                    "handler task cancelled"
                };
                error!(
                    iterator = %self.config.name,
                    entity_id = %entity_id,
                    error = %join_error,
                    "{cause}"
                );
                HandleOutcome::Failed
            }
        }
    }

    /// Claims and handles on the caller's task until nothing is due.
    ///
    /// Returns how many entities were claimed. Handler failures do not stop
    /// the drain; provider errors do.
    pub async fn process(&self) -> Result<usize, ProviderError> {
        let mut claimed = 0;
        while let Claim::Claimed(entity) = self.claim().await? {
            claimed += 1;
            self.handle(entity).await;
        }
        Ok(claimed)
    }

    /// Runs the REGULAR backlog collapse once per iterator, before its first
    /// claim. A failed attempt is retried by the next claim.
    async fn recover_on_start(&self) -> Result<(), ProviderError> {
        if self.config.scheduling_type != SchedulingType::Regular {
            return Ok(());
        }
        self.started
            .get_or_try_init(|| async {
                let as_of = self.clock.now_millis().saturating_sub(1);
                let recovered = self
                    .provider
                    .recover_after_pause(&self.field_name, as_of)
                    .await?;
                self.stats.record_recovered(recovered);
                if recovered > 0 {
                    info!(iterator = %self.config.name, recovered, "collapsed overdue schedules on start");
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Collapses a REGULAR backlog after the process was suspended.
    pub(crate) async fn recover_after_pause(&self, as_of: EpochMillis) {
        if self.config.scheduling_type != SchedulingType::Regular {
            return;
        }
        match self
            .provider
            .recover_after_pause(&self.field_name, as_of)
            .await
        {
            Ok(recovered) => {
                self.stats.record_recovered(recovered);
                info!(iterator = %self.config.name, recovered, "recovered schedules after pause");
            }
            Err(e) => {
                self.stats.record_provider_error();
                warn!(iterator = %self.config.name, error = %e, "pause recovery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use tokio::sync::Mutex;

    use super::*;
    use crate::app::IteratorBuilder;
    use crate::domain::HandlerError;
    use crate::impls::InMemoryPersistenceProvider;
    use crate::ports::ManualClock;

    const FIELD: &str = "nextIteration";
    const T0: EpochMillis = 1_700_000_000_000;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Task {
        uuid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_iteration: Option<Schedule>,
        #[serde(default)]
        produce: Vec<EpochMillis>,
    }

    impl PersistentIterable for Task {
        const COLLECTION: &'static str = "tasks";

        fn uuid(&self) -> &str {
            &self.uuid
        }

        fn recalculate_next_iterations(
            &mut self,
            _field_name: &str,
            _skip_missing: bool,
            _throttled: EpochMillis,
        ) -> Option<Vec<EpochMillis>> {
            (!self.produce.is_empty()).then(|| self.produce.clone())
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail: bool,
        panic: bool,
    }

    #[async_trait]
    impl Handler<Task> for Arc<Recorder> {
        async fn handle(&self, entity: Task) -> Result<(), HandlerError> {
            self.seen.lock().await.push(entity.uuid.clone());
            if self.panic {
                panic!("boom");
            }
            if self.fail {
                return Err(HandlerError::transient("sync api down"));
            }
            Ok(())
        }
    }

    fn task(uuid: &str, next: Option<Schedule>) -> Task {
        Task {
            uuid: uuid.into(),
            next_iteration: next,
            produce: vec![],
        }
    }

    fn iterator(
        config: IteratorConfig,
        store: &InMemoryPersistenceProvider,
        handler: Arc<Recorder>,
    ) -> PersistenceIterator<Task> {
        IteratorBuilder::new(config)
            .field_name(FIELD)
            .provider(store.clone())
            .handler(handler)
            .clock(ManualClock::new(T0))
            .build()
            .unwrap()
    }

    fn regular() -> IteratorConfig {
        IteratorConfig {
            target_interval: Duration::from_secs(5),
            ..IteratorConfig::new("tasks", SchedulingType::Regular)
        }
    }

    #[tokio::test]
    async fn claim_returns_pre_image_and_advances_schedule() {
        let store = InMemoryPersistenceProvider::new();
        store.insert(&task("a", None)).await.unwrap();
        let it = iterator(regular(), &store, Arc::default());

        let Claim::Claimed(claimed) = it.claim().await.unwrap() else {
            panic!("expected a claim");
        };
        assert_eq!(claimed.entity.uuid, "a");
        assert!(claimed.entity.next_iteration.is_none());
        assert_eq!(claimed.claimed_at, T0);

        let stored = store.get::<Task>("a").await.unwrap().unwrap();
        assert_eq!(stored.next_iteration, Some(Schedule::At(T0 + 5_000)));
        assert!(matches!(it.claim().await.unwrap(), Claim::NoCandidate));
    }

    #[tokio::test]
    async fn failing_handler_keeps_the_advance() {
        let store = InMemoryPersistenceProvider::new();
        store.insert(&task("a", None)).await.unwrap();
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let it = iterator(regular(), &store, Arc::clone(&recorder));

        assert_eq!(it.process().await.unwrap(), 1);
        let stored = store.get::<Task>("a").await.unwrap().unwrap();
        assert_eq!(stored.next_iteration, Some(Schedule::At(T0 + 5_000)));

        let status = it.stats().snapshot();
        assert_eq!(status.claimed, 1);
        assert_eq!(status.handled, 0);
        assert_eq!(status.handler_failures, 1);
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let store = InMemoryPersistenceProvider::new();
        store.insert(&task("a", None)).await.unwrap();
        store.insert(&task("b", None)).await.unwrap();
        let recorder = Arc::new(Recorder {
            panic: true,
            ..Recorder::default()
        });
        let it = iterator(regular(), &store, Arc::clone(&recorder));

        assert_eq!(it.process().await.unwrap(), 2);
        assert_eq!(recorder.seen.lock().await.len(), 2);
        assert_eq!(it.stats().snapshot().handler_failures, 2);
    }

    #[tokio::test]
    async fn process_controller_skips_but_claim_stands() {
        let store = InMemoryPersistenceProvider::new();
        store.insert(&task("keep", None)).await.unwrap();
        store.insert(&task("skip", None)).await.unwrap();
        let recorder = Arc::new(Recorder::default());
        let it = IteratorBuilder::<Task>::new(regular())
            .field_name(FIELD)
            .provider(store.clone())
            .handler(Arc::clone(&recorder))
            .process_controller(|task: &Task| task.uuid != "skip")
            .clock(ManualClock::new(T0))
            .build()
            .unwrap();

        assert_eq!(it.process().await.unwrap(), 2);
        assert_eq!(*recorder.seen.lock().await, vec!["keep".to_string()]);
        assert_eq!(it.stats().snapshot().skipped, 1);
        let skipped = store.get::<Task>("skip").await.unwrap().unwrap();
        assert_eq!(skipped.next_iteration, Some(Schedule::At(T0 + 5_000)));
    }

    #[tokio::test]
    async fn max_in_flight_throttles_claims() {
        let store = InMemoryPersistenceProvider::new();
        store.insert(&task("a", None)).await.unwrap();
        store.insert(&task("b", None)).await.unwrap();
        let config = IteratorConfig {
            max_in_flight: Some(1),
            ..regular()
        };
        let it = iterator(config, &store, Arc::default());

        let Claim::Claimed(first) = it.claim().await.unwrap() else {
            panic!("expected a claim");
        };
        assert!(matches!(it.claim().await.unwrap(), Claim::Throttled));

        it.handle(first).await;
        assert!(matches!(it.claim().await.unwrap(), Claim::Claimed(_)));
    }

    #[tokio::test]
    async fn irregular_claim_merges_recalculated_iterations() {
        let store = InMemoryPersistenceProvider::new();
        let mut entity = task("a", Some(Schedule::Pending(vec![T0 - 10, T0 + 100])));
        entity.produce = vec![T0 - 10, T0 + 100, T0 + 200];
        store.insert(&entity).await.unwrap();
        let it = iterator(
            IteratorConfig::new("tasks", SchedulingType::Irregular),
            &store,
            Arc::default(),
        );

        assert!(matches!(it.claim().await.unwrap(), Claim::Claimed(_)));
        let stored = store.get::<Task>("a").await.unwrap().unwrap();
        assert_eq!(
            stored.next_iteration,
            Some(Schedule::Pending(vec![T0 + 100, T0 + 200]))
        );
    }

    #[tokio::test]
    async fn skip_missed_claim_drops_values_inside_the_throttle_window() {
        let store = InMemoryPersistenceProvider::new();
        let mut entity = task("a", Some(Schedule::Pending(vec![T0 - 20, T0 - 10])));
        entity.produce = vec![T0 + 500, T0 + 1_500];
        store.insert(&entity).await.unwrap();
        let config = IteratorConfig {
            throttle_interval: Duration::from_secs(1),
            ..IteratorConfig::new("tasks", SchedulingType::IrregularSkipMissed)
        };
        let it = iterator(config, &store, Arc::default());

        assert!(matches!(it.claim().await.unwrap(), Claim::Claimed(_)));
        let stored = store.get::<Task>("a").await.unwrap().unwrap();
        assert_eq!(stored.next_iteration, Some(Schedule::Pending(vec![T0 + 1_500])));
    }

    #[tokio::test]
    async fn provider_errors_are_counted_and_returned() {
        let store = InMemoryPersistenceProvider::new();
        store.set_unavailable(Some("connection refused")).await;
        let it = iterator(regular(), &store, Arc::default());

        assert!(matches!(it.claim().await, Err(ProviderError::Unavailable(_))));
        assert!(it.process().await.is_err());
        assert_eq!(it.stats().snapshot().provider_errors, 2);
    }

    #[tokio::test]
    async fn first_claim_collapses_backlog_from_downtime() {
        let store = InMemoryPersistenceProvider::new();
        store
            .insert(&task("stale", Some(Schedule::At(T0 - 3_600_000))))
            .await
            .unwrap();
        let it = iterator(regular(), &store, Arc::default());

        // one run, not one per missed 5s interval
        assert_eq!(it.process().await.unwrap(), 1);
        let stale = store.get::<Task>("stale").await.unwrap().unwrap();
        assert_eq!(stale.next_iteration, Some(Schedule::At(T0 - 1 + 5_000)));
        assert_eq!(it.stats().snapshot().recovered, 1);

        // only once per iterator
        store.insert(&task("later", Some(Schedule::At(T0 - 20_000)))).await.unwrap();
        assert_eq!(it.process().await.unwrap(), 4);
        assert_eq!(it.stats().snapshot().recovered, 1);
    }

    /// Runs one competing claim right before the first conditional write-back.
    struct ContendedStore {
        inner: InMemoryPersistenceProvider,
        competed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl PersistenceProvider<Task> for ContendedStore {
        async fn list_candidates(
            &self,
            query: &crate::ports::CandidateQuery,
            limit: usize,
        ) -> Result<Vec<Task>, ProviderError> {
            PersistenceProvider::<Task>::list_candidates(&self.inner, query, limit).await
        }

        async fn claim_next(
            &self,
            base: EpochMillis,
            policy: &SchedulingPolicy,
            field_name: &str,
            filter: Option<&Filter>,
        ) -> Result<Option<Task>, ProviderError> {
            PersistenceProvider::<Task>::claim_next(&self.inner, base, policy, field_name, filter).await
        }

        async fn update_entity_field(
            &self,
            entity: &Task,
            schedule: Option<Schedule>,
            field_name: &str,
        ) -> Result<(), ProviderError> {
            PersistenceProvider::<Task>::update_entity_field(&self.inner, entity, schedule, field_name).await
        }

        async fn replace_entity_field(
            &self,
            entity: &Task,
            expected: &Schedule,
            replacement: Schedule,
            field_name: &str,
        ) -> Result<ScheduleSwap, ProviderError> {
            if !self.competed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                let other = PersistenceProvider::<Task>::claim_next(
                    &self.inner,
                    T0,
                    &SchedulingPolicy::Irregular,
                    field_name,
                    None,
                )
                .await?;
                assert!(other.is_some());
            }
            PersistenceProvider::<Task>::replace_entity_field(
                &self.inner,
                entity,
                expected,
                replacement,
                field_name,
            )
            .await
        }

        async fn find_one(
            &self,
            field_name: &str,
            filter: Option<&Filter>,
        ) -> Result<Option<Task>, ProviderError> {
            PersistenceProvider::<Task>::find_one(&self.inner, field_name, filter).await
        }
    }

    #[tokio::test]
    async fn recalculation_never_requeues_a_value_claimed_concurrently() {
        let store = InMemoryPersistenceProvider::new();
        let mut entity = task("a", Some(Schedule::Pending(vec![T0 - 30, T0 - 20, T0 + 10])));
        entity.produce = vec![T0 + 500];
        store.insert(&entity).await.unwrap();
        let it = IteratorBuilder::<Task>::new(IteratorConfig::new("tasks", SchedulingType::Irregular))
            .field_name(FIELD)
            .provider(ContendedStore {
                inner: store.clone(),
                competed: Default::default(),
            })
            .handler(Arc::new(Recorder::default()))
            .clock(ManualClock::new(T0))
            .build()
            .unwrap();

        // this claim consumes T0-30; the competing one consumes T0-20
        assert!(matches!(it.claim().await.unwrap(), Claim::Claimed(_)));
        let stored = store.get::<Task>("a").await.unwrap().unwrap();
        assert_eq!(
            stored.next_iteration,
            Some(Schedule::Pending(vec![T0 + 10, T0 + 500]))
        );
    }

    #[tokio::test]
    async fn pause_recovery_collapses_regular_backlog() {
        let store = InMemoryPersistenceProvider::new();
        store.insert(&task("old", Some(Schedule::At(T0 - 60_000)))).await.unwrap();
        store.insert(&task("new", Some(Schedule::At(T0 + 60_000)))).await.unwrap();
        let it = iterator(regular(), &store, Arc::default());

        it.recover_after_pause(T0).await;
        assert_eq!(it.stats().snapshot().recovered, 1);
        let old = store.get::<Task>("old").await.unwrap().unwrap();
        assert_eq!(old.next_iteration, Some(Schedule::At(T0)));
    }

    #[tokio::test]
    async fn find_one_does_not_claim() {
        let store = InMemoryPersistenceProvider::new();
        store.insert(&task("a", None)).await.unwrap();
        let it = iterator(regular(), &store, Arc::default());

        assert_eq!(it.find_one().await.unwrap().map(|t| t.uuid), Some("a".into()));
        let stored = store.get::<Task>("a").await.unwrap().unwrap();
        assert!(stored.next_iteration.is_none());
    }
}
