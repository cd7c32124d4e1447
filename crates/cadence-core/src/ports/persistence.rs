//! PersistenceProvider port - datastore-facing primitives of an iterator.
//!
//! The provider is the only component that mutates the schedule field during a
//! claim. Correctness of concurrent claiming (across workers, pumps and
//! replicas) rests entirely on `claim_next` being one atomic conditional update.

use async_trait::async_trait;

use crate::domain::filter::Filter;
use crate::domain::schedule::{EpochMillis, Schedule, SchedulingPolicy};
use crate::domain::{PersistentIterable, ProviderError};

/// Provider-neutral description of a candidate query.
///
/// Matches entities of `collection` whose `field_name` is absent or has its
/// earliest value strictly before `as_of`, intersected with `filter`, sorted
/// ascending by the earliest value (absent first). Without `as_of` it is the
/// whole filtered, sorted collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub collection: &'static str,
    pub field_name: String,
    pub filter: Option<Filter>,
    pub as_of: Option<EpochMillis>,
}

/// Result of [`PersistenceProvider::replace_entity_field`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSwap {
    Replaced,

    /// The stored schedule no longer matched; `current` is what is stored now
    /// (`None` when the field is unset or the entity is gone).
    Conflict { current: Option<Schedule> },
}

impl CandidateQuery {
    pub fn new(collection: &'static str, field_name: impl Into<String>) -> Self {
        Self {
            collection,
            field_name: field_name.into(),
            filter: None,
            as_of: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<Filter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn as_of(mut self, as_of: Option<EpochMillis>) -> Self {
        self.as_of = as_of;
        self
    }
}

#[async_trait]
pub trait PersistenceProvider<T: PersistentIterable>: Send + Sync {
    /// Builds the candidate query for `T`.
    fn create_candidate_query(
        &self,
        field_name: &str,
        filter: Option<&Filter>,
        as_of: Option<EpochMillis>,
    ) -> CandidateQuery {
        CandidateQuery::new(T::COLLECTION, field_name)
            .with_filter(filter.cloned())
            .as_of(as_of)
    }

    /// Executes a candidate query without claiming anything.
    async fn list_candidates(
        &self,
        query: &CandidateQuery,
        limit: usize,
    ) -> Result<Vec<T>, ProviderError>;

    /// Atomically selects the best due candidate and advances its schedule.
    ///
    /// Returns the entity as it was *before* the update, or `None` when nothing
    /// is due or the candidate was claimed by someone else first.
    async fn claim_next(
        &self,
        base: EpochMillis,
        policy: &SchedulingPolicy,
        field_name: &str,
        filter: Option<&Filter>,
    ) -> Result<Option<T>, ProviderError>;

    /// Unconditionally overwrites (or, with `None`, unsets) a schedule field.
    async fn update_entity_field(
        &self,
        entity: &T,
        schedule: Option<Schedule>,
        field_name: &str,
    ) -> Result<(), ProviderError>;

    /// Overwrites a schedule field only while it still holds `expected`.
    async fn replace_entity_field(
        &self,
        entity: &T,
        expected: &Schedule,
        replacement: Schedule,
        field_name: &str,
    ) -> Result<ScheduleSwap, ProviderError>;

    /// First entity in candidate order, ignoring due-ness. Never mutates.
    async fn find_one(
        &self,
        field_name: &str,
        filter: Option<&Filter>,
    ) -> Result<Option<T>, ProviderError>;

    /// Repairs schedules after the process was suspended.
    ///
    /// Implementations collapse a REGULAR backlog: single-timestamp schedules
    /// earlier than `as_of` are reset to `as_of`, so each overdue entity runs
    /// once rather than once per missed interval. Returns how many were reset.
    async fn recover_after_pause(
        &self,
        _field_name: &str,
        _as_of: EpochMillis,
    ) -> Result<u64, ProviderError> {
        Ok(0)
    }
}
