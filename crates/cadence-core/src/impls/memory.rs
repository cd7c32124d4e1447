//! In-memory persistence provider.
//!
//! A tiny document store: `collection -> id -> JSON document`. Every operation
//! runs under one async mutex, which makes `claim_next` the atomic
//! find-and-modify primitive the iterator relies on.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::filter::{Filter, matches_optional};
use crate::domain::iterable::schedule_from_document;
use crate::domain::schedule::{EpochMillis, Schedule, SchedulingPolicy, is_due};
use crate::domain::{PersistentIterable, ProviderError};
use crate::ports::{CandidateQuery, PersistenceProvider, ScheduleSwap};

type Documents = BTreeMap<String, Value>;

#[derive(Default)]
struct InMemoryStoreState {
    collections: HashMap<&'static str, Documents>,

    /// When set, every operation fails with `ProviderError::Unavailable`.
    unavailable: Option<String>,
}

impl InMemoryStoreState {
    fn check_available(&self) -> Result<(), ProviderError> {
        match &self.unavailable {
            Some(reason) => Err(ProviderError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn documents(&self, collection: &str) -> Option<&Documents> {
        self.collections.get(collection)
    }

    fn documents_mut(&mut self, collection: &'static str) -> &mut Documents {
        self.collections.entry(collection).or_default()
    }
}

/// Candidate ids in query order: earliest schedule first (absent before any
/// timestamp), ties broken by id.
fn candidate_ids(
    documents: &Documents,
    field_name: &str,
    filter: Option<&Filter>,
    as_of: Option<EpochMillis>,
) -> Vec<String> {
    let mut candidates: Vec<(Option<EpochMillis>, &String)> = documents
        .iter()
        .filter(|(_, document)| matches_optional(filter, document))
        .filter_map(|(id, document)| {
            let schedule = schedule_from_document(document, field_name);
            let due = as_of.is_none_or(|as_of| is_due(schedule.as_ref(), as_of));
            due.then(|| (schedule.as_ref().and_then(Schedule::earliest), id))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().map(|(_, id)| id.clone()).collect()
}

/// Writes (or removes) a possibly dotted field, creating parent objects.
fn set_field(document: &mut Value, path: &str, value: Option<Value>) -> Result<(), ProviderError> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = segments
        .pop()
        .filter(|leaf| !leaf.is_empty())
        .ok_or_else(|| ProviderError::InvalidField(path.to_string()))?;

    let mut current = document;
    for segment in segments {
        let object = current
            .as_object_mut()
            .ok_or_else(|| ProviderError::InvalidField(path.to_string()))?;
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }

    let object = current
        .as_object_mut()
        .ok_or_else(|| ProviderError::InvalidField(path.to_string()))?;
    match value {
        Some(value) => {
            object.insert(leaf.to_string(), value);
        }
        None => {
            object.remove(leaf);
        }
    }
    Ok(())
}

fn decode<T: PersistentIterable>(id: &str, document: Value) -> Result<T, ProviderError> {
    serde_json::from_value(document).map_err(|e| ProviderError::Decode {
        collection: T::COLLECTION.to_string(),
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn encode<T: PersistentIterable>(entity: &T) -> Result<Value, ProviderError> {
    serde_json::to_value(entity).map_err(|e| ProviderError::Encode(e.to_string()))
}

fn encode_schedule(schedule: Option<Schedule>) -> Result<Option<Value>, ProviderError> {
    schedule
        .map(|schedule| {
            serde_json::to_value(schedule).map_err(|e| ProviderError::Encode(e.to_string()))
        })
        .transpose()
}

/// In-memory provider for tests, demos and single-process deployments.
///
/// Cloning shares the underlying store.
#[derive(Clone, Default)]
pub struct InMemoryPersistenceProvider {
    state: Arc<Mutex<InMemoryStoreState>>,
}

impl InMemoryPersistenceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entity (the domain service's write path).
    pub async fn insert<T: PersistentIterable>(&self, entity: &T) -> Result<(), ProviderError> {
        let document = encode(entity)?;
        let mut state = self.state.lock().await;
        state.check_available()?;
        state
            .documents_mut(T::COLLECTION)
            .insert(entity.uuid().to_string(), document);
        Ok(())
    }

    pub async fn get<T: PersistentIterable>(&self, id: &str) -> Result<Option<T>, ProviderError> {
        let state = self.state.lock().await;
        state.check_available()?;
        state
            .documents(T::COLLECTION)
            .and_then(|documents| documents.get(id))
            .cloned()
            .map(|document| decode::<T>(id, document))
            .transpose()
    }

    /// Deletes an entity; it silently drops out of future candidate queries.
    pub async fn remove<T: PersistentIterable>(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        state.documents_mut(T::COLLECTION).remove(id).is_some()
    }

    pub async fn len<T: PersistentIterable>(&self) -> usize {
        let state = self.state.lock().await;
        state.documents(T::COLLECTION).map_or(0, BTreeMap::len)
    }

    /// Simulates a datastore outage (`Some(reason)`) or recovery (`None`).
    pub async fn set_unavailable(&self, reason: Option<&str>) {
        let mut state = self.state.lock().await;
        state.unavailable = reason.map(str::to_string);
    }
}

#[async_trait]
impl<T: PersistentIterable> PersistenceProvider<T> for InMemoryPersistenceProvider {
    async fn list_candidates(
        &self,
        query: &CandidateQuery,
        limit: usize,
    ) -> Result<Vec<T>, ProviderError> {
        let state = self.state.lock().await;
        state.check_available()?;
        let Some(documents) = state.documents(query.collection) else {
            return Ok(Vec::new());
        };

        candidate_ids(documents, &query.field_name, query.filter.as_ref(), query.as_of)
            .into_iter()
            .take(limit)
            .filter_map(|id| documents.get(&id).cloned().map(|doc| (id, doc)))
            .map(|(id, document)| decode::<T>(&id, document))
            .collect()
    }

    async fn claim_next(
        &self,
        base: EpochMillis,
        policy: &SchedulingPolicy,
        field_name: &str,
        filter: Option<&Filter>,
    ) -> Result<Option<T>, ProviderError> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        let documents = state.documents_mut(T::COLLECTION);
        let Some(id) = candidate_ids(documents, field_name, filter, Some(base))
            .into_iter()
            .next()
        else {
            return Ok(None);
        };
        let Some(document) = documents.get_mut(&id) else {
            return Ok(None);
        };

        let pre_image = document.clone();
        let current = schedule_from_document(document, field_name);
        let next = policy.advance(current.as_ref(), base);
        set_field(document, field_name, encode_schedule(Some(next.clone()))?)?;
        debug!(
            collection = T::COLLECTION,
            entity_id = %id,
            previous = ?current,
            next = ?next,
            "claimed entity"
        );

        // The advance stands even if the document no longer decodes, so a
        // malformed entity cannot pin the head of the queue.
        decode::<T>(&id, pre_image).map(Some)
    }

    async fn update_entity_field(
        &self,
        entity: &T,
        schedule: Option<Schedule>,
        field_name: &str,
    ) -> Result<(), ProviderError> {
        let value = encode_schedule(schedule)?;
        let mut state = self.state.lock().await;
        state.check_available()?;
        // Entities deleted in the meantime are not resurrected.
        if let Some(document) = state.documents_mut(T::COLLECTION).get_mut(entity.uuid()) {
            set_field(document, field_name, value)?;
        }
        Ok(())
    }

    async fn replace_entity_field(
        &self,
        entity: &T,
        expected: &Schedule,
        replacement: Schedule,
        field_name: &str,
    ) -> Result<ScheduleSwap, ProviderError> {
        let value = encode_schedule(Some(replacement))?;
        let mut state = self.state.lock().await;
        state.check_available()?;
        let Some(document) = state.documents_mut(T::COLLECTION).get_mut(entity.uuid()) else {
            return Ok(ScheduleSwap::Conflict { current: None });
        };

        let current = schedule_from_document(document, field_name);
        if current.as_ref() != Some(expected) {
            return Ok(ScheduleSwap::Conflict { current });
        }
        set_field(document, field_name, value)?;
        Ok(ScheduleSwap::Replaced)
    }

    async fn find_one(
        &self,
        field_name: &str,
        filter: Option<&Filter>,
    ) -> Result<Option<T>, ProviderError> {
        let state = self.state.lock().await;
        state.check_available()?;
        let Some(documents) = state.documents(T::COLLECTION) else {
            return Ok(None);
        };
        candidate_ids(documents, field_name, filter, None)
            .into_iter()
            .next()
            .and_then(|id| documents.get(&id).cloned().map(|doc| (id, doc)))
            .map(|(id, document)| decode::<T>(&id, document))
            .transpose()
    }

    async fn recover_after_pause(
        &self,
        field_name: &str,
        as_of: EpochMillis,
    ) -> Result<u64, ProviderError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        let mut repaired = 0;
        for document in state.documents_mut(T::COLLECTION).values_mut() {
            if let Some(Schedule::At(at)) = schedule_from_document(document, field_name)
                && at < as_of
            {
                set_field(document, field_name, Some(Value::from(as_of)))?;
                repaired += 1;
            }
        }
        Ok(repaired)
    }
}
