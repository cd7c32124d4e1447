//! Recommendation refresh (IRREGULAR_SKIP_MISSED).
//!
//! A recommendation keeps a short list of upcoming refresh times. Each claim
//! consumes the due ones, and the entity tops its list back up to
//! [`REFRESH_HORIZON`] entries spaced `refresh_interval_ms` apart. After an
//! outage the stale entries are dropped instead of firing back-to-back.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::app::{BuildError, IteratorBuilder, PersistenceIterator};
use crate::config::IteratorConfig;
use crate::domain::{EpochMillis, HandlerError, PersistentIterable};
use crate::ports::{Handler, PersistenceProvider};

pub const REFRESH_FIELD: &str = "nextRefreshIterations";

/// Number of future refresh times a recommendation keeps queued.
pub const REFRESH_HORIZON: usize = 3;

const DEFAULT_REFRESH_INTERVAL_MS: i64 = 3_600_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub uuid: String,
    pub account_id: String,
    pub resource_type: String,
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_refresh_iterations: Option<Vec<EpochMillis>>,
}

fn default_refresh_interval_ms() -> i64 {
    DEFAULT_REFRESH_INTERVAL_MS
}

impl Recommendation {
    pub fn new(
        uuid: impl Into<String>,
        account_id: impl Into<String>,
        resource_type: impl Into<String>,
        refresh_interval_ms: i64,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            account_id: account_id.into(),
            resource_type: resource_type.into(),
            refresh_interval_ms,
            next_refresh_iterations: None,
        }
    }
}

impl PersistentIterable for Recommendation {
    const COLLECTION: &'static str = "recommendations";

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn recalculate_next_iterations(
        &mut self,
        field_name: &str,
        skip_missing: bool,
        throttled: EpochMillis,
    ) -> Option<Vec<EpochMillis>> {
        if field_name != REFRESH_FIELD {
            return None;
        }

        let interval = self.refresh_interval_ms.max(1);
        let mut values = self.next_refresh_iterations.clone().unwrap_or_default();
        if skip_missing {
            values.retain(|value| *value > throttled);
        }
        values.sort_unstable();
        values.dedup();

        let mut last = values.last().copied().unwrap_or(throttled).max(throttled);
        while values.len() < REFRESH_HORIZON {
            last = last.saturating_add(interval);
            values.push(last);
        }

        self.next_refresh_iterations = Some(values.clone());
        Some(values)
    }
}

/// Recomputes the derived recommendations of one entity.
#[async_trait]
pub trait RecommendationEngine: Send + Sync + 'static {
    /// Returns how many recommendations were produced.
    async fn refresh(&self, recommendation: &Recommendation) -> Result<u32, HandlerError>;
}

/// Counts refreshes per recommendation.
#[derive(Debug, Default)]
pub struct InMemoryRecommendationEngine {
    refreshed: Mutex<HashMap<String, u32>>,
}

impl InMemoryRecommendationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn refresh_count(&self, id: &str) -> u32 {
        self.refreshed.lock().await.get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RecommendationEngine for InMemoryRecommendationEngine {
    async fn refresh(&self, recommendation: &Recommendation) -> Result<u32, HandlerError> {
        if recommendation.resource_type.is_empty() {
            return Err(HandlerError::permanent("recommendation has no resource type"));
        }
        let mut refreshed = self.refreshed.lock().await;
        *refreshed.entry(recommendation.uuid.clone()).or_insert(0) += 1;
        Ok(1)
    }
}

pub struct RecommendationRefreshHandler {
    engine: Arc<dyn RecommendationEngine>,
}

impl RecommendationRefreshHandler {
    pub fn new(engine: Arc<dyn RecommendationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Handler<Recommendation> for RecommendationRefreshHandler {
    async fn handle(&self, recommendation: Recommendation) -> Result<(), HandlerError> {
        let produced = self.engine.refresh(&recommendation).await?;
        debug!(entity_id = %recommendation.uuid, produced, "recommendation refreshed");
        Ok(())
    }
}

/// Recommendation refresh iterator over `provider`.
pub fn recommendation_iterator(
    config: IteratorConfig,
    provider: Arc<dyn PersistenceProvider<Recommendation>>,
    engine: Arc<dyn RecommendationEngine>,
) -> Result<PersistenceIterator<Recommendation>, BuildError> {
    IteratorBuilder::new(config)
        .field_name(REFRESH_FIELD)
        .shared_provider(provider)
        .handler(RecommendationRefreshHandler::new(engine))
        .build()
}
