//! Resource group reconciliation (REGULAR).
//!
//! Every unmanaged resource group is synced against an external API once per
//! target interval. Managed groups are reconciled elsewhere and are filtered
//! out of the iterator's scope.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::app::{BuildError, IteratorBuilder, PersistenceIterator};
use crate::config::IteratorConfig;
use crate::domain::schedule::duration_millis;
use crate::domain::{EpochMillis, Filter, HandlerError, PersistentIterable, Schedule};
use crate::ports::{Clock, Handler, PersistenceProvider, SystemClock};

pub const RECONCILIATION_FIELD: &str = "nextReconciliationIterationAt";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroup {
    pub uuid: String,
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub managed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_reconciliation_iteration_at: Option<EpochMillis>,
}

impl ResourceGroup {
    pub fn new(uuid: impl Into<String>, account_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            account_id: account_id.into(),
            name: name.into(),
            managed: false,
            next_reconciliation_iteration_at: None,
        }
    }
}

impl PersistentIterable for ResourceGroup {
    const COLLECTION: &'static str = "resource_groups";

    fn uuid(&self) -> &str {
        &self.uuid
    }
}

/// Iterator scope: everything except managed groups.
pub fn unmanaged() -> Filter {
    Filter::ne("managed", true)
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    /// The sync API could not be reached; worth retrying soon.
    #[error("sync api unavailable: {0}")]
    Unavailable(String),

    #[error("sync rejected: {0}")]
    Rejected(String),
}

/// External API resource groups are synced against.
#[async_trait]
pub trait ResourceGroupSyncClient: Send + Sync + 'static {
    async fn sync(&self, group: &ResourceGroup) -> Result<(), SyncError>;
}

/// Records synced groups; fails on demand.
#[derive(Debug, Default)]
pub struct InMemorySyncClient {
    synced: Mutex<Vec<String>>,
    unavailable: Mutex<HashSet<String>>,
    rejected: Mutex<HashSet<String>>,
}

impl InMemorySyncClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids synced so far, in call order (repeats included).
    pub async fn synced(&self) -> Vec<String> {
        self.synced.lock().await.clone()
    }

    pub async fn fail_unavailable(&self, id: &str) {
        self.unavailable.lock().await.insert(id.to_string());
    }

    pub async fn fail_rejected(&self, id: &str) {
        self.rejected.lock().await.insert(id.to_string());
    }

    pub async fn recover(&self, id: &str) {
        self.unavailable.lock().await.remove(id);
        self.rejected.lock().await.remove(id);
    }
}

#[async_trait]
impl ResourceGroupSyncClient for InMemorySyncClient {
    async fn sync(&self, group: &ResourceGroup) -> Result<(), SyncError> {
        self.synced.lock().await.push(group.uuid.clone());
        if self.unavailable.lock().await.contains(&group.uuid) {
            return Err(SyncError::Unavailable(format!("timeout syncing {}", group.uuid)));
        }
        if self.rejected.lock().await.contains(&group.uuid) {
            return Err(SyncError::Rejected(format!("{} has no scopes", group.uuid)));
        }
        Ok(())
    }
}

/// Syncs one resource group.
///
/// A transient sync failure reschedules the group `retry_after` from now
/// instead of waiting for the full target interval.
pub struct ResourceGroupSyncHandler {
    client: Arc<dyn ResourceGroupSyncClient>,
    provider: Arc<dyn PersistenceProvider<ResourceGroup>>,
    clock: Arc<dyn Clock>,
    retry_after: Duration,
}

impl ResourceGroupSyncHandler {
    pub fn new(
        client: Arc<dyn ResourceGroupSyncClient>,
        provider: Arc<dyn PersistenceProvider<ResourceGroup>>,
        retry_after: Duration,
    ) -> Self {
        Self {
            client,
            provider,
            clock: Arc::new(SystemClock),
            retry_after,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl Handler<ResourceGroup> for ResourceGroupSyncHandler {
    async fn handle(&self, group: ResourceGroup) -> Result<(), HandlerError> {
        match self.client.sync(&group).await {
            Ok(()) => {
                debug!(entity_id = %group.uuid, account_id = %group.account_id, "resource group synced");
                Ok(())
            }
            Err(e @ SyncError::Unavailable(_)) => {
                let retry_at = self
                    .clock
                    .now_millis()
                    .saturating_add(duration_millis(self.retry_after));
                self.provider
                    .update_entity_field(&group, Some(Schedule::At(retry_at)), RECONCILIATION_FIELD)
                    .await?;
                warn!(entity_id = %group.uuid, retry_at, "resource group sync rescheduled");
                Err(HandlerError::transient(e.to_string()).with_source(e))
            }
            Err(e @ SyncError::Rejected(_)) => {
                Err(HandlerError::permanent(e.to_string()).with_source(e))
            }
        }
    }
}

/// Resource group sync iterator over `provider`.
pub fn resource_group_iterator(
    config: IteratorConfig,
    provider: Arc<dyn PersistenceProvider<ResourceGroup>>,
    client: Arc<dyn ResourceGroupSyncClient>,
    retry_after: Duration,
) -> Result<PersistenceIterator<ResourceGroup>, BuildError> {
    let handler = ResourceGroupSyncHandler::new(client, Arc::clone(&provider), retry_after);
    IteratorBuilder::new(config)
        .field_name(RECONCILIATION_FIELD)
        .filter(unmanaged())
        .shared_provider(provider)
        .handler(handler)
        .build()
}
