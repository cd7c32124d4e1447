//! IteratorBuilder - PersistenceIterator の構築とワイヤリング
//!
//! # 設計原則
//! - 起動時検証（Fail-fast 設計）
//! - 不足している部品は BuildError で名前付きで返す

use std::sync::Arc;

use tokio::sync::{OnceCell, Semaphore};

use crate::app::iterator::PersistenceIterator;
use crate::app::status::PumpStats;
use crate::config::{ConfigError, IteratorConfig};
use crate::domain::{Filter, PersistentIterable};
use crate::ports::{Clock, EntityProcessController, Handler, PersistenceProvider, SystemClock};

/// IteratorBuilder は PersistenceIterator を構築
///
/// # 使用例
/// ```ignore
/// let iterator = IteratorBuilder::<ResourceGroup>::new(config)
///     .field_name("nextReconciliationIterationAt")
///     .filter(Filter::ne("managed", true))
///     .provider(store.clone())
///     .handler(ResourceGroupSyncHandler::new(...))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - `build()` 時に config を検証
/// - field name / provider / handler が揃っていなければ BuildError を返す
pub struct IteratorBuilder<T: PersistentIterable> {
    config: IteratorConfig,
    field_name: Option<String>,
    filter: Option<Filter>,
    provider: Option<Arc<dyn PersistenceProvider<T>>>,
    handler: Option<Arc<dyn Handler<T>>>,
    controller: Option<Arc<dyn EntityProcessController<T>>>,
    clock: Option<Arc<dyn Clock>>,
}

/// BuildError は iterator 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("iterator '{0}' has no schedule field name")]
    MissingFieldName(String),

    #[error("iterator '{0}' has no persistence provider")]
    MissingProvider(String),

    #[error("iterator '{0}' has no handler")]
    MissingHandler(String),

    #[error("iterator '{name}' filters on an invalid field path '{field}'")]
    InvalidFilterField { name: String, field: String },

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl<T: PersistentIterable> IteratorBuilder<T> {
    pub fn new(config: IteratorConfig) -> Self {
        Self {
            config,
            field_name: None,
            filter: None,
            provider: None,
            handler: None,
            controller: None,
            clock: None,
        }
    }

    /// Persisted name of the schedule field, e.g. `nextIteration`.
    pub fn field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    /// Narrows the claimable entities (the filter expander).
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn provider<P: PersistenceProvider<T> + 'static>(mut self, provider: P) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Uses a provider that is already shared with other components.
    pub fn shared_provider(mut self, provider: Arc<dyn PersistenceProvider<T>>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn handler<H: Handler<T>>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn process_controller<C: EntityProcessController<T>>(mut self, controller: C) -> Self {
        self.controller = Some(Arc::new(controller));
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn build(self) -> Result<PersistenceIterator<T>, BuildError> {
        self.config.validate()?;

        let name = self.config.name.clone();
        let field_name = self
            .field_name
            .filter(|field| !field.trim().is_empty())
            .ok_or_else(|| BuildError::MissingFieldName(name.clone()))?;
        let provider = self
            .provider
            .ok_or_else(|| BuildError::MissingProvider(name.clone()))?;
        let handler = self
            .handler
            .ok_or_else(|| BuildError::MissingHandler(name.clone()))?;

        if let Some(filter) = &self.filter
            && let Some(field) = filter
                .fields()
                .into_iter()
                .find(|field| field.split('.').any(str::is_empty))
        {
            return Err(BuildError::InvalidFilterField {
                name,
                field: field.to_string(),
            });
        }

        let semaphore = self
            .config
            .max_in_flight
            .map(|permits| Arc::new(Semaphore::new(permits)));

        Ok(PersistenceIterator {
            config: self.config,
            field_name,
            filter: self.filter,
            provider,
            handler,
            controller: self.controller,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            semaphore,
            stats: Arc::new(PumpStats::new()),
            started: OnceCell::new(),
        })
    }
}
