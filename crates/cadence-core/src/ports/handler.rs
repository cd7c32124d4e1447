//! Handler port - caller-supplied business callback.

use async_trait::async_trait;

use crate::domain::{HandlerError, PersistentIterable};

/// Handler runs domain work for one claimed entity.
///
/// # 使用例
/// ```ignore
/// struct SyncHandler;
///
/// #[async_trait]
/// impl Handler<ResourceGroup> for SyncHandler {
///     async fn handle(&self, group: ResourceGroup) -> Result<(), HandlerError> {
///         sync_api.sync(&group).await.map_err(HandlerError::transient)
///     }
/// }
/// ```
///
/// The entity's schedule has already been advanced when `handle` runs. A
/// returned error (or a panic) is logged and does not roll the advance back.
#[async_trait]
pub trait Handler<T: PersistentIterable>: Send + Sync + 'static {
    async fn handle(&self, entity: T) -> Result<(), HandlerError>;
}

/// Decides whether a claimed entity should reach the handler at all.
///
/// A skipped entity keeps its advanced schedule; it is just not handled this round.
pub trait EntityProcessController<T: PersistentIterable>: Send + Sync + 'static {
    fn should_process(&self, entity: &T) -> bool;
}

impl<T, F> EntityProcessController<T> for F
where
    T: PersistentIterable,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn should_process(&self, entity: &T) -> bool {
        self(entity)
    }
}
