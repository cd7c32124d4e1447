//! Reconcilers - iterator の具体的な利用例
//!
//! - **resource_group**: REGULAR。外部 sync API との定期同期
//! - **recommendation**: IRREGULAR_SKIP_MISSED。entity 自身が次回時刻を生成

pub mod recommendation;
pub mod resource_group;

pub use self::recommendation::{
    InMemoryRecommendationEngine, Recommendation, RecommendationEngine,
    RecommendationRefreshHandler, recommendation_iterator,
};
pub use self::resource_group::{
    InMemorySyncClient, ResourceGroup, ResourceGroupSyncClient, ResourceGroupSyncHandler,
    SyncError, resource_group_iterator,
};
