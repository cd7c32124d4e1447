//! App - アプリケーション層
//!
//! ports を組み合わせて iterator の実行ロジックを実装します。
//!
//! # 主要コンポーネント
//! - **IteratorBuilder**: iterator の構築とワイヤリング（Fail-fast）
//! - **PersistenceIterator**: claim → handle の 1 ステップ
//! - **WorkerLoop**: IDLE → CLAIMING → HANDLING のループ
//! - **PumpRegistry**: 名前付き pump（専用 runtime + worker 群）の管理
//! - **PumpStats**: pump ごとのカウンタ

pub mod backoff;
pub mod builder;
pub mod iterator;
pub mod pump;
pub mod status;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::backoff::Backoff;
pub use self::builder::{BuildError, IteratorBuilder};
pub use self::iterator::{Claim, ClaimedEntity, HandleOutcome, PersistenceIterator};
pub use self::pump::{PumpError, PumpRegistry};
pub use self::status::{PumpStats, PumpStatus};
pub use self::worker_loop::WorkerLoop;
