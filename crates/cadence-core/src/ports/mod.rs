//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（datastore, 時刻, domain handler）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod handler;
pub mod persistence;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::handler::{EntityProcessController, Handler};
pub use self::persistence::{CandidateQuery, PersistenceProvider, ScheduleSwap};
