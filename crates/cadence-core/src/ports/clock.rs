//! Clock port - 時刻の抽象化
//!
//! - `SystemClock`: 本番用
//! - `ManualClock`: テスト用（手動で進める）

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;

use crate::domain::schedule::{EpochMillis, duration_millis};

/// Clock provides "now" for due checks and schedule anchors.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> EpochMillis;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> EpochMillis {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: EpochMillis) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: EpochMillis) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_millis(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> EpochMillis {
        self.now.load(Ordering::SeqCst)
    }
}

/// Lets one clock be shared by several iterators and handlers.
impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_millis(&self) -> EpochMillis {
        (**self).now_millis()
    }
}
