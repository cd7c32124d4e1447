//! Domain model: schedules, scheduling policy, entity contract, filters, errors.

pub mod errors;
pub mod filter;
pub mod ids;
pub mod iterable;
pub mod schedule;
pub mod state;

pub use self::errors::{ErrorKind, HandlerError, ProviderError};
pub use self::filter::Filter;
pub use self::ids::{PumpRunId, WorkerId};
pub use self::iterable::PersistentIterable;
pub use self::schedule::{EpochMillis, Schedule, SchedulingPolicy, SchedulingType, is_due};
pub use self::state::{IdleReason, LoopState};
