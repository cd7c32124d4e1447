//! Schedule model and scheduling policy.
//!
//! The schedule field is the only part of an entity the framework owns. It is
//! persisted either as a single epoch-millisecond timestamp (REGULAR) or as an
//! ordered list of timestamps (IRREGULAR / IRREGULAR_SKIP_MISSED).
//!
//! # 設計原則
//! - `SchedulingPolicy::advance` は純粋関数（副作用なし）
//! - 各 variant は自分に必要なパラメータだけを持つ
//! - claim と同時に適用される（handler の成否とは無関係）

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// Converts a duration to whole milliseconds, saturating at `i64::MAX`.
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Persisted value of a schedule field: `int64 | [int64]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Schedule {
    /// Single next-due timestamp (REGULAR).
    At(EpochMillis),

    /// Ordered future timestamps (IRREGULAR variants). Kept sorted ascending.
    Pending(Vec<EpochMillis>),
}

impl Schedule {
    /// Builds an irregular schedule, sorting and de-duplicating the values.
    pub fn irregular(mut values: Vec<EpochMillis>) -> Self {
        values.sort_unstable();
        values.dedup();
        Schedule::Pending(values)
    }

    /// Earliest queued timestamp, `None` for an empty list.
    pub fn earliest(&self) -> Option<EpochMillis> {
        match self {
            Schedule::At(at) => Some(*at),
            Schedule::Pending(values) => values.iter().min().copied(),
        }
    }

    /// Due iff at least one value is strictly before `as_of`.
    pub fn is_due(&self, as_of: EpochMillis) -> bool {
        self.earliest().is_some_and(|earliest| earliest < as_of)
    }

    /// All queued timestamps in ascending order.
    pub fn values(&self) -> Vec<EpochMillis> {
        match self {
            Schedule::At(at) => vec![*at],
            Schedule::Pending(values) => {
                let mut values = values.clone();
                values.sort_unstable();
                values
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Schedule::Pending(values) if values.is_empty())
    }
}

/// An absent schedule field means "never iterated": immediately due.
pub fn is_due(schedule: Option<&Schedule>, as_of: EpochMillis) -> bool {
    schedule.is_none_or(|schedule| schedule.is_due(as_of))
}

/// How an entity's schedule is recomputed when it is claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulingType {
    Regular,
    Irregular,
    IrregularSkipMissed,
}

impl SchedulingType {
    pub fn is_irregular(self) -> bool {
        !matches!(self, SchedulingType::Regular)
    }
}

impl std::fmt::Display for SchedulingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchedulingType::Regular => "REGULAR",
            SchedulingType::Irregular => "IRREGULAR",
            SchedulingType::IrregularSkipMissed => "IRREGULAR_SKIP_MISSED",
        };
        f.write_str(name)
    }
}

/// Scheduling policy applied as part of an atomic claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// Next due = previous due + `target_interval`.
    Regular { target_interval: Duration },

    /// Pop the earliest queued timestamp.
    Irregular,

    /// Drop every queued timestamp at or before `throttle_boundary`.
    IrregularSkipMissed { throttle_boundary: EpochMillis },
}

impl SchedulingPolicy {
    /// Builds the policy for a claim issued at `base`.
    ///
    /// The throttle boundary of the skip-missed variant is `base + throttle_interval`,
    /// so nothing queued before "now" (plus the throttle window) survives the claim.
    pub fn for_claim(
        scheduling_type: SchedulingType,
        target_interval: Duration,
        throttle_interval: Duration,
        base: EpochMillis,
    ) -> Self {
        match scheduling_type {
            SchedulingType::Regular => SchedulingPolicy::Regular { target_interval },
            SchedulingType::Irregular => SchedulingPolicy::Irregular,
            SchedulingType::IrregularSkipMissed => SchedulingPolicy::IrregularSkipMissed {
                throttle_boundary: base.saturating_add(duration_millis(throttle_interval)),
            },
        }
    }

    pub fn scheduling_type(&self) -> SchedulingType {
        match self {
            SchedulingPolicy::Regular { .. } => SchedulingType::Regular,
            SchedulingPolicy::Irregular => SchedulingType::Irregular,
            SchedulingPolicy::IrregularSkipMissed { .. } => SchedulingType::IrregularSkipMissed,
        }
    }

    /// Computes the schedule written back by the claim.
    ///
    /// REGULAR is anchored to the entity's previous due time, not to `base`;
    /// `base` only anchors the bootstrap case where the field is absent. A run
    /// that overran its interval therefore leaves the entity immediately due.
    pub fn advance(&self, current: Option<&Schedule>, base: EpochMillis) -> Schedule {
        match self {
            SchedulingPolicy::Regular { target_interval } => {
                let anchor = current.and_then(Schedule::earliest).unwrap_or(base);
                Schedule::At(anchor.saturating_add(duration_millis(*target_interval)))
            }
            SchedulingPolicy::Irregular => {
                let mut values = current.map(Schedule::values).unwrap_or_default();
                if !values.is_empty() {
                    values.remove(0);
                }
                Schedule::Pending(values)
            }
            SchedulingPolicy::IrregularSkipMissed { throttle_boundary } => {
                let values = current
                    .map(Schedule::values)
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|value| value > throttle_boundary)
                    .collect();
                Schedule::Pending(values)
            }
        }
    }
}
