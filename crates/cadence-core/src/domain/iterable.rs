//! PersistentIterable - the contract an entity signs to be iterated.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::schedule::{EpochMillis, Schedule};

/// An entity with a stable id and one or more "next due" schedule fields.
///
/// # 使用例
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// struct ResourceGroup {
///     uuid: String,
///     #[serde(skip_serializing_if = "Option::is_none")]
///     next_reconciliation_iteration_at: Option<i64>,
/// }
///
/// impl PersistentIterable for ResourceGroup {
///     const COLLECTION: &'static str = "resource_groups";
///     fn uuid(&self) -> &str { &self.uuid }
/// }
/// ```
///
/// The entity is stored as a JSON document. Schedule fields are addressed by
/// their persisted (serialized) name, e.g. `nextReconciliationIterationAt`.
pub trait PersistentIterable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection (table) the entity lives in.
    const COLLECTION: &'static str;

    /// Stable unique identifier, immutable after creation.
    fn uuid(&self) -> &str;

    /// Current value of a schedule field, read from the serialized document.
    fn next_iteration(&self, field_name: &str) -> Option<Schedule> {
        let document = serde_json::to_value(self).ok()?;
        schedule_from_document(&document, field_name)
    }

    /// Recompute future timestamps for irregular iterators.
    ///
    /// Called after a claim of an irregular entity. Returning `Some` replaces the
    /// schedule field; `None` leaves the claimed schedule untouched. With
    /// `skip_missing`, values at or before `throttled` must be left out.
    fn recalculate_next_iterations(
        &mut self,
        _field_name: &str,
        _skip_missing: bool,
        _throttled: EpochMillis,
    ) -> Option<Vec<EpochMillis>> {
        None
    }
}

/// Reads a schedule field out of a document. `null` is treated as absent.
pub fn schedule_from_document(document: &serde_json::Value, field_name: &str) -> Option<Schedule> {
    let value = lookup(document, field_name)?;
    if value.is_null() {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

/// Resolves a dotted field path (`a.b.c`) inside a document.
pub fn lookup<'a>(document: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}
