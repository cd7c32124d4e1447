//! Filter expander: narrows which entities an iterator may claim.
//!
//! A `Filter` is a small predicate language over the entity document. The
//! in-memory provider evaluates it with [`Filter::matches`]; the Postgres
//! provider renders the same tree to SQL, so one iterator definition works
//! against either store.

use serde::Serialize;
use serde_json::Value;

use super::iterable::lookup;

/// Predicate over an entity document. Field names are dotted paths.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field is present and equal to the value.
    Eq(String, Value),

    /// Field is absent or different from the value.
    Ne(String, Value),

    /// Field is present and equal to one of the values.
    In(String, Vec<Value>),

    /// Field is present (an explicit `null` counts as present).
    Exists(String),

    /// Field is absent.
    NotExists(String),

    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Serialize) -> Self {
        Filter::Eq(field.into(), to_value(value))
    }

    pub fn ne(field: impl Into<String>, value: impl Serialize) -> Self {
        Filter::Ne(field.into(), to_value(value))
    }

    pub fn is_in<V: Serialize>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field.into(), values.into_iter().map(to_value).collect())
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Filter::Exists(field.into())
    }

    pub fn not_exists(field: impl Into<String>) -> Self {
        Filter::NotExists(field.into())
    }

    /// Conjunction, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), other) => {
                left.push(other);
                Filter::And(left)
            }
            (this, other) => Filter::And(vec![this, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        Filter::Or(vec![self, other])
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Evaluates the predicate against a document.
    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Filter::Eq(field, value) => lookup(document, field) == Some(value),
            Filter::Ne(field, value) => lookup(document, field) != Some(value),
            Filter::In(field, values) => {
                lookup(document, field).is_some_and(|found| values.contains(found))
            }
            Filter::Exists(field) => lookup(document, field).is_some(),
            Filter::NotExists(field) => lookup(document, field).is_none(),
            Filter::And(filters) => filters.iter().all(|filter| filter.matches(document)),
            Filter::Or(filters) => filters.iter().any(|filter| filter.matches(document)),
            Filter::Not(filter) => !filter.matches(document),
        }
    }

    /// Every field path referenced by the filter.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Filter::Eq(field, _)
            | Filter::Ne(field, _)
            | Filter::In(field, _)
            | Filter::Exists(field)
            | Filter::NotExists(field) => vec![field.as_str()],
            Filter::And(filters) | Filter::Or(filters) => {
                filters.iter().flat_map(Filter::fields).collect()
            }
            Filter::Not(filter) => filter.fields(),
        }
    }
}

/// Matches when no filter is configured.
pub fn matches_optional(filter: Option<&Filter>, document: &Value) -> bool {
    filter.is_none_or(|filter| filter.matches(document))
}

fn to_value(value: impl Serialize) -> Value {
    // Serializing plain values (strings, numbers, bools, enums) cannot fail.
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ne_matches_missing_field() {
        let filter = Filter::ne("managed", true);
        assert!(filter.matches(&json!({"uuid": "a"})));
        assert!(filter.matches(&json!({"managed": false})));
        assert!(!filter.matches(&json!({"managed": true})));
    }

    #[test]
    fn eq_requires_presence() {
        let filter = Filter::eq("status", "RUNNING");
        assert!(filter.matches(&json!({"status": "RUNNING"})));
        assert!(!filter.matches(&json!({})));
    }

    #[test]
    fn in_and_exists_compose() {
        let filter = Filter::is_in("status", ["CREATED", "RUNNING"]).and(Filter::exists("jobIds"));
        assert!(filter.matches(&json!({"status": "CREATED", "jobIds": []})));
        assert!(!filter.matches(&json!({"status": "CREATED"})));
        assert!(!filter.matches(&json!({"status": "DONE", "jobIds": []})));
    }

    #[test]
    fn and_flattens() {
        let filter = Filter::exists("a").and(Filter::exists("b")).and(Filter::exists("c"));
        match filter {
            Filter::And(filters) => assert_eq!(filters.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn or_and_not() {
        let filter = Filter::eq("kind", "a").or(Filter::eq("kind", "b")).negate();
        assert!(filter.matches(&json!({"kind": "c"})));
        assert!(!filter.matches(&json!({"kind": "b"})));
    }

    #[test]
    fn nested_paths() {
        let filter = Filter::eq("owner.team", "ce");
        assert!(filter.matches(&json!({"owner": {"team": "ce"}})));
        assert_eq!(filter.fields(), vec!["owner.team"]);
    }

    #[test]
    fn missing_filter_matches_everything() {
        assert!(matches_optional(None, &json!({})));
    }
}
