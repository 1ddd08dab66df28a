//! Per-step timing map with a merge rule that never loses entries.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};

/// Step name to ordered list of durations in seconds.
///
/// Serializes as a plain `map<string, list<float>>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionTime(BTreeMap<String, Vec<f64>>);

impl ExecutionTime {
    /// Creates an empty timing map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a duration for `step`.
    pub fn record(&mut self, step: impl Into<String>, seconds: f64) {
        self.0.entry(step.into()).or_default().push(seconds);
    }

    /// Returns the durations recorded for `step`.
    #[must_use]
    pub fn get(&self, step: &str) -> Option<&[f64]> {
        self.0.get(step).map(Vec::as_slice)
    }

    /// Number of entries recorded for `step`.
    #[must_use]
    pub fn count(&self, step: &str) -> usize {
        self.0.get(step).map_or(0, Vec::len)
    }

    /// Sum of all durations recorded for `step`.
    #[must_use]
    pub fn total(&self, step: &str) -> f64 {
        self.0.get(step).map_or(0.0, |v| v.iter().sum())
    }

    /// Returns the step names, sorted.
    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns the number of step names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merges `incoming` into `self` in place (see [`merge`]).
    pub fn merge_from(&mut self, incoming: &Self) {
        for (step, durations) in &incoming.0 {
            match self.0.entry(step.clone()) {
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(durations.clone());
                }
                btree_map::Entry::Occupied(mut slot) => {
                    if durations.len() >= slot.get().len() {
                        slot.insert(durations.clone());
                    }
                }
            }
        }
    }

    /// Returns the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.0
    }
}

impl From<BTreeMap<String, Vec<f64>>> for ExecutionTime {
    fn from(map: BTreeMap<String, Vec<f64>>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, Vec<f64>)> for ExecutionTime {
    fn from_iter<I: IntoIterator<Item = (K, Vec<f64>)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Merges two timing views of the same execution.
///
/// For each key the longer list wins; on equal length `incoming` wins.
/// Keys present only in `existing` are kept. A shorter incoming list never
/// truncates a longer existing one.
#[must_use]
pub fn merge(existing: &ExecutionTime, incoming: &ExecutionTime) -> ExecutionTime {
    let mut merged = existing.clone();
    merged.merge_from(incoming);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn times(entries: &[(&str, &[f64])]) -> ExecutionTime {
        entries.iter().map(|(k, v)| (*k, v.to_vec())).collect()
    }

    #[test]
    fn test_record_appends() {
        let mut t = ExecutionTime::new();
        t.record("fetch", 1.0);
        t.record("fetch", 2.5);

        assert_eq!(t.get("fetch"), Some(&[1.0, 2.5][..]));
        assert_eq!(t.count("fetch"), 2);
        assert!((t.total("fetch") - 3.5).abs() < f64::EPSILON);
        assert_eq!(t.count("missing"), 0);
    }

    #[test]
    fn test_extension_wins_both_directions() {
        let short = times(&[("a", &[1.0]), ("b", &[2.0, 3.0])]);
        let long = times(&[("a", &[1.0, 4.0]), ("b", &[2.0, 3.0, 5.0])]);

        assert_eq!(merge(&short, &long), long);
        assert_eq!(merge(&long, &short), long);
    }

    #[test]
    fn test_merge_idempotent() {
        let t = times(&[("a", &[1.0, 2.0])]);
        assert_eq!(merge(&t, &t), t);
    }

    #[test]
    fn test_merge_keeps_disjoint_keys() {
        let existing = times(&[("a", &[1.0])]);
        let incoming = times(&[("b", &[2.0])]);

        assert_eq!(merge(&existing, &incoming), times(&[("a", &[1.0]), ("b", &[2.0])]));
    }

    #[test]
    fn test_merge_never_shorter_than_inputs() {
        let existing = times(&[("a", &[1.0, 2.0, 3.0]), ("b", &[1.0])]);
        let incoming = times(&[("a", &[9.0]), ("b", &[1.0, 2.0])]);
        let merged = merge(&existing, &incoming);

        for step in ["a", "b"] {
            assert!(merged.count(step) >= existing.count(step));
            assert!(merged.count(step) >= incoming.count(step));
        }
    }

    #[test]
    fn test_equal_length_prefers_incoming() {
        let existing = times(&[("a", &[1.0])]);
        let incoming = times(&[("a", &[2.0])]);
        assert_eq!(merge(&existing, &incoming).get("a"), Some(&[2.0][..]));
    }

    #[test]
    fn test_wire_shape() {
        let t = times(&[("draft", &[0.5, 1.25])]);
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json, serde_json::json!({"draft": [0.5, 1.25]}));

        let back: ExecutionTime = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }
}
