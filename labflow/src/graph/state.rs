//! Execution state threaded through a graph invocation.

use crate::errors::LabflowError;
use crate::telemetry::ExecutionTime;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// State key of the merged timing map.
pub const EXECUTION_TIME_KEY: &str = "execution_time";

/// Which conceptual partition a state key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Supplied by the caller, never mutated.
    Input,
    /// Produced and consumed by steps, never returned.
    Hidden,
    /// Returned to the caller.
    Output,
}

#[derive(Debug, Default)]
pub(crate) struct StateSchema {
    pub(crate) input_keys: BTreeSet<String>,
    pub(crate) output_keys: BTreeSet<String>,
}

/// Key-value state of one graph invocation.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    values: BTreeMap<String, Value>,
    execution_time: ExecutionTime,
    schema: Arc<StateSchema>,
}

impl ExecutionState {
    pub(crate) fn new(schema: Arc<StateSchema>, input: Map<String, Value>) -> Result<Self, LabflowError> {
        let mut state = Self {
            values: BTreeMap::new(),
            execution_time: ExecutionTime::new(),
            schema,
        };
        for (key, value) in input {
            if key == EXECUTION_TIME_KEY {
                state.execution_time = serde_json::from_value(value)?;
            } else {
                state.values.insert(key, value);
            }
        }
        Ok(state)
    }

    /// Creates a state with no declared partitions, for exercising steps directly.
    #[must_use]
    pub fn detached(input: Map<String, Value>) -> Self {
        let mut values = BTreeMap::new();
        let mut execution_time = ExecutionTime::new();
        for (key, value) in input {
            if key == EXECUTION_TIME_KEY {
                execution_time = serde_json::from_value(value).unwrap_or_default();
            } else {
                values.insert(key, value);
            }
        }
        Self {
            values,
            execution_time,
            schema: Arc::default(),
        }
    }

    /// Returns the raw value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Deserializes the value for `key`, if present.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, LabflowError> {
        self.values
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(LabflowError::from)
    }

    /// Returns true if `key` holds a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        key == EXECUTION_TIME_KEY || self.values.contains_key(key)
    }

    /// Returns the timing map.
    #[must_use]
    pub fn execution_time(&self) -> &ExecutionTime {
        &self.execution_time
    }

    /// Classifies `key` into its partition.
    #[must_use]
    pub fn partition(&self, key: &str) -> Partition {
        if self.schema.input_keys.contains(key) {
            Partition::Input
        } else if key == EXECUTION_TIME_KEY || self.schema.output_keys.contains(key) {
            Partition::Output
        } else {
            Partition::Hidden
        }
    }

    /// Keys currently holding hidden values.
    pub fn hidden_keys(&self) -> impl Iterator<Item = &str> {
        self.values
            .keys()
            .map(String::as_str)
            .filter(|k| self.partition(k) == Partition::Hidden)
    }

    /// Builds a JSON object of the given keys (all keys when `keys` is empty).
    ///
    /// `execution_time` is always included.
    pub fn project(&self, keys: &[String]) -> Result<Map<String, Value>, LabflowError> {
        let mut object: Map<String, Value> = if keys.is_empty() {
            self.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        } else {
            keys.iter()
                .filter_map(|k| self.values.get(k).map(|v| (k.clone(), v.clone())))
                .collect()
        };
        object.insert(
            EXECUTION_TIME_KEY.to_string(),
            serde_json::to_value(&self.execution_time)?,
        );
        Ok(object)
    }

    /// Applies a partial update produced by `step`.
    ///
    /// Values overwrite; `execution_time` is merged. Writing an input key fails.
    pub fn apply(&mut self, step: &str, update: StateUpdate) -> Result<(), LabflowError> {
        for (key, value) in update.values {
            if key == EXECUTION_TIME_KEY {
                let incoming: ExecutionTime = serde_json::from_value(value)?;
                self.execution_time.merge_from(&incoming);
                continue;
            }
            if self.schema.input_keys.contains(&key) {
                return Err(LabflowError::step_failed(
                    step,
                    format!("attempted to overwrite input key '{key}'"),
                ));
            }
            self.values.insert(key, value);
        }
        if let Some(incoming) = update.execution_time {
            self.execution_time.merge_from(&incoming);
        }
        Ok(())
    }

    pub(crate) fn record_time(&mut self, step: &str, seconds: f64) {
        self.execution_time.record(step, seconds);
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<String, Value>, ExecutionTime, Arc<StateSchema>) {
        (self.values, self.execution_time, self.schema)
    }
}

/// Partial state update returned by a step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    values: BTreeMap<String, Value>,
    execution_time: Option<ExecutionTime>,
}

impl StateUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }

    /// Sets `key` to `value` in place.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Attaches timing entries to merge into the state.
    #[must_use]
    pub fn with_execution_time(mut self, times: ExecutionTime) -> Self {
        self.execution_time = Some(times);
        self
    }

    /// Builds an update from a serializable struct.
    ///
    /// Fields become state keys; `null` fields are omitted.
    pub fn from_serializable<T: Serialize>(output: &T) -> Result<Self, LabflowError> {
        match serde_json::to_value(output)? {
            Value::Object(object) => Ok(object
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .fold(Self::new(), |update, (k, v)| update.with(k, v))),
            Value::Null => Ok(Self::new()),
            other => Err(LabflowError::Internal(format!(
                "step output must serialize to an object, got {other}"
            ))),
        }
    }

    /// Returns the keys written by this update.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Returns the value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns true if nothing is written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.execution_time.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Arc<StateSchema> {
        Arc::new(StateSchema {
            input_keys: ["topic".to_string()].into_iter().collect(),
            output_keys: ["summary".to_string()].into_iter().collect(),
        })
    }

    fn input() -> Map<String, Value> {
        let Value::Object(map) = json!({"topic": "sparse attention"}) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn test_partitions() {
        let state = ExecutionState::new(schema(), input()).unwrap();
        assert_eq!(state.partition("topic"), Partition::Input);
        assert_eq!(state.partition("summary"), Partition::Output);
        assert_eq!(state.partition("draft"), Partition::Hidden);
        assert_eq!(state.partition(EXECUTION_TIME_KEY), Partition::Output);
    }

    #[test]
    fn test_apply_rejects_input_write() {
        let mut state = ExecutionState::new(schema(), input()).unwrap();
        let update = StateUpdate::new().with("topic", json!("other"));

        let err = state.apply("rewrite", update).unwrap_err();
        assert!(matches!(err, LabflowError::StepFailed { ref step, .. } if step == "rewrite"));
        assert_eq!(state.get("topic"), Some(&json!("sparse attention")));
    }

    #[test]
    fn test_apply_merges_execution_time() {
        let mut state = ExecutionState::new(schema(), input()).unwrap();
        state.record_time("draft", 1.0);

        let mut shorter = ExecutionTime::new();
        shorter.record("review", 0.5);
        let update = StateUpdate::new()
            .with("summary", json!("ok"))
            .with(EXECUTION_TIME_KEY, json!({"draft": []}))
            .with_execution_time(shorter);

        state.apply("review", update).unwrap();
        assert_eq!(state.execution_time().count("draft"), 1);
        assert_eq!(state.execution_time().count("review"), 1);
        assert_eq!(state.get("summary"), Some(&json!("ok")));
    }

    #[test]
    fn test_from_serializable_omits_nulls() {
        #[derive(Serialize)]
        struct Out {
            idea: String,
            critique: Option<String>,
        }

        let update = StateUpdate::from_serializable(&Out {
            idea: "x".to_string(),
            critique: None,
        })
        .unwrap();

        assert_eq!(update.keys().collect::<Vec<_>>(), vec!["idea"]);
    }

    #[test]
    fn test_project_declared_keys() {
        let mut state = ExecutionState::new(schema(), input()).unwrap();
        state
            .apply("draft", StateUpdate::new().with("draft", json!(1)))
            .unwrap();

        let projected = state.project(&["draft".to_string()]).unwrap();
        assert!(projected.contains_key("draft"));
        assert!(projected.contains_key(EXECUTION_TIME_KEY));
        assert!(!projected.contains_key("topic"));
    }
}
