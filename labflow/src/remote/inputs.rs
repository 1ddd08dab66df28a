//! Workflow dispatch input map.

use crate::errors::LabflowError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flat string-to-string input map sent with a workflow dispatch.
///
/// The remote API only accepts string values, so lists and structs are
/// JSON-encoded into a string with [`insert_json`](Self::insert_json).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchInputs(BTreeMap<String, String>);

impl DispatchInputs {
    /// Creates an empty input map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a string verbatim.
    pub fn insert_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Stores the JSON encoding of `value`.
    ///
    /// A plain string passed here is quoted; use [`insert_str`](Self::insert_str) for strings.
    pub fn insert_json<T: Serialize + ?Sized>(&mut self, key: impl Into<String>, value: &T) -> Result<(), LabflowError> {
        self.0.insert(key.into(), serde_json::to_string(value)?);
        Ok(())
    }

    /// Builder form of [`insert_str`](Self::insert_str).
    #[must_use]
    pub fn with_str(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_str(key, value);
        self
    }

    /// Returns the encoded value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns the number of inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no inputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_string_values_are_verbatim() {
        let inputs = DispatchInputs::new().with_str("model", "gpt-4o");
        assert_eq!(inputs.get("model"), Some("gpt-4o"));
    }

    #[test]
    fn test_structured_values_are_json_encoded() {
        #[derive(Serialize)]
        struct Variation {
            id: String,
            lr: f64,
        }

        let mut inputs = DispatchInputs::new();
        inputs.insert_json("seeds", &[1, 2, 3]).unwrap();
        inputs
            .insert_json(
                "variation",
                &Variation {
                    id: "v1".to_string(),
                    lr: 0.5,
                },
            )
            .unwrap();

        assert_eq!(inputs.get("seeds"), Some("[1,2,3]"));
        assert_eq!(inputs.get("variation"), Some(r#"{"id":"v1","lr":0.5}"#));
    }

    #[test]
    fn test_wire_shape_is_flat_string_map() {
        let mut inputs = DispatchInputs::new().with_str("branch", "main-v1");
        inputs.insert_json("tags", &vec!["a", "b"]).unwrap();

        let wire = serde_json::to_value(&inputs).unwrap();
        assert_eq!(wire, json!({"branch": "main-v1", "tags": "[\"a\",\"b\"]"}));
    }
}
