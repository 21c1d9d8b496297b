//! Actions: a type tag plus a free-form JSON payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An immutable description of an intended state change.
///
/// Serialized as a flat JSON object: the discriminator lives under `"type"`
/// and every payload field sits beside it. The store does not interpret the
/// payload. Reducers give actions meaning.
///
/// # Examples
///
/// ```
/// use statefold::Action;
/// use serde_json::json;
///
/// let action = Action::new("todo_added").with("text", "buy milk");
/// assert_eq!(action.action_type, "todo_added");
/// assert_eq!(action.get("text"), Some(&json!("buy milk")));
///
/// let encoded = serde_json::to_value(&action).unwrap();
/// assert_eq!(encoded, json!({"type": "todo_added", "text": "buy milk"}));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct Action {
    /// The action type identifier (e.g. `"todo_added"`).
    ///
    /// Serialized as `"type"` in JSON.
    #[serde(rename = "type")]
    pub action_type: String,

    /// Payload fields, flattened next to `type` when serialized.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Action {
    /// Create an action with the given type and no payload.
    pub fn new(action_type: impl Into<String>) -> Self {
        Action {
            action_type: action_type.into(),
            payload: Map::new(),
        }
    }

    /// Add a payload field.
    ///
    /// A field named `type` is dropped: it would collide with the
    /// discriminator on the wire.
    ///
    /// # Examples
    ///
    /// ```
    /// use statefold::Action;
    ///
    /// let action = Action::new("todo_completed").with("id", 3);
    /// assert_eq!(action.get("id").and_then(|v| v.as_u64()), Some(3));
    /// ```
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "type" {
            self.payload.insert(key, value.into());
        }
        self
    }

    /// Replace the whole payload with the fields of a JSON object.
    ///
    /// Non-object values leave the payload empty.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = match payload {
            Value::Object(mut map) => {
                map.remove("type");
                map
            }
            _ => Map::new(),
        };
        self
    }

    /// Look up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Returns `true` if this action's type is one of `types`.
    pub fn is_any<S: AsRef<str>>(&self, types: &[S]) -> bool {
        types.iter().any(|t| t.as_ref() == self.action_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_field_cannot_be_overwritten() {
        let action = Action::new("rename").with("type", "other");
        assert!(action.payload.is_empty());
        let action = Action::new("rename").with_payload(json!({"type": "x", "to": "y"}));
        assert_eq!(action.action_type, "rename");
        assert_eq!(action.get("to"), Some(&json!("y")));
    }

    #[test]
    fn test_decode_flat_object() {
        let action: Action = serde_json::from_value(json!({"type": "add", "n": 2})).unwrap();
        assert_eq!(action.action_type, "add");
        assert_eq!(action.get("n"), Some(&json!(2)));
    }

    #[test]
    fn test_is_any() {
        let action = Action::new("b");
        assert!(action.is_any(&["a", "b"]));
        assert!(!action.is_any(&["a"]));
        assert!(!action.is_any::<&str>(&[]));
    }
}
