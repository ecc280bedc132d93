//! Conversions between records and JSON documents.

use serde::ser::Error as _;
use serde_json::{Map, Value};

use crate::traits::Model;

/// Writes `patch` over `base`. Nested objects merge key by key, anything else
/// is replaced, so fields absent from `patch` keep their current value.
pub fn overlay(base: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(current)), Value::Object(nested)) => overlay(current, nested),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// # Errors
///
/// Fails when the record does not serialize to a JSON object.
pub fn to_document<T: Model>(record: &T) -> Result<Map<String, Value>, serde_json::Error> {
    match serde_json::to_value(record)? {
        Value::Object(document) => Ok(document),
        _ => Err(serde_json::Error::custom(format!(
            "{} does not serialize to an object",
            T::TYPE_NAME
        ))),
    }
}

/// # Errors
///
/// Fails when the document does not deserialize into `T`.
pub fn from_document<T: Model>(document: Map<String, Value>) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(document))
}

/// # Errors
///
/// Fails when the identity value does not serialize.
pub fn id_value<T: Model>(record: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(record.identity().1)
}

/// Text form used when comparing stored values with request text.
#[must_use]
pub fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Whether two stored values reference the same record. Null never matches.
#[must_use]
pub fn same(left: &Value, right: &Value) -> bool {
    !left.is_null() && !right.is_null() && text(left) == text(right)
}
