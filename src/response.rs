use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};

/// Success body: the payload under its resource or field name, plus optional
/// side-channel keys such as `total` and `totalError`.
///
/// ```json
/// { "users": [ ... ], "total": 42 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// # Errors
    ///
    /// Fails when `payload` does not serialize.
    pub fn new(key: impl Into<String>, payload: &impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self::from_value(key, serde_json::to_value(payload)?))
    }

    pub fn from_value(key: impl Into<String>, payload: Value) -> Self {
        let mut body = Map::new();
        body.insert(key.into(), payload);
        Self(body)
    }

    /// `{ "deleted": true }`
    #[must_use]
    pub fn deleted() -> Self {
        Self::from_value("deleted", Value::Bool(true))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self.0)).into_response()
    }
}
