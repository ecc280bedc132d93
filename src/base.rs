//! Common model columns.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Integer identity plus creation and update timestamps, flattened into a
/// model:
///
/// ```rust,ignore
/// #[derive(Clone, Debug, Default, Serialize, Deserialize)]
/// struct Post {
///     #[serde(flatten)]
///     base: BasicModel,
///     title: String,
/// }
///
/// impl Model for Post {
///     type Id = i64;
///     // ...
///     fn identity(&self) -> (&'static str, i64) {
///         ("id", self.base.id)
///     }
/// }
///
/// Registry::builder().model::<Post>().timestamps::<Post>();
/// ```
///
/// Storage collaborators fill `created_at` on insert and `updated_at` on every
/// write once the model is registered with
/// [`RegistryBuilder::timestamps`](crate::registry::RegistryBuilder::timestamps).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicModel {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Current time as stored in timestamp columns: RFC 3339 in UTC, which sorts
/// lexicographically and compares against date-only range bounds.
#[must_use]
pub fn timestamp_now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}
