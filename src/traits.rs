use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Value type of a model's identity field.
///
/// Identities travel through URL path segments as strings, so they must parse
/// from and render to text. `is_unset` reports the zero value for which the
/// storage layer assigns an identity on insert.
pub trait Identity:
    Clone
    + PartialEq
    + fmt::Debug
    + fmt::Display
    + FromStr<Err: fmt::Display>
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn is_unset(&self) -> bool;
}

macro_rules! numeric_identity {
    ($($ty:ty),+) => {
        $(
            impl Identity for $ty {
                fn is_unset(&self) -> bool {
                    *self == 0
                }
            }
        )+
    };
}

numeric_identity!(i32, i64, u32, u64);

impl Identity for String {
    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

impl Identity for Uuid {
    fn is_unset(&self) -> bool {
        self.is_nil()
    }
}

/// A type admitted to the CRUD engine.
///
/// The only behavioural requirement is [`Model::identity`]; the constants name
/// the resource in routes, response envelopes and storage.
///
/// `Default` supplies the zero record that request bodies are bound onto and
/// that omitted or missing fields fall back to.
///
/// ```rust,ignore
/// #[derive(Clone, Debug, Default, Serialize, Deserialize)]
/// pub struct User {
///     pub id: i64,
///     pub name: String,
/// }
///
/// impl Model for User {
///     type Id = i64;
///     const TYPE_NAME: &'static str = "User";
///     const RESOURCE_NAME_SINGULAR: &'static str = "user";
///     const RESOURCE_NAME_PLURAL: &'static str = "users";
///     const TABLE_NAME: &'static str = "users";
///
///     fn identity(&self) -> (&'static str, i64) {
///         ("id", self.id)
///     }
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {
    type Id: Identity;

    const TYPE_NAME: &'static str;
    const RESOURCE_NAME_SINGULAR: &'static str;
    const RESOURCE_NAME_PLURAL: &'static str;
    const TABLE_NAME: &'static str;

    /// Identity field name and value. The field name must not depend on `self`.
    fn identity(&self) -> (&'static str, Self::Id);

    #[must_use]
    fn identity_field() -> &'static str {
        Self::default().identity().0
    }
}
