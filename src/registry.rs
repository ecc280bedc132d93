//! Process-wide registration table, built once at startup.
//!
//! Maps every model type to its table, identity field, relations and the
//! default document its records are bound onto. Storage collaborators and the
//! nested route composer look models up here instead of inspecting types at
//! runtime.
//!
//! ```rust,ignore
//! let registry = Registry::builder()
//!     .model::<User>()
//!     .model::<Order>()
//!     .has_many::<User, Order>("orders", "user_id")
//!     .unique::<User>("email")
//!     .build()?;
//! ```

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::traits::Model;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const DEFAULT_RANGE_FIELD: &str = CREATED_AT;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("model '{0}' is registered twice")]
    DuplicateModel(String),

    #[error("model '{0}' is not registered")]
    UnknownModel(String),

    #[error("relation '{model}.{field}' is registered twice")]
    DuplicateRelation { model: String, field: String },

    #[error("model '{model}' has no relation '{field}'")]
    UnknownRelation { model: String, field: String },

    #[error("relation '{model}.{field}' targets '{actual}', not '{expected}'")]
    RelationTargetMismatch {
        model: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("default record of '{0}' does not serialize to a JSON object")]
    NotAnObject(String),
}

/// How a relation field links two tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// Child row holds `foreign_key` pointing at the parent.
    HasOne { foreign_key: String },
    /// Child rows hold `foreign_key` pointing at the parent.
    HasMany { foreign_key: String },
    /// Parent row holds `foreign_key` pointing at the child.
    BelongsTo { foreign_key: String },
    /// Link rows in `join_table`.
    ManyToMany {
        join_table: String,
        parent_key: String,
        child_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub field: String,
    /// `TYPE_NAME` of the related model.
    pub target: &'static str,
    pub kind: RelationKind,
}

impl Relation {
    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(
            self.kind,
            RelationKind::HasMany { .. } | RelationKind::ManyToMany { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub type_name: &'static str,
    pub table: &'static str,
    pub identity_field: &'static str,
    /// Column compared by range filters.
    pub range_field: String,
    /// Columns that must be unique across the table, besides the identity.
    pub unique_fields: Vec<String>,
    pub relations: BTreeMap<String, Relation>,
    /// Serialized `Default` record.
    pub defaults: Map<String, Value>,
    /// Column stamped when a row is inserted.
    pub created_field: Option<String>,
    /// Column stamped whenever a row is written.
    pub updated_field: Option<String>,
}

impl ModelInfo {
    fn new<T: Model>() -> Result<Self, RegistryError> {
        let defaults = match serde_json::to_value(T::default()) {
            Ok(Value::Object(defaults)) => defaults,
            _ => return Err(RegistryError::NotAnObject(T::TYPE_NAME.to_string())),
        };

        Ok(Self {
            type_name: T::TYPE_NAME,
            table: T::TABLE_NAME,
            identity_field: T::identity_field(),
            range_field: DEFAULT_RANGE_FIELD.to_string(),
            unique_fields: Vec::new(),
            relations: BTreeMap::new(),
            defaults,
            created_field: None,
            updated_field: None,
        })
    }

    /// Stored columns: every serialized field that is not a relation.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.defaults
            .keys()
            .map(String::as_str)
            .filter(|field| !self.relations.contains_key(*field))
    }

    #[must_use]
    pub fn is_column(&self, field: &str) -> bool {
        self.defaults.contains_key(field) && !self.relations.contains_key(field)
    }

    #[must_use]
    pub fn relation(&self, field: &str) -> Option<&Relation> {
        self.relations.get(field)
    }

    /// Whether identities are integers (auto-incremented) rather than strings.
    #[must_use]
    pub fn has_numeric_identity(&self) -> bool {
        self.defaults
            .get(self.identity_field)
            .is_some_and(Value::is_number)
    }

    #[must_use]
    pub fn default_value(&self, field: &str) -> Value {
        self.defaults.get(field).cloned().unwrap_or(Value::Null)
    }

    /// Builds a response document from a stored row: defaults first, then every
    /// stored column that is not omitted. Omitted fields keep their defaults.
    #[must_use]
    pub fn materialize(&self, row: &Map<String, Value>, omit: &[String]) -> Map<String, Value> {
        let mut document = self.defaults.clone();
        for column in self.columns() {
            if omit.iter().any(|field| field == column) {
                continue;
            }
            if let Some(value) = row.get(column) {
                document.insert(column.to_string(), value.clone());
            }
        }
        document
    }

    /// Keeps only stored columns of `document`, filling absent ones with defaults.
    #[must_use]
    pub fn to_row(&self, document: &Map<String, Value>) -> Map<String, Value> {
        self.columns()
            .map(|column| {
                let value = document
                    .get(column)
                    .cloned()
                    .unwrap_or_else(|| self.default_value(column));
                (column.to_string(), value)
            })
            .collect()
    }

    /// Writes `now` into the timestamp columns of `row`.
    ///
    /// On insert the creation column is only filled while it still holds its
    /// default, so imported rows keep their own timestamp. Omitted columns are
    /// left alone.
    pub fn stamp(
        &self,
        row: &mut Map<String, Value>,
        now: &Value,
        inserting: bool,
        omit: &[String],
    ) {
        let writable = |field: &String| self.is_column(field) && !omit.contains(field);
        if inserting {
            if let Some(field) = self.created_field.as_ref().filter(|field| writable(*field)) {
                let unset = row
                    .get(field)
                    .is_none_or(|value| value.is_null() || *value == self.default_value(field));
                if unset {
                    row.insert(field.clone(), now.clone());
                }
            }
        }
        if let Some(field) = self.updated_field.as_ref().filter(|field| writable(*field)) {
            row.insert(field.clone(), now.clone());
        }
    }

    /// Types a raw query-string value after the field's default value, so that
    /// `filters[age]=30` compares as a number.
    #[must_use]
    pub fn coerce(&self, field: &str, raw: &str) -> Value {
        match self.defaults.get(field) {
            Some(Value::Number(_)) => raw
                .parse::<i64>()
                .map(Value::from)
                .or_else(|_| raw.parse::<f64>().map(Value::from))
                .unwrap_or_else(|_| Value::String(raw.to_string())),
            Some(Value::Bool(_)) => match raw {
                "1" | "t" | "true" | "TRUE" | "True" => Value::Bool(true),
                "0" | "f" | "false" | "FALSE" | "False" => Value::Bool(false),
                _ => Value::String(raw.to_string()),
            },
            _ => Value::String(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: HashMap<&'static str, ModelInfo>,
}

impl Registry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    #[must_use]
    pub fn info<T: Model>(&self) -> Option<&ModelInfo> {
        self.models.get(T::TYPE_NAME)
    }

    #[must_use]
    pub fn model(&self, type_name: &str) -> Option<&ModelInfo> {
        self.models.get(type_name)
    }

    /// Every many-to-many relation, with the model declaring it.
    pub fn many_to_many(&self) -> impl Iterator<Item = (&ModelInfo, &Relation)> {
        self.models.values().flat_map(|info| {
            info.relations
                .values()
                .filter(|relation| matches!(relation.kind, RelationKind::ManyToMany { .. }))
                .map(move |relation| (info, relation))
        })
    }

    /// Resolves `field` on `P`.
    ///
    /// # Errors
    ///
    /// Fails when `P` is not registered or has no such relation.
    pub fn relation<P: Model>(&self, field: &str) -> Result<&Relation, RegistryError> {
        let info = self
            .info::<P>()
            .ok_or_else(|| RegistryError::UnknownModel(P::TYPE_NAME.to_string()))?;
        info.relation(field)
            .ok_or_else(|| RegistryError::UnknownRelation {
                model: P::TYPE_NAME.to_string(),
                field: field.to_string(),
            })
    }
}

/// Collects registrations; the first error is reported by [`build`](Self::build).
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: HashMap<&'static str, ModelInfo>,
    error: Option<RegistryError>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn model<T: Model>(mut self) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.models.contains_key(T::TYPE_NAME) {
            self.error = Some(RegistryError::DuplicateModel(T::TYPE_NAME.to_string()));
            return self;
        }
        match ModelInfo::new::<T>() {
            Ok(info) => {
                self.models.insert(T::TYPE_NAME, info);
            }
            Err(err) => self.error = Some(err),
        }
        self
    }

    #[must_use]
    pub fn has_one<P: Model, C: Model>(self, field: &str, foreign_key: &str) -> Self {
        self.relation::<P, C>(
            field,
            RelationKind::HasOne {
                foreign_key: foreign_key.to_string(),
            },
        )
    }

    #[must_use]
    pub fn has_many<P: Model, C: Model>(self, field: &str, foreign_key: &str) -> Self {
        self.relation::<P, C>(
            field,
            RelationKind::HasMany {
                foreign_key: foreign_key.to_string(),
            },
        )
    }

    #[must_use]
    pub fn belongs_to<P: Model, C: Model>(self, field: &str, foreign_key: &str) -> Self {
        self.relation::<P, C>(
            field,
            RelationKind::BelongsTo {
                foreign_key: foreign_key.to_string(),
            },
        )
    }

    #[must_use]
    pub fn many_to_many<P: Model, C: Model>(
        self,
        field: &str,
        join_table: &str,
        parent_key: &str,
        child_key: &str,
    ) -> Self {
        self.relation::<P, C>(
            field,
            RelationKind::ManyToMany {
                join_table: join_table.to_string(),
                parent_key: parent_key.to_string(),
                child_key: child_key.to_string(),
            },
        )
    }

    #[must_use]
    pub fn unique<T: Model>(mut self, field: &str) -> Self {
        if let Some(info) = self.registered::<T>() {
            info.unique_fields.push(field.to_string());
        }
        self
    }

    #[must_use]
    pub fn range_field<T: Model>(mut self, field: &str) -> Self {
        if let Some(info) = self.registered::<T>() {
            info.range_field = field.to_string();
        }
        self
    }

    /// Stamps `created_at` on insert and `updated_at` on every write, for
    /// whichever of the two columns `T` has. See [`crate::BasicModel`].
    #[must_use]
    pub fn timestamps<T: Model>(mut self) -> Self {
        if let Some(info) = self.registered::<T>() {
            info.created_field = Some(CREATED_AT.to_string()).filter(|field| info.is_column(field));
            info.updated_field = Some(UPDATED_AT.to_string()).filter(|field| info.is_column(field));
        }
        self
    }

    /// # Errors
    ///
    /// Returns the first registration error.
    pub fn build(self) -> Result<Registry, RegistryError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(Registry {
                models: self.models,
            }),
        }
    }

    fn relation<P: Model, C: Model>(mut self, field: &str, kind: RelationKind) -> Self {
        if self.error.is_none() && !self.models.contains_key(C::TYPE_NAME) {
            self.error = Some(RegistryError::UnknownModel(C::TYPE_NAME.to_string()));
        }
        let Some(info) = self.registered::<P>() else {
            return self;
        };
        if info.relations.contains_key(field) {
            let err = RegistryError::DuplicateRelation {
                model: P::TYPE_NAME.to_string(),
                field: field.to_string(),
            };
            self.error = Some(err);
            return self;
        }
        info.relations.insert(
            field.to_string(),
            Relation {
                field: field.to_string(),
                target: C::TYPE_NAME,
                kind,
            },
        );
        self
    }

    fn registered<T: Model>(&mut self) -> Option<&mut ModelInfo> {
        if self.error.is_some() {
            return None;
        }
        if !self.models.contains_key(T::TYPE_NAME) {
            self.error = Some(RegistryError::UnknownModel(T::TYPE_NAME.to_string()));
            return None;
        }
        self.models.get_mut(T::TYPE_NAME)
    }
}
