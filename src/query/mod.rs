//! Query transformations and the composer that builds them from request options.
//!
//! A transformation list is built once per storage delegation and handed to the
//! [`Storage`](crate::storage::Storage) collaborator as an immutable slice. Order
//! matters: omission and preload stages apply in the order they were appended.

mod compose;

pub use compose::{compose, compose_filters};

/// One composable step narrowing or shaping a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTransformation {
    /// `limit <= 0` means unlimited, `offset <= 0` means no offset.
    Page { limit: i64, offset: i64 },
    /// Exclude fields from the read projection or the written columns.
    Omit(Vec<String>),
    OrderBy { field: String, descending: bool },
    /// Equality filter; several are conjunctive.
    FilterBy { field: String, value: String },
    /// Range `[from, to)` over the model's range field.
    FilterAt { from: String, to: String },
    /// Eagerly load a relation path; `scope` applies to the loaded records.
    Preload {
        path: String,
        scope: Vec<QueryTransformation>,
    },
    /// Several transformations applied as one unit, e.g. a route scope.
    All(Vec<QueryTransformation>),
}

impl QueryTransformation {
    pub fn page(limit: i64, offset: i64) -> Self {
        Self::Page { limit, offset }
    }

    pub fn omit<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Omit(fields.into_iter().map(Into::into).collect())
    }

    pub fn order_by(field: impl Into<String>, descending: bool) -> Self {
        Self::OrderBy {
            field: field.into(),
            descending,
        }
    }

    pub fn filter_by(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::FilterBy {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn filter_at(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::FilterAt {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn preload(path: impl Into<String>) -> Self {
        Self::Preload {
            path: path.into(),
            scope: Vec::new(),
        }
    }

    pub fn preload_with(path: impl Into<String>, scope: Vec<QueryTransformation>) -> Self {
        Self::Preload {
            path: path.into(),
            scope,
        }
    }

    /// Whether the transformation narrows which records match, as opposed to
    /// shaping how they are returned. Counts keep only these.
    #[must_use]
    pub fn is_condition(&self) -> bool {
        match self {
            Self::FilterBy { .. } | Self::FilterAt { .. } => true,
            Self::All(inner) => inner.iter().any(Self::is_condition),
            _ => false,
        }
    }
}
