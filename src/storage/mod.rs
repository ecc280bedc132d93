//! The storage collaborator: executes transformation lists against a backing
//! store. Handlers only ever talk to [`Storage`].

use async_trait::async_trait;
use sea_orm::DbErr;
use thiserror::Error;

use crate::context::RequestContext;
use crate::query::QueryTransformation;
use crate::traits::Model;

pub mod document;
mod memory;
mod plan;
mod sea;

pub use memory::MemoryStorage;
pub use plan::{Plan, PlannedPreload};
pub use sea::SeaOrmStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found")]
    NotFound,

    #[error("record already exists")]
    AlreadyExists,

    #[error("duplicate value for unique field '{field}'")]
    UniqueViolation { field: String },

    #[error("model '{0}' is not registered")]
    UnknownModel(String),

    #[error("model '{model}' has no relation '{field}'")]
    UnknownRelation { model: String, field: String },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid query: {0}")]
    Query(String),

    /// Details are logged, never sent to clients.
    #[error("database error")]
    Database(#[from] DbErr),
}

/// Executes composed transformation lists for any registered model.
///
/// Every method receives the request context, unmodified, and an immutable
/// transformation slice built for that single delegation. Implementations
/// decide atomicity; handlers never retry.
#[async_trait]
pub trait Storage: Clone + Send + Sync + 'static {
    async fn find_many<T: Model>(
        &self,
        ctx: &RequestContext,
        query: &[QueryTransformation],
    ) -> Result<Vec<T>, StorageError>;

    /// # Errors
    ///
    /// [`StorageError::NotFound`] when no record with `id` matches `query`.
    async fn find_by_id<T: Model>(
        &self,
        ctx: &RequestContext,
        id: &T::Id,
        query: &[QueryTransformation],
    ) -> Result<T, StorageError>;

    /// Counts records matching the conditions of `query`.
    async fn count<T: Model>(
        &self,
        ctx: &RequestContext,
        query: &[QueryTransformation],
    ) -> Result<u64, StorageError>;

    /// Counts records linked to `parent` through `field` that match `query`.
    async fn count_association<P: Model>(
        &self,
        ctx: &RequestContext,
        parent: &P,
        field: &str,
        query: &[QueryTransformation],
    ) -> Result<u64, StorageError>;

    /// Inserts `record` unless an equivalent one exists. An unset identity is
    /// assigned. Only the omissions of `query` apply.
    ///
    /// # Errors
    ///
    /// [`StorageError::AlreadyExists`] or [`StorageError::UniqueViolation`]
    /// instead of overwriting.
    async fn create<T: Model>(
        &self,
        ctx: &RequestContext,
        record: T,
        query: &[QueryTransformation],
    ) -> Result<T, StorageError>;

    /// Writes every non-omitted column of `record` over the stored row with the
    /// same identity, provided it matches the conditions of `query`.
    async fn save<T: Model>(
        &self,
        ctx: &RequestContext,
        record: T,
        query: &[QueryTransformation],
    ) -> Result<T, StorageError>;

    /// Deletes the stored row with the identity of `record`, provided it matches
    /// the conditions of `query`, along with its join-table links.
    async fn delete<T: Model>(
        &self,
        ctx: &RequestContext,
        record: &T,
        query: &[QueryTransformation],
    ) -> Result<(), StorageError>;

    /// Links `child` to `parent` through `field`, inserting the child first
    /// when it does not exist yet.
    async fn append_association<P: Model, C: Model>(
        &self,
        ctx: &RequestContext,
        parent: &P,
        field: &str,
        child: C,
    ) -> Result<C, StorageError>;

    /// Removes the link between `parent` and `child`. The child record stays.
    async fn delete_association<P: Model, C: Model>(
        &self,
        ctx: &RequestContext,
        parent: &P,
        field: &str,
        child: &C,
    ) -> Result<(), StorageError>;
}
