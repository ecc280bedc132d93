//! Per-route strategies invoked by the handlers.
//!
//! Each strategy has a single method and is a pure function of the request
//! context and its input. Plain closures implement them:
//!
//! ```rust,ignore
//! let option = CreateOption::<User>::default().with_pretreat(
//!     |_: &RequestContext, mut user: User| -> Result<User, BoxError> {
//!         user.name = user.name.trim().to_string();
//!         Ok(user)
//!     },
//! );
//! ```

use crate::context::RequestContext;
use crate::models::RequestOptions;
use crate::query::QueryTransformation;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Rewrites or rejects the decoded options of a list or get request.
pub trait GetPretreat: Send + Sync {
    /// # Errors
    ///
    /// An error rejects the request with 400.
    fn pretreat(&self, ctx: &RequestContext, options: RequestOptions) -> Result<RequestOptions, BoxError>;
}

impl<F> GetPretreat for F
where
    F: Fn(&RequestContext, RequestOptions) -> Result<RequestOptions, BoxError> + Send + Sync,
{
    fn pretreat(&self, ctx: &RequestContext, options: RequestOptions) -> Result<RequestOptions, BoxError> {
        self(ctx, options)
    }
}

/// Rewrites or rejects a bound record before create or update.
pub trait Pretreat<T>: Send + Sync {
    /// # Errors
    ///
    /// An error rejects the request with 400.
    fn pretreat(&self, ctx: &RequestContext, record: T) -> Result<T, BoxError>;
}

impl<T, F> Pretreat<T> for F
where
    F: Fn(&RequestContext, T) -> Result<T, BoxError> + Send + Sync,
{
    fn pretreat(&self, ctx: &RequestContext, record: T) -> Result<T, BoxError> {
        self(ctx, record)
    }
}

/// Rewrites or rejects the raw identity of a delete request.
pub trait DeletePretreat: Send + Sync {
    /// # Errors
    ///
    /// An error rejects the request with 400.
    fn pretreat(&self, ctx: &RequestContext, id: String) -> Result<String, BoxError>;
}

impl<F> DeletePretreat for F
where
    F: Fn(&RequestContext, String) -> Result<String, BoxError> + Send + Sync,
{
    fn pretreat(&self, ctx: &RequestContext, id: String) -> Result<String, BoxError> {
        self(ctx, id)
    }
}

/// Route-level transformation appended after everything the request asked for,
/// e.g. a tenant scope.
pub trait QueryScope: Send + Sync {
    fn scope(&self, ctx: &RequestContext) -> QueryTransformation;
}

impl QueryScope for QueryTransformation {
    fn scope(&self, _ctx: &RequestContext) -> QueryTransformation {
        self.clone()
    }
}

impl<F> QueryScope for F
where
    F: Fn(&RequestContext) -> QueryTransformation + Send + Sync,
{
    fn scope(&self, ctx: &RequestContext) -> QueryTransformation {
        self(ctx)
    }
}
