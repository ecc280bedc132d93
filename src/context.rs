use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::storage::StorageError;

/// Header carrying the request id. A UUID v4 is generated when it is absent.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request-scoped deadline, stored as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(pub Instant);

/// Per-request data passed unmodified to every hook and storage delegation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    deadline: Option<Instant>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Runs a storage delegation under the request deadline.
    ///
    /// An expired deadline fails before the delegation is polled.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DeadlineExceeded`] when the deadline passes, or the
    /// delegation's own error.
    pub async fn within<F, T>(&self, delegation: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let Some(deadline) = self.deadline else {
            return delegation.await;
        };
        if Instant::now() >= deadline {
            return Err(StorageError::DeadlineExceeded);
        }
        tokio::time::timeout_at(deadline, delegation)
            .await
            .map_err(|_| StorageError::DeadlineExceeded)?
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

        let mut ctx = Self::new(request_id);
        if let Some(Deadline(deadline)) = parts.extensions.get::<Deadline>() {
            ctx = ctx.with_deadline(*deadline);
        }
        Ok(ctx)
    }
}

/// Stamps every request with a [`Deadline`] `timeout` from now.
///
/// ```rust,ignore
/// let app = router.layer(axum::middleware::from_fn_with_state(
///     Duration::from_secs(5),
///     deadline_middleware,
/// ));
/// ```
pub async fn deadline_middleware(
    State(timeout): State<Duration>,
    mut request: Request,
    next: Next,
) -> Response {
    request
        .extensions_mut()
        .insert(Deadline(Instant::now() + timeout));
    next.run(request).await
}
