//! # Error Handling for CRUD routes
//!
//! Every failure is handled at the handler boundary and turned into a status
//! code plus a single `{"error": "<message>"}` body:
//!
//! | Variant | Status |
//! |---|---|
//! | `Bind` | 400 |
//! | `MissingIdentifier` | 400 |
//! | `IdentityMismatch` | 400 |
//! | `Denylisted` | 400 |
//! | `PretreatRejected` | 400 |
//! | `NotFound` | 404 |
//! | `ProcessFailed` | 422 |
//!
//! Storage failures are logged with their internal details; database errors
//! reach the client only as a generic message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

use crate::hooks::BoxError;
use crate::options::Operation;
use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    /// 400 - malformed or unparseable request input
    Bind { message: String },

    /// 400 - required path identity absent
    MissingIdentifier { param: String },

    /// 400 - update tried to change the identity field
    IdentityMismatch {
        field: String,
        stored: String,
        submitted: String,
    },

    /// 400 - identity is in the route's `limit_id` list
    Denylisted { param: String, id: String },

    /// 400 - a configured pretreat hook returned an error
    PretreatRejected {
        operation: Operation,
        source: BoxError,
    },

    /// 404 - record absent for the update existence check
    NotFound { resource: String, id: String },

    /// 422 - storage failure during fetch/insert/save/delete
    ProcessFailed {
        operation: Operation,
        source: StorageError,
    },
}

impl ApiError {
    pub fn bind(message: impl Into<String>) -> Self {
        Self::Bind {
            message: message.into(),
        }
    }

    pub fn missing_identifier(param: impl Into<String>) -> Self {
        Self::MissingIdentifier {
            param: param.into(),
        }
    }

    pub fn identity_mismatch(
        field: impl Into<String>,
        stored: impl fmt::Display,
        submitted: impl fmt::Display,
    ) -> Self {
        Self::IdentityMismatch {
            field: field.into(),
            stored: stored.to_string(),
            submitted: submitted.to_string(),
        }
    }

    pub fn denylisted(param: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::Denylisted {
            param: param.into(),
            id: id.to_string(),
        }
    }

    pub fn pretreat_rejected(operation: Operation, source: BoxError) -> Self {
        Self::PretreatRejected { operation, source }
    }

    pub fn not_found(resource: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    pub fn process_failed(operation: Operation, source: StorageError) -> Self {
        Self::ProcessFailed { operation, source }
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Bind { .. }
            | Self::MissingIdentifier { .. }
            | Self::IdentityMismatch { .. }
            | Self::Denylisted { .. }
            | Self::PretreatRejected { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::ProcessFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Message sent to the client.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Bind { message } => format!("request bind failed: {message}"),
            Self::MissingIdentifier { param } => format!("missing id: path parameter '{param}'"),
            Self::IdentityMismatch { field, .. } => format!("cannot update id: '{field}' is immutable"),
            Self::Denylisted { id, .. } => format!("id '{id}' is protected"),
            Self::PretreatRejected { operation, source } => {
                format!("{operation} rejected: {source}")
            }
            Self::NotFound { resource, id } => format!("{resource} with id '{id}' not found"),
            Self::ProcessFailed { operation, source } => {
                format!("{operation} process failed: {source}")
            }
        }
    }

    fn log_internal(&self) {
        match self {
            Self::ProcessFailed {
                operation,
                source: StorageError::Database(internal),
            } => {
                tracing::error!(%operation, error = ?internal, "database error occurred");
            }
            Self::ProcessFailed { operation, source } => {
                tracing::warn!(%operation, error = %source, "process failed");
            }
            Self::IdentityMismatch {
                field,
                stored,
                submitted,
            } => {
                tracing::warn!(%field, %stored, %submitted, "id mismatch: cannot update id");
            }
            Self::Denylisted { param, id } => {
                tracing::warn!(%param, %id, "request targets a protected id");
            }
            _ => {
                tracing::debug!(
                    error = %self.user_message(),
                    status = %self.status_code(),
                    "API error"
                );
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log_internal();

        let status = self.status_code();
        let body = ErrorResponse {
            error: self.user_message(),
        };
        (status, Json(body)).into_response()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PretreatRejected { source, .. } => Some(source.as_ref()),
            Self::ProcessFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::DbErr;

    #[test]
    fn test_all_status_codes() {
        let test_cases = vec![
            (ApiError::bind("bad json"), StatusCode::BAD_REQUEST),
            (ApiError::missing_identifier("UserID"), StatusCode::BAD_REQUEST),
            (ApiError::identity_mismatch("id", 7, 9), StatusCode::BAD_REQUEST),
            (ApiError::denylisted("UserID", 3), StatusCode::BAD_REQUEST),
            (
                ApiError::pretreat_rejected(Operation::Create, "nope".into()),
                StatusCode::BAD_REQUEST,
            ),
            (ApiError::not_found("user", 7), StatusCode::NOT_FOUND),
            (
                ApiError::process_failed(Operation::List, StorageError::NotFound),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];

        for (err, expected_status) in test_cases {
            assert_eq!(err.status_code(), expected_status);
        }
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            ApiError::missing_identifier("UserID").user_message(),
            "missing id: path parameter 'UserID'"
        );
        assert_eq!(
            ApiError::not_found("user", 7).user_message(),
            "user with id '7' not found"
        );
        assert_eq!(
            ApiError::pretreat_rejected(Operation::Update, "name is required".into()).user_message(),
            "update rejected: name is required"
        );
    }

    #[test]
    fn test_database_details_are_not_exposed() {
        let err = ApiError::process_failed(
            Operation::Get,
            StorageError::Database(DbErr::Custom("secret table layout".to_string())),
        );
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!err.user_message().contains("secret"));
        assert!(err.user_message().starts_with("get process failed"));
    }

    #[test]
    fn test_error_body_shape() {
        let response = ApiError::denylisted("UserID", 3).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_display_trait() {
        let err = ApiError::bind("Test error");
        assert_eq!(format!("{err}"), "request bind failed: Test error");
    }
}
