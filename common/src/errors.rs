//! Error types shared by the gateway.
//!
//! `AppError` is the error taxonomy every layer returns. `RpcError` is the
//! remote envelope: it annotates an `AppError` with the operation that failed
//! and where, and is what handlers hand back to the caller.

use std::panic::Location;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::response::ApiResponse;

/// Result alias used across the gateway.
pub type AppResult<T> = Result<T, AppError>;

/// Gateway error taxonomy.
#[derive(Debug, Error)]
pub enum AppError {
    /// No connection is registered (or usable) for the given id.
    #[error("No store connection exist for id {0}")]
    ConnectionNotFound(String),

    /// A filter, value, document or options blob could not be decoded.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A request field failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Connecting to or pinging the backend failed.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend rejected a CRUD call.
    #[error("{0}")]
    BackendOperationFailed(String),

    /// The operation has no meaning for this backend.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The target database or collection does not exist.
    #[error("{0}")]
    NamespaceNotFound(String),

    /// A single-document lookup matched nothing.
    #[error("no document matches the query in {0}")]
    DocumentNotFound(String),

    /// Reading or writing the configuration record failed.
    #[error("configuration persistence failed: {0}")]
    Persistence(String),
}

impl AppError {
    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ConnectionNotFound(_) => "CONNECTION_NOT_FOUND",
            AppError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            AppError::BackendOperationFailed(_) => "BACKEND_OPERATION_FAILED",
            AppError::Unsupported(_) => "UNSUPPORTED",
            AppError::NamespaceNotFound(_) => "NAMESPACE_NOT_FOUND",
            AppError::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            AppError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }

    /// HTTP status the error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ConnectionNotFound(_)
            | AppError::NamespaceNotFound(_)
            | AppError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidArgument(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::BackendOperationFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Annotates the error with the operation that produced it.
    ///
    /// The source location is the caller's.
    #[track_caller]
    pub fn in_rpc(self, function: &'static str) -> RpcError {
        let location = Location::caller();
        RpcError {
            source: self,
            function,
            file: location.file(),
            line: location.line(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ApiResponse::err(self.code(), self.to_string());
        (status, Json(body)).into_response()
    }
}

/// Remote error envelope.
///
/// Carries the failing operation name and the source location that produced
/// the failure as diagnostic metadata.
#[derive(Debug, Error)]
#[error("{function}: {source}")]
pub struct RpcError {
    #[source]
    pub source: AppError,
    pub function: &'static str,
    pub file: &'static str,
    pub line: u32,
}

impl RpcError {
    /// Diagnostic metadata rendered into `error.details`.
    pub fn details(&self) -> serde_json::Value {
        json!({
            "function": self.function,
            "file": self.file,
            "line": self.line,
        })
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        tracing::warn!(
            function = self.function,
            code = self.source.code(),
            error = %self.source,
            "rpc failed"
        );
        let status = self.source.status();
        let body = ApiResponse::err_with_details(
            self.source.code(),
            self.source.to_string(),
            self.details(),
        );
        (status, Json(body)).into_response()
    }
}

/// Attaches rpc diagnostics to a fallible result.
pub trait RpcResultExt<T> {
    /// Converts the error side into an `RpcError` for `function`.
    fn in_rpc(self, function: &'static str) -> Result<T, RpcError>;
}

impl<T> RpcResultExt<T> for AppResult<T> {
    #[track_caller]
    fn in_rpc(self, function: &'static str) -> Result<T, RpcError> {
        match self {
            Ok(value) => Ok(value),
            Err(e) => Err(e.in_rpc(function)),
        }
    }
}
