/// Unified error type for the service
/// Each variant maps to one caller-facing error kind and HTTP status
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

/// Message returned when a read-only statement tried to mutate the graph
pub const MUTATION_MESSAGE: &str = "not authorized to modify the database";

/// Caller-facing replacement for backend timeout messages
pub const TIMEOUT_MESSAGE: &str = "Timeout experienced. This could be due to database traffic or to non-optimal database queries. If the latter, please consult the neuPrint documentation or post a question at https://groups.google.com/forum/#!forum/neuprint to understand other options.";

#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    /// Missing or malformed request field
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested data-model version does not prefix-match the store's
    #[error("data model version incompatible: requested {required}, store provides {observed}")]
    IncompatibleVersion { required: String, observed: String },

    /// Statement declared read-only reported updates
    #[error("not authorized to modify the database")]
    ForbiddenMutation,

    /// Backend rejected the statement
    #[error("{message}")]
    Query {
        message: String,
        code: Option<String>,
    },

    /// Backend timed out; `original` keeps the backend's own wording
    #[error("{message}")]
    Timeout { message: String, original: String },

    #[error("{message}")]
    Unauthorized { message: String },

    #[error("{message}")]
    Forbidden { message: String },

    #[error("dataset not found: {dataset}")]
    DatasetNotFound { dataset: String },

    #[error("instance not found: {instance}")]
    InstanceNotFound { instance: String },

    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    /// Dataset descriptor has the wrong shape
    #[error("malformed metadata for dataset {dataset}: {message}")]
    MalformedMetadata { dataset: String, message: String },

    #[error("auth service unavailable")]
    IdentityServiceUnavailable { source_message: String },

    /// Backend could not be reached or the pool is exhausted
    #[error("backend unavailable: {message}")]
    BackendUnavailable { message: String },

    #[error("dataset {dataset} is served by more than one primary store")]
    DuplicateDataset { dataset: String },

    #[error("non-unique instance given: {instance}")]
    DuplicateInstance { instance: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    /// Should not happen; indicates a bug or an unexpected backend reply
    #[error("internal error: {message}")]
    Internal {
        message: String,
        context: Option<String>,
    },
}

impl ServiceError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn incompatible_version(required: impl Into<String>, observed: impl Into<String>) -> Self {
        Self::IncompatibleVersion {
            required: required.into(),
            observed: observed.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            code: None,
        }
    }

    pub fn query_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// Wraps a backend timeout, replacing the message shown to callers
    pub fn timeout(original: impl Into<String>) -> Self {
        Self::Timeout {
            message: TIMEOUT_MESSAGE.to_string(),
            original: original.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn dataset_not_found(dataset: impl Into<String>) -> Self {
        Self::DatasetNotFound {
            dataset: dataset.into(),
        }
    }

    pub fn instance_not_found(instance: impl Into<String>) -> Self {
        Self::InstanceNotFound {
            instance: instance.into(),
        }
    }

    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    pub fn malformed_metadata(dataset: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedMetadata {
            dataset: dataset.into(),
            message: message.into(),
        }
    }

    pub fn identity_unavailable(source_message: impl Into<String>) -> Self {
        Self::IdentityServiceUnavailable {
            source_message: source_message.into(),
        }
    }

    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    /// Add context to an internal error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        if let Self::Internal { context: ctx, .. } = &mut self {
            *ctx = Some(context.into());
        }
        self
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. }
            | Self::IncompatibleVersion { .. }
            | Self::ForbiddenMutation
            | Self::Query { .. }
            | Self::Timeout { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::DatasetNotFound { .. }
            | Self::InstanceNotFound { .. }
            | Self::KeyNotFound { .. } => StatusCode::NOT_FOUND,
            Self::IdentityServiceUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::MalformedMetadata { .. }
            | Self::DuplicateDataset { .. }
            | Self::DuplicateInstance { .. }
            | Self::Config { .. }
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text kept out of the caller-facing message but still worth logging
    pub fn debug_detail(&self) -> Option<&str> {
        match self {
            Self::Timeout { original, .. } => Some(original),
            Self::IdentityServiceUnavailable { source_message } => Some(source_message),
            Self::Internal { context, .. } => context.as_deref(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
            context: None,
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
            context: Some("io".to_string()),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
            context: Some("json".to_string()),
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            Self::backend_unavailable(err.to_string())
        } else {
            Self::internal(err.to_string())
        }
    }
}

/// JSON error body
#[derive(Serialize)]
struct ErrorBody<'a> {
    #[serde(rename = "Error")]
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug: Option<&'a str>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, detail = ?self.debug_detail(), "request failed");
        }
        let debug = match &self {
            Self::Timeout { original, .. } => Some(original.as_str()),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
            debug,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServiceError::ForbiddenMutation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ServiceError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ServiceError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(ServiceError::dataset_not_found("d").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ServiceError::malformed_metadata("d", "bad").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::identity_unavailable("down").status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_timeout_keeps_original() {
        let err = ServiceError::timeout("Neo.ClientError.Transaction.TransactionTimedOut");
        assert_eq!(err.to_string(), TIMEOUT_MESSAGE);
        assert_eq!(
            err.debug_detail(),
            Some("Neo.ClientError.Transaction.TransactionTimedOut")
        );
    }

    #[test]
    fn test_mutation_message() {
        assert_eq!(ServiceError::ForbiddenMutation.to_string(), MUTATION_MESSAGE);
    }

    #[test]
    fn test_metadata_error_names_dataset() {
        let err = ServiceError::malformed_metadata("hemibrain", "hidden is not a boolean");
        assert!(err.to_string().contains("hemibrain"));
    }
}
