/// Unified error types for the bucket gateway
use crate::api::response::ApiResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Tenant, reference or file absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Domain is not part of the trusted tenant map
    #[error("Domain not authorized: {0}")]
    Unauthorized(String),

    /// Another reference already owns the target path
    #[error("Path already in use: {path}")]
    Conflict { path: String, current_hash: String },

    /// Append-time uniqueness violation
    #[error("Hash already exists: {0}")]
    DuplicateHash(String),

    /// Unrecognized conflict resolution choice
    #[error("Invalid option selected: {0}")]
    InvalidOption(String),

    /// Object hash is not 64 lowercase hex characters
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Logical path is empty or escapes the tenant namespace
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Request validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Upload exceeds the tenant's max_file_size
    #[error("File size {size} exceeds maximum allowed {limit}")]
    FileTooLarge { size: u64, limit: u64 },

    /// Upload MIME type is not in the tenant's allow list
    #[error("Unsupported MIME type: {0}")]
    UnsupportedMediaType(String),

    /// Serialization failure
    #[error("Encode error: {0}")]
    Encode(String),

    /// Malformed JSON on disk
    #[error("Decode error: {0}")]
    Decode(String),

    /// I/O failure while reading
    #[error("Read error: {0}")]
    Read(String),

    /// I/O failure while writing
    #[error("Write error: {0}")]
    Write(String),

    /// Tenant namespace missing entirely
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Tenant write lock could not be acquired in time
    #[error("Timed out after {0}s waiting for tenant lock")]
    LockTimeout(u64),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Unauthorized(_) => StatusCode::FORBIDDEN,
            GatewayError::Conflict { .. } | GatewayError::DuplicateHash(_) => {
                StatusCode::CONFLICT
            }
            GatewayError::InvalidOption(_)
            | GatewayError::InvalidHash(_)
            | GatewayError::InvalidPath(_)
            | GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            GatewayError::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Encode(_)
            | GatewayError::Decode(_)
            | GatewayError::Read(_)
            | GatewayError::Write(_)
            | GatewayError::StoreUnavailable(_)
            | GatewayError::Internal(_)
            | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-visible message and optional detail.
    ///
    /// Storage-level failures carry filesystem paths, so their text only
    /// ever goes into `detail`.
    pub fn message_and_detail(&self) -> (String, Option<String>) {
        match self {
            GatewayError::Encode(d) => {
                ("Failed to encode reference data".to_string(), Some(d.clone()))
            }
            GatewayError::Decode(d) => {
                ("Failed to decode stored data".to_string(), Some(d.clone()))
            }
            GatewayError::Read(d) => ("Failed to read from storage".to_string(), Some(d.clone())),
            GatewayError::Write(d) => ("Failed to write to storage".to_string(), Some(d.clone())),
            GatewayError::StoreUnavailable(d) => {
                ("Tenant storage is unavailable".to_string(), Some(d.clone()))
            }
            GatewayError::Internal(d) => ("Internal server error".to_string(), Some(d.clone())),
            GatewayError::Io(e) => ("Internal server error".to_string(), Some(e.to_string())),
            other => (other.to_string(), None),
        }
    }
}

/// Convert GatewayError to HTTP response
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body: ApiResponse = self.into();
        (status, Json(body)).into_response()
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
