use hyper::StatusCode;
use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Errors that can occur while relaying an attachment
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} must be a numeric identifier, got {value:?}")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("Field {field} is not a valid column id: {value:?}")]
    InvalidColumnId { field: &'static str, value: String },

    #[error("Payload is not valid base64: {0}")]
    InvalidPayload(#[from] base64::DecodeError),

    #[error("No credential configured for the target service")]
    MissingCredential,

    #[error("Upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(String, String),

    #[error("Upstream {endpoint} returned {status}: {body}")]
    UpstreamStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("Failed to read response body: {0}")]
    ResponseBodyError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Errors raised before any remote call are the caller's fault, except a
    /// missing credential which is a deployment problem.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidJson(_)
            | RelayError::RequestBodyError(_)
            | RelayError::MissingField(_)
            | RelayError::InvalidIdentifier { .. }
            | RelayError::InvalidColumnId { .. }
            | RelayError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            RelayError::MissingCredential
            | RelayError::UpstreamRequestFailed(..)
            | RelayError::UpstreamStatus { .. }
            | RelayError::UpstreamTimeout(_)
            | RelayError::ResponseBodyError(_)
            | RelayError::InternalError(_)
            | RelayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
