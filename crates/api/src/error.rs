use crate::retry::Retryable;

/// Errors from the control-plane client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("no authorization returned for part {0}")]
    MissingAuthorization(u32),
}

impl ApiError {
    /// HTTP status returned by the server, if the request got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            ApiError::Http(e) => !e.is_builder() && !e.is_decode(),
            ApiError::Api { status, .. } => is_transient_status(*status),
            ApiError::Json(_) | ApiError::InvalidUrl(_) | ApiError::MissingAuthorization(_) => {
                false
            }
        }
    }
}

/// Errors from talking to the storage backend directly.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend refused the bytes because they do not match the
    /// checksum the destination was authorized with.
    #[error("integrity check rejected by storage ({status}): {body}")]
    IntegrityRejected { status: u16, body: String },

    #[error("storage rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("storage response has no ETag")]
    MissingEtag,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}
