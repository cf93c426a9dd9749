use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unexpected HTTP status: {0}")]
    Status(u16),

    #[error("API returned status '{0}'")]
    Api(String),
}

impl ClientError {
    /// Whether a retry later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClientError::Status(code) => *code >= 500 || *code == 429,
            ClientError::InvalidUrl(_) | ClientError::Api(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
