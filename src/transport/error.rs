use thiserror::Error;

/// A control-plane HTTP response outside the 2xx range, classified into the
/// sentinels the reconnect engine and callers branch on.
///
/// `Server` matches *any* 5xx status, not just 500 — compare with
/// [`ApiError::is_server_error`] rather than `matches!` when the exact code
/// doesn't matter.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request ({status}): {message}")]
    BadRequest { status: u16, message: String },

    #[error("unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("forbidden ({status}): {message}")]
    Forbidden { status: u16, message: String },

    #[error("not found ({status}): {message}")]
    NotFound { status: u16, message: String },

    #[error("conflict ({status}): {message}")]
    Conflict { status: u16, message: String },

    #[error("payload too large ({status}): {message}")]
    PayloadTooLarge { status: u16, message: String },

    #[error("rate limited ({status}), retry after {retry_after_secs:?}s: {message}")]
    RateLimit {
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("unexpected status ({status}): {message}")]
    Other { status: u16, message: String },
}

impl ApiError {
    pub fn from_status(status: u16, message: String, retry_after_secs: Option<u64>) -> Self {
        match status {
            400 => ApiError::BadRequest { status, message },
            401 => ApiError::Unauthorized { status, message },
            403 => ApiError::Forbidden { status, message },
            404 => ApiError::NotFound { status, message },
            409 => ApiError::Conflict { status, message },
            413 => ApiError::PayloadTooLarge { status, message },
            429 => ApiError::RateLimit {
                status,
                message,
                retry_after_secs,
            },
            500..=599 => ApiError::Server { status, message },
            _ => ApiError::Other { status, message },
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ApiError::BadRequest { status, .. }
            | ApiError::Unauthorized { status, .. }
            | ApiError::Forbidden { status, .. }
            | ApiError::NotFound { status, .. }
            | ApiError::Conflict { status, .. }
            | ApiError::PayloadTooLarge { status, .. }
            | ApiError::RateLimit { status, .. }
            | ApiError::Server { status, .. }
            | ApiError::Other { status, .. } => *status,
        }
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, ApiError::Server { .. }) || (500..600).contains(&self.status())
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ApiError::RateLimit {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed to decode JSON response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to build request URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("response body exceeded the {limit_bytes} byte decompression limit")]
    ResponseTooLarge { limit_bytes: usize },

    #[error("failed to gzip-compress request body: {0}")]
    Compression(#[source] std::io::Error),

    #[error("failed to gzip-decompress response body: {0}")]
    Decompression(#[source] std::io::Error),
}
