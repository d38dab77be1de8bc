use std::time::Duration;

use thiserror::Error;

use crate::transport::{ApiError, TransportError};

/// How a connection failure should be handled by the reconnect engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// Not retryable — the caller should stop and surface the error.
    PermanentFailure,
    /// Credentials are no longer valid; invoke the auth callback and stop.
    RetryAuth,
    /// Honor the server's requested wait before the next attempt, without
    /// advancing the exponential backoff counter.
    RespectServer(Duration),
    /// Ordinary transient failure; back off and retry.
    RetryTransient,
}

pub fn classify(err: &TransportError) -> ErrorClass {
    match err {
        TransportError::Api(api) => classify_api(api),
        _ => ErrorClass::RetryTransient,
    }
}

fn classify_api(err: &ApiError) -> ErrorClass {
    match err {
        ApiError::Unauthorized { .. } => ErrorClass::RetryAuth,
        ApiError::RateLimit {
            retry_after_secs, ..
        } => ErrorClass::RespectServer(Duration::from_secs(retry_after_secs.unwrap_or(0))),
        ApiError::Forbidden { .. } | ApiError::NotFound { .. } => ErrorClass::PermanentFailure,
        _ => ErrorClass::RetryTransient,
    }
}

#[derive(Debug, Error)]
pub enum ReconnectError {
    #[error("reconnect loop was cancelled")]
    Cancelled,

    #[error("authentication rejected by control plane: {0}")]
    AuthRejected(#[source] TransportError),

    #[error("permanent failure from control plane: {0}")]
    Permanent(#[source] TransportError),
}
