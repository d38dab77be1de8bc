use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("session id must not be empty")]
    EmptySessionId,

    #[error("target host must not be empty")]
    EmptyTargetHost,

    #[error("target port {port} is out of range")]
    InvalidTargetPort { port: u16 },

    #[error("expiry {expires_at_ms} is not in the future (now={now_ms})")]
    ExpiryInPast { expires_at_ms: i64, now_ms: i64 },

    #[error("session {session_id} already exists")]
    DuplicateSession { session_id: String },

    #[error("tunnel session limit reached ({max})")]
    MaxSessionsReached { max: usize },

    #[error("failed to bind tunnel listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to report tunnel lifecycle event: {0}")]
    Report(#[from] TransportError),
}
