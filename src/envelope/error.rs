use thiserror::Error;

/// Errors produced while verifying a signed [`super::Envelope`].
///
/// Every variant is distinct on purpose: the reconcile and event-pipeline
/// callers log these at different levels and none of them should be inferred
/// from a string match.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope is missing a signature")]
    MissingSignature,

    #[error("envelope is missing a nonce")]
    MissingNonce,

    #[error("envelope is missing an issued_at timestamp")]
    MissingTimestamp,

    #[error("event is stale: issued_at={issued_at_ms}ms is {age_ms}ms older than the {window_ms}ms staleness window")]
    StaleEvent {
        issued_at_ms: i64,
        age_ms: i64,
        window_ms: i64,
    },

    #[error("event is future-dated: issued_at={issued_at_ms}ms is {skew_ms}ms ahead of now, window={window_ms}ms")]
    FutureDated {
        issued_at_ms: i64,
        skew_ms: i64,
        window_ms: i64,
    },

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("duplicate nonce: {nonce}")]
    DuplicateNonce { nonce: String },

    #[error("failed to canonicalize envelope for signing: {0}")]
    Canonicalization(#[from] serde_json::Error),
}
