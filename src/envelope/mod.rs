//! Signed event envelopes: wire format, canonical signing, and verification
//! against staleness and replay.

mod error;
mod nonce;
mod verifier;

pub use error::EnvelopeError;
pub use nonce::NonceStore;
pub use verifier::{KeyedVerifier, NoOpVerifier, VerifyKeys, Verifier};

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

pub const STALENESS_WINDOW_MS: i64 = 5 * 60 * 1000;
pub const NONCE_TTL_MS: i64 = 5 * 60 * 1000;

/// A signed, replay-protected event delivered by the control plane.
///
/// `payload` is carried as a raw, unreparsed JSON fragment: the canonical
/// form signed by the producer is whatever bytes it sent, and reformatting
/// them (even semantically-neutral whitespace or key-order changes) would
/// invalidate the signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event_type: String,
    pub event_id: String,
    pub issued_at: i64,
    pub nonce: String,
    pub payload: Box<RawValue>,
    pub signature: String,
}

/// The subset of envelope fields that are signed, in the fixed field order
/// the wire format requires. Kept as its own type so the signed bytes can
/// never accidentally include `signature` itself.
#[derive(Serialize)]
struct SignedFields<'a> {
    event_type: &'a str,
    event_id: &'a str,
    issued_at: i64,
    nonce: &'a str,
    payload: &'a RawValue,
}

impl Envelope {
    pub fn new(
        event_type: impl Into<String>,
        event_id: impl Into<String>,
        issued_at: i64,
        nonce: impl Into<String>,
        payload: Box<RawValue>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            event_id: event_id.into(),
            issued_at,
            nonce: nonce.into(),
            payload,
            signature: String::new(),
        }
    }

    /// The exact byte sequence that is signed: the canonical JSON
    /// serialization of {event_type, event_id, issued_at, nonce, payload},
    /// in that field order, and nothing else. The control plane that
    /// produces these envelopes signs this same serialization, so this
    /// must not be altered with a local prefix or suffix.
    pub fn message_to_verify(&self) -> Result<Vec<u8>, EnvelopeError> {
        let fields = SignedFields {
            event_type: &self.event_type,
            event_id: &self.event_id,
            issued_at: self.issued_at,
            nonce: &self.nonce,
            payload: &self.payload,
        };
        let mut message = Vec::with_capacity(256);
        serde_json::to_writer(&mut message, &fields)?;
        Ok(message)
    }
}
