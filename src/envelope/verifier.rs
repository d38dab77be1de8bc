use std::sync::RwLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};

use super::error::EnvelopeError;
use super::nonce::NonceStore;
use super::{Envelope, NONCE_TTL_MS, STALENESS_WINDOW_MS};

/// Something that can check a [`Envelope`]'s signature, freshness and
/// replay status.
///
/// Implementations must record the nonce only after the signature has
/// verified — see [`NonceStore::record`].
pub trait Verifier: Send + Sync {
    fn verify(&self, envelope: &Envelope, now_ms: i64) -> Result<(), EnvelopeError>;
}

struct KeyState {
    current: VerifyingKey,
    previous: Option<(VerifyingKey, i64)>,
}

/// Verifies envelopes against a current signing key, with a grace window
/// during which a previous key is also accepted (key rotation).
pub struct KeyedVerifier {
    keys: RwLock<KeyState>,
    nonces: NonceStore,
    staleness_window_ms: i64,
}

impl KeyedVerifier {
    pub fn new(current: VerifyingKey) -> Self {
        Self {
            keys: RwLock::new(KeyState {
                current,
                previous: None,
            }),
            nonces: NonceStore::new(NONCE_TTL_MS),
            staleness_window_ms: STALENESS_WINDOW_MS,
        }
    }

    pub fn with_staleness_window(mut self, window_ms: i64) -> Self {
        self.staleness_window_ms = window_ms;
        self
    }

    /// Rotates the signing key. `previous_transition_deadline_ms` is the
    /// absolute time after which the outgoing key is no longer accepted.
    pub fn rotate(&self, new_current: VerifyingKey, previous_transition_deadline_ms: i64) {
        let mut keys = self.keys.write().expect("key state lock poisoned");
        let outgoing = keys.current;
        keys.previous = Some((outgoing, previous_transition_deadline_ms));
        keys.current = new_current;
    }

    fn verify_signature(&self, envelope: &Envelope, now_ms: i64) -> Result<(), EnvelopeError> {
        let message = envelope.message_to_verify()?;
        let sig_bytes = BASE64
            .decode(&envelope.signature)
            .map_err(|_| EnvelopeError::SignatureVerificationFailed)?;
        let signature = Signature::try_from(sig_bytes.as_slice())
            .map_err(|_| EnvelopeError::SignatureVerificationFailed)?;

        let keys = self.keys.read().expect("key state lock poisoned");
        if keys.current.verify(&message, &signature).is_ok() {
            return Ok(());
        }
        if let Some((previous, deadline_ms)) = keys.previous {
            if now_ms < deadline_ms && previous.verify(&message, &signature).is_ok() {
                return Ok(());
            }
        }
        Err(EnvelopeError::SignatureVerificationFailed)
    }
}

impl Verifier for KeyedVerifier {
    fn verify(&self, envelope: &Envelope, now_ms: i64) -> Result<(), EnvelopeError> {
        if envelope.signature.is_empty() {
            return Err(EnvelopeError::MissingSignature);
        }
        if envelope.nonce.is_empty() {
            return Err(EnvelopeError::MissingNonce);
        }
        if envelope.issued_at == 0 {
            return Err(EnvelopeError::MissingTimestamp);
        }

        let age_ms = now_ms - envelope.issued_at;
        if age_ms > self.staleness_window_ms {
            return Err(EnvelopeError::StaleEvent {
                issued_at_ms: envelope.issued_at,
                age_ms,
                window_ms: self.staleness_window_ms,
            });
        }
        let skew_ms = -age_ms;
        if skew_ms > self.staleness_window_ms {
            return Err(EnvelopeError::FutureDated {
                issued_at_ms: envelope.issued_at,
                skew_ms,
                window_ms: self.staleness_window_ms,
            });
        }

        self.verify_signature(envelope, now_ms)?;

        // Recorded only now that the signature has checked out.
        self.nonces.record(&envelope.nonce, now_ms)
    }
}

/// Accepts every envelope without checking anything. Used in tests and
/// during bootstrap before signing keys are provisioned.
pub struct NoOpVerifier;

impl Verifier for NoOpVerifier {
    fn verify(&self, _envelope: &Envelope, _now_ms: i64) -> Result<(), EnvelopeError> {
        Ok(())
    }
}

/// Key material loaded for a [`KeyedVerifier`]; kept separate from the
/// verifier itself so callers can construct one from config or from a
/// `rotate_keys` event without re-deriving key bytes.
pub struct VerifyKeys {
    pub current: VerifyingKey,
    pub previous: Option<(VerifyingKey, i64)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use ed25519_dalek::{SigningKey, Signer};
    use rand::rngs::OsRng;

    fn sign(signing_key: &SigningKey, envelope: &mut Envelope) {
        let message = envelope.message_to_verify().unwrap();
        let sig = signing_key.sign(&message);
        envelope.signature = BASE64.encode(sig.to_bytes());
    }

    fn sample_envelope() -> Envelope {
        Envelope::new(
            "peer_added",
            "evt-1",
            1_000,
            "nonce-1",
            serde_json::value::RawValue::from_string("{\"id\":\"p1\"}".to_string()).unwrap(),
        )
    }

    #[test]
    fn roundtrip_verifies() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifier = KeyedVerifier::new(signing_key.verifying_key());
        let mut envelope = sample_envelope();
        sign(&signing_key, &mut envelope);
        verifier.verify(&envelope, 1_000).unwrap();
    }

    #[test]
    fn tampered_payload_fails() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifier = KeyedVerifier::new(signing_key.verifying_key());
        let mut envelope = sample_envelope();
        sign(&signing_key, &mut envelope);
        envelope.payload =
            serde_json::value::RawValue::from_string("{\"id\":\"p2\"}".to_string()).unwrap();
        let err = verifier.verify(&envelope, 1_000).unwrap_err();
        assert!(matches!(err, EnvelopeError::SignatureVerificationFailed));
    }

    #[test]
    fn duplicate_nonce_rejected() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifier = KeyedVerifier::new(signing_key.verifying_key());
        let mut envelope = sample_envelope();
        sign(&signing_key, &mut envelope);
        verifier.verify(&envelope, 1_000).unwrap();
        let err = verifier.verify(&envelope, 1_001).unwrap_err();
        assert!(matches!(err, EnvelopeError::DuplicateNonce { .. }));
    }

    #[test]
    fn failed_verification_does_not_consume_nonce() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let other_key = SigningKey::generate(&mut OsRng);
        let verifier = KeyedVerifier::new(signing_key.verifying_key());
        let mut envelope = sample_envelope();
        sign(&other_key, &mut envelope);
        assert!(verifier.verify(&envelope, 1_000).is_err());

        // Now sign properly with the same nonce: must still succeed.
        sign(&signing_key, &mut envelope);
        verifier.verify(&envelope, 1_001).unwrap();
    }

    #[test]
    fn stale_event_rejected_without_consuming_nonce() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifier = KeyedVerifier::new(signing_key.verifying_key());
        let mut envelope = sample_envelope();
        envelope.issued_at = 1;
        sign(&signing_key, &mut envelope);
        let err = verifier.verify(&envelope, 10 * 60_000).unwrap_err();
        assert!(matches!(err, EnvelopeError::StaleEvent { .. }));
    }

    #[test]
    fn future_dated_event_rejected() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifier = KeyedVerifier::new(signing_key.verifying_key());
        let mut envelope = sample_envelope();
        envelope.issued_at = 10 * 60_000;
        sign(&signing_key, &mut envelope);
        let err = verifier.verify(&envelope, 0).unwrap_err();
        assert!(matches!(err, EnvelopeError::FutureDated { .. }));
    }

    #[test]
    fn previous_key_accepted_before_deadline_only() {
        let old_key = SigningKey::generate(&mut OsRng);
        let new_key = SigningKey::generate(&mut OsRng);
        let verifier = KeyedVerifier::new(old_key.verifying_key());
        verifier.rotate(new_key.verifying_key(), 5_000);

        let mut envelope = sample_envelope();
        sign(&old_key, &mut envelope);
        verifier.verify(&envelope, 1_000).unwrap();

        let mut envelope2 = sample_envelope();
        envelope2.event_id = "evt-2".into();
        envelope2.nonce = "nonce-2".into();
        sign(&old_key, &mut envelope2);
        let err = verifier.verify(&envelope2, 6_000).unwrap_err();
        assert!(matches!(err, EnvelopeError::SignatureVerificationFailed));
    }
}
