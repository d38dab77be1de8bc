use std::collections::HashMap;
use std::sync::Mutex;

use super::error::EnvelopeError;

const CLEANUP_INTERVAL_MS: i64 = 60_000;

struct Inner {
    seen: HashMap<String, i64>,
    last_cleanup_ms: i64,
}

/// Tracks nonces seen within their TTL, with opportunistic eviction.
///
/// A nonce is recorded only by [`NonceStore::record`], which callers must
/// invoke *after* a signature has been verified — recording on an unverified
/// envelope would let a forged envelope burn a legitimate nonce.
pub struct NonceStore {
    inner: Mutex<Inner>,
    ttl_ms: i64,
}

impl NonceStore {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                seen: HashMap::new(),
                last_cleanup_ms: 0,
            }),
            ttl_ms,
        }
    }

    /// Records `nonce` at `now_ms`, or returns `DuplicateNonce` if it was
    /// already seen within the TTL window.
    pub fn record(&self, nonce: &str, now_ms: i64) -> Result<(), EnvelopeError> {
        let mut inner = self.inner.lock().expect("nonce store mutex poisoned");

        if now_ms - inner.last_cleanup_ms >= CLEANUP_INTERVAL_MS {
            let ttl_ms = self.ttl_ms;
            inner.seen.retain(|_, issued_at| now_ms - *issued_at < ttl_ms);
            inner.last_cleanup_ms = now_ms;
        }

        if let Some(issued_at) = inner.seen.get(nonce) {
            if now_ms - *issued_at < self.ttl_ms {
                return Err(EnvelopeError::DuplicateNonce {
                    nonce: nonce.to_string(),
                });
            }
        }

        inner.seen.insert(nonce.to_string(), now_ms);
        Ok(())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("nonce store mutex poisoned").seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_use_succeeds_second_fails() {
        let store = NonceStore::new(5 * 60_000);
        store.record("n1", 1_000).unwrap();
        let err = store.record("n1", 1_500).unwrap_err();
        assert!(matches!(err, EnvelopeError::DuplicateNonce { .. }));
    }

    #[test]
    fn nonce_expires_after_ttl() {
        let store = NonceStore::new(1_000);
        store.record("n1", 0).unwrap();
        // still within TTL
        assert!(store.record("n1", 500).is_err());
        // past TTL: a fresh record succeeds even without cleanup having run
        store.record("n1", 2_000).unwrap();
    }

    #[test]
    fn cleanup_evicts_old_entries() {
        let store = NonceStore::new(1_000);
        store.record("n1", 0).unwrap();
        // forces a cleanup pass far beyond CLEANUP_INTERVAL_MS
        store.record("n2", 120_000).unwrap();
        assert_eq!(store.len(), 1);
    }
}
