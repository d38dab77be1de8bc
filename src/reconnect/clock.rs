use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Time capability the reconnect engine sleeps and reads the clock through,
/// so tests can drive it without waiting on real timers.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
    fn sleep<'a>(&'a self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// The real wall clock, backed by `tokio::time::sleep`. Under
/// `tokio::time::pause()` in tests, this clock's sleeps resolve instantly
/// when the test advances virtual time — no separate fake implementation is
/// needed.
///
/// `now_ms` is anchored to a `tokio::time::Instant` taken at construction
/// rather than read fresh from `chrono` on every call: `tokio::time::Instant`
/// advances with virtual time under `tokio::time::pause()`/`advance()`, while
/// `chrono::Utc::now()` does not. Reading the two from different time
/// sources would let the engine's failure-streak elapsed-time check
/// (measured via `now_ms`) drift out of sync with its waits (measured via
/// `sleep`), which is exactly the divergence a paused-time test is meant to
/// avoid.
pub struct SystemClock {
    epoch_wall_ms: i64,
    epoch_instant: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch_wall_ms: chrono::Utc::now().timestamp_millis(),
            epoch_instant: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        self.epoch_wall_ms + self.epoch_instant.elapsed().as_millis() as i64
    }

    fn sleep<'a>(&'a self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(tokio::time::sleep(duration))
    }
}
