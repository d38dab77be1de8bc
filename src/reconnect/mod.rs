//! Exponential-backoff reconnect state machine with a polling fallback,
//! driving the event pipeline's long-lived SSE connection.

mod clock;
mod error;

pub use clock::{Clock, SystemClock};
pub use error::{classify, ErrorClass, ReconnectError};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::transport::TransportError;

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub jitter_fraction: f64,
    pub polling_fallback_after: Duration,
    pub poll_interval: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_fraction: 0.25,
            polling_fallback_after: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Returns a duration uniformly distributed in
/// `[interval*(1-fraction), interval*(1+fraction)]`.
fn jitter(interval: Duration, fraction: f64) -> Duration {
    let base = interval.as_secs_f64();
    let spread = base * fraction;
    let delta = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_secs_f64((base + delta).max(0.0))
}

fn next_interval(current: Duration, config: &ReconnectConfig) -> Duration {
    let scaled = current.as_secs_f64() * config.multiplier;
    Duration::from_secs_f64(scaled).min(config.max_interval)
}

/// Drives the Connecting/Backoff/Polling state machine described in the
/// design: calls `connect` in a loop, backs off with jitter on transient
/// failure, and falls back to `poll` once a failure streak exceeds
/// `polling_fallback_after`.
pub struct ReconnectEngine<C: Clock> {
    config: ReconnectConfig,
    clock: Arc<C>,
}

impl<C: Clock> ReconnectEngine<C> {
    pub fn new(config: ReconnectConfig, clock: Arc<C>) -> Self {
        Self { config, clock }
    }

    async fn sleep_or_cancel(
        &self,
        cancel: &CancellationToken,
        duration: Duration,
    ) -> Result<(), ReconnectError> {
        tokio::select! {
            _ = self.clock.sleep(duration) => Ok(()),
            _ = cancel.cancelled() => Err(ReconnectError::Cancelled),
        }
    }

    /// Runs until cancellation, a permanent failure, or an auth rejection.
    /// `on_auth_rejected` is invoked once before returning `AuthRejected`.
    pub async fn run<ConnectFn, ConnectFut, PollFn, PollFut>(
        &self,
        cancel: CancellationToken,
        mut connect: ConnectFn,
        mut poll: PollFn,
        on_auth_rejected: impl Fn(),
    ) -> Result<(), ReconnectError>
    where
        ConnectFn: FnMut() -> ConnectFut,
        ConnectFut: Future<Output = Result<(), TransportError>>,
        PollFn: FnMut() -> PollFut,
        PollFut: Future<Output = Result<(), TransportError>>,
    {
        let mut interval = self.config.base_interval;
        let mut failing_since_ms: Option<i64> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(ReconnectError::Cancelled);
            }

            let result = tokio::select! {
                r = connect() => r,
                _ = cancel.cancelled() => return Err(ReconnectError::Cancelled),
            };

            match result {
                Ok(()) => {
                    interval = self.config.base_interval;
                    failing_since_ms = None;
                    continue;
                }
                Err(err) => match classify(&err) {
                    ErrorClass::PermanentFailure => {
                        tracing::error!(error = %err, "permanent failure, stopping reconnect loop");
                        return Err(ReconnectError::Permanent(err));
                    }
                    ErrorClass::RetryAuth => {
                        tracing::warn!(error = %err, "authentication rejected, stopping reconnect loop");
                        on_auth_rejected();
                        return Err(ReconnectError::AuthRejected(err));
                    }
                    ErrorClass::RespectServer(wait) => {
                        tracing::warn!(?wait, "server requested backoff");
                        self.sleep_or_cancel(&cancel, wait).await?;
                    }
                    ErrorClass::RetryTransient => {
                        let now_ms = self.clock.now_ms();
                        let since_ms = *failing_since_ms.get_or_insert(now_ms);
                        let elapsed = Duration::from_millis((now_ms - since_ms).max(0) as u64);

                        if elapsed >= self.config.polling_fallback_after {
                            tracing::info!("entering polling fallback");
                            match self.run_polling(&cancel, &mut connect, &mut poll).await? {
                                PollingOutcome::Reconnected => {
                                    interval = self.config.base_interval;
                                    failing_since_ms = None;
                                }
                                PollingOutcome::AuthRejected(err) => {
                                    on_auth_rejected();
                                    return Err(ReconnectError::AuthRejected(err));
                                }
                                PollingOutcome::Permanent(err) => {
                                    return Err(ReconnectError::Permanent(err));
                                }
                            }
                        } else {
                            let wait = jitter(interval, self.config.jitter_fraction);
                            self.sleep_or_cancel(&cancel, wait).await?;
                            interval = next_interval(interval, &self.config);
                        }
                    }
                },
            }
        }
    }

    async fn run_polling<ConnectFn, ConnectFut, PollFn, PollFut>(
        &self,
        cancel: &CancellationToken,
        connect: &mut ConnectFn,
        poll: &mut PollFn,
    ) -> Result<PollingOutcome, ReconnectError>
    where
        ConnectFn: FnMut() -> ConnectFut,
        ConnectFut: Future<Output = Result<(), TransportError>>,
        PollFn: FnMut() -> PollFut,
        PollFut: Future<Output = Result<(), TransportError>>,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(ReconnectError::Cancelled);
            }

            if let Err(err) = poll().await {
                tracing::warn!(error = %err, "polling fallback iteration failed");
            }

            self.sleep_or_cancel(cancel, self.config.poll_interval).await?;

            match connect().await {
                Ok(()) => return Ok(PollingOutcome::Reconnected),
                Err(err) => match classify(&err) {
                    ErrorClass::PermanentFailure => return Ok(PollingOutcome::Permanent(err)),
                    ErrorClass::RetryAuth => return Ok(PollingOutcome::AuthRejected(err)),
                    ErrorClass::RespectServer(wait) => {
                        self.sleep_or_cancel(cancel, wait).await?;
                    }
                    ErrorClass::RetryTransient => continue,
                },
            }
        }
    }
}

enum PollingOutcome {
    Reconnected,
    AuthRejected(TransportError),
    Permanent(TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ApiError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_failures_eventually_trigger_polling() {
        let config = ReconnectConfig {
            base_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(10),
            multiplier: 2.0,
            jitter_fraction: 0.0,
            polling_fallback_after: Duration::from_millis(20),
            poll_interval: Duration::from_millis(5),
        };
        let engine = ReconnectEngine::new(config, Arc::new(SystemClock::new()));
        let cancel = CancellationToken::new();
        let connect_calls = Arc::new(AtomicUsize::new(0));
        let poll_calls = Arc::new(AtomicUsize::new(0));

        let connect_calls2 = connect_calls.clone();
        let poll_calls2 = poll_calls.clone();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            engine
                .run(
                    cancel2,
                    || {
                        connect_calls2.fetch_add(1, Ordering::SeqCst);
                        async { Err(TransportError::Api(ApiError::Server { status: 500, message: "x".into() })) }
                    },
                    || {
                        poll_calls2.fetch_add(1, Ordering::SeqCst);
                        async { Ok(()) }
                    },
                    || {},
                )
                .await
        });

        tokio::time::advance(Duration::from_millis(250)).await;
        cancel.cancel();
        let _ = handle.await;

        assert!(poll_calls.load(Ordering::SeqCst) >= 1);
        assert!(connect_calls.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_invokes_callback_and_stops() {
        let engine = ReconnectEngine::new(ReconnectConfig::default(), Arc::new(SystemClock::new()));
        let cancel = CancellationToken::new();
        let auth_called = Arc::new(AtomicUsize::new(0));
        let auth_called2 = auth_called.clone();

        let result = engine
            .run(
                cancel,
                || async {
                    Err(TransportError::Api(ApiError::Unauthorized {
                        status: 401,
                        message: "no".into(),
                    }))
                },
                || async { Ok(()) },
                || {
                    auth_called2.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert!(matches!(result, Err(ReconnectError::AuthRejected(_))));
        assert_eq!(auth_called.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_permanent() {
        let engine = ReconnectEngine::new(ReconnectConfig::default(), Arc::new(SystemClock::new()));
        let cancel = CancellationToken::new();

        let result = engine
            .run(
                cancel,
                || async {
                    Err(TransportError::Api(ApiError::NotFound {
                        status: 404,
                        message: "gone".into(),
                    }))
                },
                || async { Ok(()) },
                || {},
            )
            .await;

        assert!(matches!(result, Err(ReconnectError::Permanent(_))));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let interval = Duration::from_secs(10);
        for _ in 0..100 {
            let j = jitter(interval, 0.25);
            assert!(j.as_secs_f64() >= 7.5 && j.as_secs_f64() <= 12.5);
        }
    }

    #[test]
    fn next_interval_caps_at_max() {
        let config = ReconnectConfig {
            max_interval: Duration::from_secs(5),
            multiplier: 10.0,
            ..ReconnectConfig::default()
        };
        let next = next_interval(Duration::from_secs(1), &config);
        assert_eq!(next, Duration::from_secs(5));
    }
}
