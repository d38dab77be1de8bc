use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::events::types::{SshSessionSetupPayload, SessionRevokedPayload};
use crate::transport::HttpTransport;

use super::error::TunnelError;

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub enabled: bool,
    pub max_sessions: usize,
    pub default_timeout: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_sessions: 10,
            default_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// A short-lived access tunnel opened at the control plane's request.
///
/// Mirrors the `TunnelSession` record in the design: identity and timing
/// fields are immutable after creation, while `closed` and
/// `has_active_connection` are the mutable runtime state every accepted
/// connection and the expiry timer race against.
struct ActiveSession {
    session_id: String,
    start_time_ms: i64,
    bound_addr: std::net::SocketAddr,
    closed: AtomicBool,
    has_active_connection: AtomicBool,
    cancel: CancellationToken,
}

#[derive(Clone, Copy)]
enum CloseReason {
    Expired,
    Revoked,
    Shutdown,
}

impl CloseReason {
    fn as_str(self) -> &'static str {
        match self {
            CloseReason::Expired => "expired",
            CloseReason::Revoked => "revoked",
            CloseReason::Shutdown => "shutdown",
        }
    }

    /// Only expiry and revocation produce a `tunnel_closed` report; a
    /// `Shutdown` is inferred by the control plane from heartbeat loss.
    fn is_reported(self) -> bool {
        !matches!(self, CloseReason::Shutdown)
    }
}

struct Inner {
    transport: Arc<HttpTransport>,
    node_id: String,
    config: TunnelConfig,
    sessions: RwLock<HashMap<String, Arc<ActiveSession>>>,
    cancel: CancellationToken,
}

#[derive(Serialize)]
struct TunnelReadyReport<'a> {
    bound_address: &'a str,
}

#[derive(Serialize)]
struct TunnelClosedReport<'a> {
    reason: &'a str,
    duration_ms: i64,
}

/// Opens and tears down short-lived TCP forwarding sessions on behalf of
/// `ssh_session_setup` / `session_revoked` events.
///
/// Cloning a `TunnelManager` clones a handle to the same session table;
/// every accepted connection and background timer holds its own clone so
/// the manager can be dropped by its owner without interrupting in-flight
/// sessions (they still observe the shared cancellation token on
/// [`TunnelManager::shutdown`]).
#[derive(Clone)]
pub struct TunnelManager {
    inner: Arc<Inner>,
}

impl TunnelManager {
    pub fn new(transport: Arc<HttpTransport>, node_id: impl Into<String>, config: TunnelConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                node_id: node_id.into(),
                config,
                sessions: RwLock::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn active_session_count(&self) -> usize {
        self.inner.sessions.read().expect("session table lock poisoned").len()
    }

    #[cfg(test)]
    fn bound_address(&self, session_id: &str) -> Option<std::net::SocketAddr> {
        self.inner
            .sessions
            .read()
            .expect("session table lock poisoned")
            .get(session_id)
            .map(|s| s.bound_addr)
    }

    /// Validates and opens a new tunnel session, binding a listener on
    /// `payload.mesh_ip` and reporting the bound address via `tunnel_ready`.
    pub async fn handle_session_setup(
        &self,
        payload: &SshSessionSetupPayload,
        now_ms: i64,
    ) -> Result<(), TunnelError> {
        if payload.session_id.is_empty() {
            return Err(TunnelError::EmptySessionId);
        }
        if payload.target_host.is_empty() {
            return Err(TunnelError::EmptyTargetHost);
        }
        if payload.target_port == 0 {
            return Err(TunnelError::InvalidTargetPort { port: payload.target_port });
        }
        if payload.expires_at <= now_ms {
            return Err(TunnelError::ExpiryInPast {
                expires_at_ms: payload.expires_at,
                now_ms,
            });
        }

        {
            let sessions = self.inner.sessions.read().expect("session table lock poisoned");
            if sessions.contains_key(&payload.session_id) {
                return Err(TunnelError::DuplicateSession {
                    session_id: payload.session_id.clone(),
                });
            }
            if sessions.len() >= self.inner.config.max_sessions {
                return Err(TunnelError::MaxSessionsReached {
                    max: self.inner.config.max_sessions,
                });
            }
        }

        let effective_expiry_ms =
            payload.expires_at.min(now_ms + self.inner.config.default_timeout.as_millis() as i64);

        let mesh_ip: IpAddr = payload
            .mesh_ip
            .parse()
            .map_err(|_| TunnelError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid mesh_ip")))?;
        let listener = TcpListener::bind((mesh_ip, 0)).await.map_err(TunnelError::Bind)?;
        let bound_addr = listener.local_addr().map_err(TunnelError::Bind)?;

        let session = Arc::new(ActiveSession {
            session_id: payload.session_id.clone(),
            start_time_ms: now_ms,
            bound_addr,
            closed: AtomicBool::new(false),
            has_active_connection: AtomicBool::new(false),
            cancel: self.inner.cancel.child_token(),
        });

        self.inner
            .sessions
            .write()
            .expect("session table lock poisoned")
            .insert(payload.session_id.clone(), session.clone());

        let target = format!("{}:{}", payload.target_host, payload.target_port);
        let inner = self.inner.clone();
        let expiry_delay = Duration::from_millis((effective_expiry_ms - now_ms).max(0) as u64);

        tokio::spawn(run_accept_loop(inner.clone(), session.clone(), listener, target));
        tokio::spawn(run_expiry_timer(inner, session, expiry_delay));

        let path = format!("v1/nodes/{}/tunnels/{}/ready", self.inner.node_id, payload.session_id);
        let body = TunnelReadyReport {
            bound_address: &bound_addr.to_string(),
        };
        if let Err(err) = self.inner.transport.post::<_, serde_json::Value>(&path, &body).await {
            tracing::warn!(session_id = %payload.session_id, error = %err, "failed to report tunnel_ready");
        }

        Ok(())
    }

    pub async fn handle_session_revoked(&self, payload: &SessionRevokedPayload) {
        close_session(&self.inner, &payload.session_id, CloseReason::Revoked).await;
    }

    /// Closes every active session with reason `"shutdown"`; no per-session
    /// report is posted, matching the design (the control plane infers
    /// shutdown from heartbeat loss).
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let ids: Vec<String> = self
            .inner
            .sessions
            .read()
            .expect("session table lock poisoned")
            .keys()
            .cloned()
            .collect();
        for id in ids {
            close_session(&self.inner, &id, CloseReason::Shutdown).await;
        }
    }
}

async fn close_session(inner: &Arc<Inner>, session_id: &str, reason: CloseReason) {
    let session = {
        let mut sessions = inner.sessions.write().expect("session table lock poisoned");
        sessions.remove(session_id)
    };
    let Some(session) = session else {
        return;
    };
    if session.closed.swap(true, Ordering::SeqCst) {
        return;
    }
    session.cancel.cancel();

    if reason.is_reported() {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let duration_ms = (now_ms - session.start_time_ms).max(0);
        let path = format!("v1/nodes/{}/tunnels/{}/closed", inner.node_id, session_id);
        let body = TunnelClosedReport {
            reason: reason.as_str(),
            duration_ms,
        };
        if let Err(err) = inner.transport.post::<_, serde_json::Value>(&path, &body).await {
            tracing::warn!(session_id, error = %err, "failed to report tunnel_closed");
        }
    }
}

async fn run_accept_loop(inner: Arc<Inner>, session: Arc<ActiveSession>, listener: TcpListener, target: String) {
    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => return,
            accepted = listener.accept() => {
                let Ok((conn, _peer)) = accepted else { return };
                if session.has_active_connection.swap(true, Ordering::SeqCst) {
                    // Only one active forwarded connection per session; the
                    // new one is rejected by dropping it immediately.
                    drop(conn);
                    continue;
                }
                tokio::spawn(run_forwarding(
                    inner.clone(),
                    session.clone(),
                    conn,
                    target.clone(),
                ));
            }
        }
    }
}

async fn run_forwarding(_inner: Arc<Inner>, session: Arc<ActiveSession>, mut inbound: TcpStream, target: String) {
    let outbound = tokio::select! {
        r = TcpStream::connect(&target) => r,
        _ = session.cancel.cancelled() => {
            session.has_active_connection.store(false, Ordering::SeqCst);
            return;
        }
    };

    let mut outbound = match outbound {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(session_id = %session.session_id, error = %err, "failed to dial tunnel target");
            session.has_active_connection.store(false, Ordering::SeqCst);
            return;
        }
    };

    tokio::select! {
        result = tokio::io::copy_bidirectional(&mut inbound, &mut outbound) => {
            if let Err(err) = result {
                tracing::debug!(session_id = %session.session_id, error = %err, "tunnel connection closed");
            }
        }
        _ = session.cancel.cancelled() => {}
    }

    session.has_active_connection.store(false, Ordering::SeqCst);
}

async fn run_expiry_timer(inner: Arc<Inner>, session: Arc<ActiveSession>, delay: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {
            close_session(&inner, &session.session_id, CloseReason::Expired).await;
        }
        _ = session.cancel.cancelled() => {}
    }
}
