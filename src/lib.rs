//! Node-side control-plane client for the mesh agent.
//!
//! This crate is a library of components, not a single `Client` god-object:
//! callers wire the pieces together for their process. The shape is
//! roughly:
//!
//! 1. Load or generate the node's SSH host key ([`hostkey`]).
//! 2. Build an [`transport::HttpTransport`] from a [`wire::ClientConfig`]
//!    and register with the control plane ([`wire::register`]).
//! 3. Drive the SSE connection through [`reconnect::ReconnectEngine`],
//!    feeding bytes into an [`events::EventPipeline`] that verifies
//!    envelopes ([`envelope`]) and dispatches parsed payloads
//!    ([`events::Dispatcher`]) to handlers.
//! 4. Run [`reconcile::Reconciler`] on its own timer, applying peer diffs
//!    through a [`peer_table::PeerTableHandle`] implementation.
//! 5. Run [`nat::run_refresh_loop`] and [`metrics::run_collect_loop`]
//!    alongside, and let [`tunnel::TunnelManager`] react to
//!    `ssh_session_setup`/`session_revoked` events.
//!
//! Every long-running loop takes a `tokio_util::sync::CancellationToken`
//! and returns once cancelled; this crate does not install a signal
//! handler or a `tracing` subscriber itself — the embedding process owns
//! both.

pub mod envelope;
pub mod events;
pub mod hostkey;
pub mod metrics;
pub mod nat;
pub mod peer_table;
pub mod reconcile;
pub mod reconnect;
pub mod transport;
pub mod tunnel;
pub mod wire;

pub use wire::ClientConfig;
