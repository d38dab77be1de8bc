//! STUN-based NAT discovery and public endpoint reporting.

mod discoverer;
mod error;
mod stun;

pub use discoverer::{discover, run_refresh_loop, NatConfig, NatType, PeerEndpointUpdater};
pub use error::StunError;
pub use stun::{encode_binding_request, parse_binding_response, TransactionId};
