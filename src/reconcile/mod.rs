//! Desired-state reconciliation: periodic fetch, diff against the local
//! snapshot, handler invocation, drift reporting, and conditional commit.

pub mod diff;
pub mod error;
pub mod reconciler;
pub mod snapshot;
pub mod state;

pub use diff::{Correction, Diff};
pub use error::ReconcileError;
pub use reconciler::{ReconcileHandler, Reconciler};
pub use snapshot::Snapshot;
pub use state::{DataEntry, DesiredState, Peer, Policy, SecretRef, SigningKeys};
