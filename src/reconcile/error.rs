use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to fetch desired state: {0}")]
    Fetch(#[source] TransportError),

    #[error("failed to post drift report: {0}")]
    DriftReport(#[source] TransportError),
}
