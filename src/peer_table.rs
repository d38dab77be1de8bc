//! The capability seam between this crate and the node's WireGuard peer
//! controller, which is out of scope here. Both the reconciler's
//! peer-diff handler and the NAT layer's endpoint reporting call through an
//! interface like [`PeerTableHandle`] rather than holding a reference into
//! the controller itself.

use std::collections::HashMap;
use std::sync::Arc;

use crate::reconcile::{Correction, DesiredState, Diff, Peer, ReconcileHandler};

/// Narrow capability interface into the local peer table. Implemented by
/// the embedding process, not by this crate.
pub trait PeerTableHandle: Send + Sync {
    /// Add or update a peer's static configuration (public key, mesh IP,
    /// allowed IPs, pre-shared key).
    fn update_peer(&self, peer: &Peer);

    /// Remove a peer no longer present in desired state.
    fn remove_peer(&self, peer_id: &str);

    /// Apply a batch of `(peer_id, endpoint)` updates discovered by NAT
    /// traversal, without touching any other peer field.
    fn apply_endpoint_updates(&self, updates: &[(String, String)]);
}

/// A [`ReconcileHandler`] that projects `peer_added`/`peer_updated`/
/// `peer_removed` corrections onto a [`PeerTableHandle`]. Other correction
/// kinds (policies, signing keys, data entries, ...) are the concern of
/// other handlers registered alongside this one.
pub struct PeerReconcileHandler {
    peer_table: Arc<dyn PeerTableHandle>,
}

impl PeerReconcileHandler {
    pub fn new(peer_table: Arc<dyn PeerTableHandle>) -> Self {
        Self { peer_table }
    }

    fn peer_id_from_detail(correction: &Correction) -> Option<&str> {
        correction.detail.strip_prefix("peer ")
    }
}

impl ReconcileHandler for PeerReconcileHandler {
    fn handle(&self, desired: &DesiredState, diff: &Diff) -> anyhow::Result<()> {
        let by_id: HashMap<&str, &Peer> = desired.peers.iter().map(|p| (p.id.as_str(), p)).collect();

        for correction in &diff.corrections {
            match correction.kind.as_str() {
                "peer_added" | "peer_updated" => {
                    if let Some(id) = Self::peer_id_from_detail(correction) {
                        if let Some(peer) = by_id.get(id) {
                            self.peer_table.update_peer(peer);
                        }
                    }
                }
                "peer_removed" => {
                    if let Some(id) = Self::peer_id_from_detail(correction) {
                        self.peer_table.remove_peer(id);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPeerTable {
        updated: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
    }

    impl PeerTableHandle for RecordingPeerTable {
        fn update_peer(&self, peer: &Peer) {
            self.updated.lock().unwrap().push(peer.id.clone());
        }

        fn remove_peer(&self, peer_id: &str) {
            self.removed.lock().unwrap().push(peer_id.to_string());
        }

        fn apply_endpoint_updates(&self, _updates: &[(String, String)]) {}
    }

    fn peer(id: &str) -> Peer {
        Peer {
            id: id.to_string(),
            public_key: "pk".to_string(),
            mesh_ip: "10.0.0.1".to_string(),
            endpoint: None,
            allowed_ips: vec!["10.0.0.0/24".to_string()],
            pre_shared_key: None,
        }
    }

    #[test]
    fn applies_added_updated_and_removed_corrections() {
        let table = Arc::new(RecordingPeerTable::default());
        let handler = PeerReconcileHandler::new(table.clone());

        let mut desired = DesiredState::default();
        desired.peers.push(peer("p1"));
        desired.peers.push(peer("p2"));

        let diff = Diff {
            corrections: vec![
                Correction {
                    kind: "peer_added".to_string(),
                    detail: "peer p1".to_string(),
                },
                Correction {
                    kind: "peer_updated".to_string(),
                    detail: "peer p2".to_string(),
                },
                Correction {
                    kind: "peer_removed".to_string(),
                    detail: "peer p3".to_string(),
                },
            ],
        };

        handler.handle(&desired, &diff).unwrap();

        assert_eq!(*table.updated.lock().unwrap(), vec!["p1", "p2"]);
        assert_eq!(*table.removed.lock().unwrap(), vec!["p3"]);
    }
}
