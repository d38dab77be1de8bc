use std::collections::BTreeSet;

use serde::Serialize;

use super::state::DesiredState;

/// One observed difference between desired and local state, in the format
/// posted to the control plane's drift-report endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Correction {
    pub kind: String,
    pub detail: String,
}

impl Correction {
    fn new(kind: &str, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub corrections: Vec<Correction>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty()
    }
}

/// Computes the set of corrections needed to bring `local` in line with
/// `desired`. Symmetric: `compute(s, s)` is always empty.
pub fn compute(desired: &DesiredState, local: &DesiredState) -> Diff {
    let mut corrections = Vec::new();

    diff_peers(desired, local, &mut corrections);
    diff_policies(desired, local, &mut corrections);
    diff_signing_keys(desired, local, &mut corrections);
    diff_metadata(desired, local, &mut corrections);
    diff_data_entries(desired, local, &mut corrections);
    diff_secret_refs(desired, local, &mut corrections);

    Diff { corrections }
}

fn diff_peers(desired: &DesiredState, local: &DesiredState, out: &mut Vec<Correction>) {
    let local_by_id: std::collections::HashMap<_, _> =
        local.peers.iter().map(|p| (p.id.as_str(), p)).collect();
    let desired_by_id: std::collections::HashMap<_, _> =
        desired.peers.iter().map(|p| (p.id.as_str(), p)).collect();

    for peer in &desired.peers {
        match local_by_id.get(peer.id.as_str()) {
            None => out.push(Correction::new("peer_added", format!("peer {}", peer.id))),
            Some(existing) => {
                let mut sorted_desired = peer.allowed_ips.clone();
                sorted_desired.sort();
                let mut sorted_local = existing.allowed_ips.clone();
                sorted_local.sort();

                let changed = existing.public_key != peer.public_key
                    || existing.mesh_ip != peer.mesh_ip
                    || existing.endpoint != peer.endpoint
                    || existing.pre_shared_key != peer.pre_shared_key
                    || sorted_desired != sorted_local;

                if changed {
                    out.push(Correction::new("peer_updated", format!("peer {}", peer.id)));
                }
            }
        }
    }

    for peer in &local.peers {
        if !desired_by_id.contains_key(peer.id.as_str()) {
            out.push(Correction::new(
                "peer_removed",
                format!("peer {}", peer.id),
            ));
        }
    }
}

fn diff_policies(desired: &DesiredState, local: &DesiredState, out: &mut Vec<Correction>) {
    let desired_ids: BTreeSet<_> = desired.policies.iter().map(|p| p.id.as_str()).collect();
    let local_ids: BTreeSet<_> = local.policies.iter().map(|p| p.id.as_str()).collect();

    for id in desired_ids.difference(&local_ids) {
        out.push(Correction::new("policy_added", format!("policy {id}")));
    }
    for id in local_ids.difference(&desired_ids) {
        out.push(Correction::new("policy_removed", format!("policy {id}")));
    }
}

fn diff_signing_keys(desired: &DesiredState, local: &DesiredState, out: &mut Vec<Correction>) {
    if desired.signing_keys != local.signing_keys {
        out.push(Correction::new("signing_keys_changed", "signing keys updated"));
    }
}

fn diff_metadata(desired: &DesiredState, local: &DesiredState, out: &mut Vec<Correction>) {
    if desired.metadata != local.metadata {
        out.push(Correction::new("metadata_updated", "metadata updated"));
    }
}

fn diff_data_entries(desired: &DesiredState, local: &DesiredState, out: &mut Vec<Correction>) {
    let local_by_key: std::collections::HashMap<_, _> =
        local.data_entries.iter().map(|e| (e.key.as_str(), e.version)).collect();

    for entry in &desired.data_entries {
        match local_by_key.get(entry.key.as_str()) {
            None => out.push(Correction::new("data_entry_added", format!("key {}", entry.key))),
            Some(version) if *version != entry.version => out.push(Correction::new(
                "data_entry_updated",
                format!("key {}", entry.key),
            )),
            _ => {}
        }
    }
    let desired_keys: BTreeSet<_> = desired.data_entries.iter().map(|e| e.key.as_str()).collect();
    for entry in &local.data_entries {
        if !desired_keys.contains(entry.key.as_str()) {
            out.push(Correction::new(
                "data_entry_removed",
                format!("key {}", entry.key),
            ));
        }
    }
}

fn diff_secret_refs(desired: &DesiredState, local: &DesiredState, out: &mut Vec<Correction>) {
    let local_by_key: std::collections::HashMap<_, _> =
        local.secret_refs.iter().map(|e| (e.key.as_str(), e.version)).collect();

    for entry in &desired.secret_refs {
        match local_by_key.get(entry.key.as_str()) {
            None => out.push(Correction::new("secret_ref_added", format!("key {}", entry.key))),
            Some(version) if *version != entry.version => out.push(Correction::new(
                "secret_ref_updated",
                format!("key {}", entry.key),
            )),
            _ => {}
        }
    }
    let desired_keys: BTreeSet<_> = desired.secret_refs.iter().map(|e| e.key.as_str()).collect();
    for entry in &local.secret_refs {
        if !desired_keys.contains(entry.key.as_str()) {
            out.push(Correction::new(
                "secret_ref_removed",
                format!("key {}", entry.key),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::state::Peer;

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
    fn diff_is_symmetric() {
        let mut state = DesiredState::default();
        state.peers.push(peer("p1"));
        let diff = compute(&state, &state);
        assert!(diff.is_empty());
    }

    #[test]
    fn detects_added_and_removed_peers() {
        let mut desired = DesiredState::default();
        desired.peers.push(peer("p1"));
        let mut local = DesiredState::default();
        local.peers.push(peer("p2"));

        let diff = compute(&desired, &local);
        assert!(diff.corrections.iter().any(|c| c.kind == "peer_added"));
        assert!(diff.corrections.iter().any(|c| c.kind == "peer_removed"));
    }

    #[test]
    fn allowed_ips_order_does_not_trigger_update() {
        let mut p1 = peer("p1");
        p1.allowed_ips = vec!["a".to_string(), "b".to_string()];
        let mut p2 = peer("p1");
        p2.allowed_ips = vec!["b".to_string(), "a".to_string()];

        let mut desired = DesiredState::default();
        desired.peers.push(p1);
        let mut local = DesiredState::default();
        local.peers.push(p2);

        let diff = compute(&desired, &local);
        assert!(diff.is_empty());
    }

    #[test]
    fn metadata_changes_are_detected() {
        let mut desired = DesiredState::default();
        desired.metadata.insert("region".to_string(), "us".to_string());
        let local = DesiredState::default();

        let diff = compute(&desired, &local);
        assert!(diff.corrections.iter().any(|c| c.kind == "metadata_updated"));
    }
}
