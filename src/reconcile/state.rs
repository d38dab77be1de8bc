use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub id: String,
    pub public_key: String,
    pub mesh_ip: String,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    pub pre_shared_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Policy {
    pub id: String,
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SigningKeys {
    pub current: String,
    pub previous: Option<String>,
    pub transition_deadline_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataEntry {
    pub key: String,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretRef {
    pub key: String,
    pub version: u64,
}

/// The control plane's desired state for this node, as returned by
/// `GET /v1/nodes/{id}/state`. Every access to the locally-held snapshot
/// hands out a deep copy of this type, so callers can never mutate stored
/// state through a shared reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DesiredState {
    pub peers: Vec<Peer>,
    pub policies: Vec<Policy>,
    pub signing_keys: Option<SigningKeys>,
    pub metadata: BTreeMap<String, String>,
    pub data_entries: Vec<DataEntry>,
    pub secret_refs: Vec<SecretRef>,
}
