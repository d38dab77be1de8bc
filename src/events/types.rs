//! The closed set of event payloads the control plane may deliver.
//!
//! Mirrors the tagged-enum pattern used for on-chain event parsing elsewhere
//! in this codebase: one macro arm per event type, generating a `parse`
//! dispatcher keyed by the envelope's `event_type` string.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

macro_rules! event_payloads {
    ($($tag:literal => $variant:ident($payload:ty)),+ $(,)?) => {
        /// A parsed, strongly-typed event payload. `Unknown` preserves the
        /// raw bytes for event types this build does not recognize, so a
        /// newer control plane can add event types without breaking old
        /// nodes outright.
        #[derive(Debug, Clone)]
        pub enum EventPayload {
            $($variant($payload),)+
            Unknown(Box<RawValue>),
        }

        impl EventPayload {
            pub fn parse(event_type: &str, payload: &RawValue) -> Result<Self, serde_json::Error> {
                match event_type {
                    $($tag => Ok(EventPayload::$variant(serde_json::from_str(payload.get())?)),)+
                    _ => Ok(EventPayload::Unknown(
                        RawValue::from_string(payload.get().to_string())
                            .expect("RawValue round-trip is infallible"),
                    )),
                }
            }

            pub fn type_tag(&self) -> &'static str {
                match self {
                    $(EventPayload::$variant(_) => $tag,)+
                    EventPayload::Unknown(_) => "unknown",
                }
            }
        }
    };
}

event_payloads! {
    "peer_added" => PeerAdded(PeerAddedPayload),
    "peer_removed" => PeerRemoved(PeerRemovedPayload),
    "peer_key_rotated" => PeerKeyRotated(PeerKeyRotatedPayload),
    "peer_endpoint_changed" => PeerEndpointChanged(PeerEndpointChangedPayload),
    "policy_updated" => PolicyUpdated(PolicyUpdatedPayload),
    "action_request" => ActionRequest(ActionRequestPayload),
    "session_revoked" => SessionRevoked(SessionRevokedPayload),
    "ssh_session_setup" => SshSessionSetup(SshSessionSetupPayload),
    "rotate_keys" => RotateKeys(RotateKeysPayload),
    "signing_key_rotated" => SigningKeyRotated(SigningKeyRotatedPayload),
    "node_state_updated" => NodeStateUpdated(NodeStateUpdatedPayload),
    "node_secrets_updated" => NodeSecretsUpdated(NodeSecretsUpdatedPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerAddedPayload {
    pub peer_id: String,
    pub public_key: String,
    pub mesh_ip: String,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    pub pre_shared_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRemovedPayload {
    pub peer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerKeyRotatedPayload {
    pub peer_id: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEndpointChangedPayload {
    pub peer_id: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyUpdatedPayload {
    pub policy_id: String,
    pub rules: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequestPayload {
    pub execution_id: String,
    pub action: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRevokedPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSessionSetupPayload {
    pub session_id: String,
    pub target_host: String,
    pub target_port: u16,
    pub mesh_ip: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateKeysPayload {
    pub new_current_key: String,
    pub previous_transition_deadline: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKeyRotatedPayload {
    pub current_key: String,
    pub previous_key: Option<String>,
    pub transition_deadline: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStateUpdatedPayload {
    pub metadata: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSecretsUpdatedPayload {
    pub secret_keys: Vec<String>,
}
