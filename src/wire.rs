//! Thin typed request/response shapes for the HTTP surface that the
//! distilled spec lists but does not otherwise describe: bootstrap,
//! heartbeat, capabilities advertisement, key rotation, secret fetch, and
//! the action execution lifecycle. None of these carry business logic of
//! their own — they exist so [`crate::transport::HttpTransport`] has
//! concrete types to serialize.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::nat::NatConfig;
use crate::reconnect::ReconnectConfig;
use crate::transport::{HttpTransport, TransportConfig, TransportError};
use crate::tunnel::TunnelConfig;

/// Aggregates every per-component config into the single value a node
/// process needs to construct the whole client. Loading these values from
/// files/env/CLI flags is out of scope; this crate only defines the shape.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub node_id: String,
    pub data_dir: std::path::PathBuf,
    pub transport: TransportConfig,
    pub sse_idle_timeout: Duration,
    pub reconnect: ReconnectConfig,
    pub reconciler_interval: Duration,
    pub nat: NatConfig,
    pub tunnel: TunnelConfig,
    pub metrics: crate::metrics::MetricsConfig,
}

impl ClientConfig {
    pub fn new(node_id: impl Into<String>, base_url: impl Into<String>, data_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            node_id: node_id.into(),
            data_dir: data_dir.into(),
            transport: TransportConfig {
                base_url: base_url.into(),
                ..TransportConfig::default()
            },
            sse_idle_timeout: Duration::from_secs(90),
            reconnect: ReconnectConfig::default(),
            reconciler_interval: Duration::from_secs(5 * 60),
            nat: NatConfig::default(),
            tunnel: TunnelConfig::default(),
            metrics: crate::metrics::MetricsConfig::default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest {
    pub node_id: String,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterResponse {
    pub auth_token: String,
    pub signing_key: String,
    #[serde(default)]
    pub mesh_ip: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeregisterRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Healthy,
    Degraded,
    ShuttingDown,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatReport {
    pub status: NodeStatus,
    pub uptime_secs: u64,
    pub active_tunnel_count: u32,
}

#[derive(Debug, Default, Serialize)]
pub struct CapabilitiesReport {
    pub actions: Vec<String>,
    pub hooks: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RotateKeysRequest {
    pub new_public_key: String,
}

#[derive(Debug, Deserialize)]
pub struct RotateKeysResponse {
    pub accepted: bool,
    #[serde(default)]
    pub previous_transition_deadline: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SecretResponse {
    pub key: String,
    pub version: u64,
    /// Base64-encoded secret material, per the opaque-blob convention.
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct ActionAck {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PingResponse {
    #[serde(default)]
    pub ok: bool,
}

pub async fn register(transport: &HttpTransport, request: &RegisterRequest) -> Result<RegisterResponse, TransportError> {
    transport.post("v1/register", request).await
}

pub async fn deregister(transport: &HttpTransport, node_id: &str, request: &DeregisterRequest) -> Result<(), TransportError> {
    let path = format!("v1/nodes/{node_id}/deregister");
    let _: serde_json::Value = transport.post(&path, request).await?;
    Ok(())
}

pub async fn heartbeat(transport: &HttpTransport, node_id: &str, report: &HeartbeatReport) -> Result<(), TransportError> {
    let path = format!("v1/nodes/{node_id}/heartbeat");
    let _: serde_json::Value = transport.post(&path, report).await?;
    Ok(())
}

pub async fn report_capabilities(
    transport: &HttpTransport,
    node_id: &str,
    report: &CapabilitiesReport,
) -> Result<(), TransportError> {
    let path = format!("v1/nodes/{node_id}/capabilities");
    let _: serde_json::Value = transport.put(&path, report).await?;
    Ok(())
}

pub async fn rotate_keys(
    transport: &HttpTransport,
    request: &RotateKeysRequest,
) -> Result<RotateKeysResponse, TransportError> {
    transport.post("v1/keys/rotate", request).await
}

pub async fn fetch_secret(transport: &HttpTransport, node_id: &str, key: &str) -> Result<SecretResponse, TransportError> {
    let path = format!("v1/nodes/{node_id}/secrets/{key}");
    transport.get(&path).await
}

pub async fn ack_action(
    transport: &HttpTransport,
    node_id: &str,
    execution_id: &str,
    ack: &ActionAck,
) -> Result<(), TransportError> {
    let path = format!("v1/nodes/{node_id}/executions/{execution_id}/ack");
    let _: serde_json::Value = transport.post(&path, ack).await?;
    Ok(())
}

pub async fn report_action_result(
    transport: &HttpTransport,
    node_id: &str,
    execution_id: &str,
    result: &ActionResult,
) -> Result<(), TransportError> {
    let path = format!("v1/nodes/{node_id}/executions/{execution_id}/result");
    let _: serde_json::Value = transport.post(&path, result).await?;
    Ok(())
}

pub async fn ping(transport: &HttpTransport) -> Result<PingResponse, TransportError> {
    transport.get("v1/ping").await
}

/// Fetches a build artifact (e.g. a self-update binary) for `version`/`os`/
/// `arch`. Returns the raw response so the caller can stream it to disk
/// rather than buffering the whole body in memory.
pub async fn fetch_artifact(
    transport: &HttpTransport,
    version: &str,
    os: &str,
    arch: &str,
) -> Result<reqwest::Response, TransportError> {
    let path = format!("v1/artifacts/plexd/{version}/{os}/{arch}");
    transport.raw(reqwest::Method::GET, &path, &[]).await
}
