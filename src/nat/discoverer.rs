use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::transport::HttpTransport;

use super::error::StunError;
use super::stun::{encode_binding_request, parse_binding_response};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NatType {
    None,
    FullCone,
    Symmetric,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct NatConfig {
    pub enabled: bool,
    pub stun_servers: Vec<SocketAddr>,
    pub refresh_interval: Duration,
    pub timeout: Duration,
}

impl Default for NatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // A pair of public STUN servers (Google's) as a reachable
            // out-of-the-box default. `SocketAddr` can't hold a hostname, so
            // these are pinned IPs rather than `stun.l.google.com:19302`;
            // deployments that need resolution-on-start should override this.
            stun_servers: vec![
                SocketAddr::from(([74, 125, 250, 129], 19302)),
                SocketAddr::from(([74, 125, 204, 127], 19302)),
            ],
            refresh_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Performs one binding request/response exchange against `server`.
async fn bind(socket: &UdpSocket, server: SocketAddr, request_timeout: Duration) -> Result<SocketAddr, StunError> {
    let (request, txn_id) = encode_binding_request();
    socket.send_to(&request, server).await?;

    let mut buf = [0u8; 512];
    let (len, _) = timeout(request_timeout, socket.recv_from(&mut buf))
        .await
        .map_err(|_| StunError::Timeout)??;

    parse_binding_response(&buf[..len], &txn_id)
}

/// Runs one discovery cycle against the configured server list, classifying
/// the NAT type per the design's two-probe heuristic.
pub async fn discover(local_port: u16, config: &NatConfig) -> Result<(SocketAddr, NatType), StunError> {
    let socket = UdpSocket::bind(("0.0.0.0", local_port)).await?;

    let mut first_addr = None;
    let mut remaining = config.stun_servers.iter();
    for server in remaining.by_ref() {
        match bind(&socket, *server, config.timeout).await {
            Ok(addr) => {
                first_addr = Some(addr);
                break;
            }
            Err(err) => {
                tracing::debug!(%server, error = %err, "STUN server did not respond");
            }
        }
    }

    let first_addr = first_addr.ok_or(StunError::NoServerResponded)?;

    if first_addr.port() == local_port {
        return Ok((first_addr, NatType::None));
    }

    for server in remaining {
        if let Ok(second_addr) = bind(&socket, *server, config.timeout).await {
            let nat_type = if second_addr == first_addr {
                NatType::FullCone
            } else {
                NatType::Symmetric
            };
            return Ok((first_addr, nat_type));
        }
    }

    Ok((first_addr, NatType::Unknown))
}

#[derive(Serialize)]
struct EndpointReport {
    public_endpoint: String,
    nat_type: NatType,
}

#[derive(Deserialize)]
struct EndpointReportResponse {
    #[serde(default)]
    peer_endpoints: Vec<PeerEndpoint>,
}

#[derive(Deserialize)]
struct PeerEndpoint {
    peer_id: String,
    endpoint: String,
}

/// A narrow view into the WireGuard peer table; the controller that
/// actually manages interface peers lives outside this crate.
pub trait PeerEndpointUpdater: Send + Sync {
    fn update_endpoint(&self, peer_id: &str, endpoint: &str);
}

/// Runs discovery once, reports the result, and applies any peer endpoint
/// updates the control plane returns. Then repeats every `refresh_interval`
/// until cancelled.
pub async fn run_refresh_loop(
    node_id: &str,
    local_port: u16,
    config: NatConfig,
    transport: Arc<HttpTransport>,
    peer_table: Arc<dyn PeerEndpointUpdater>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        match discover(local_port, &config).await {
            Ok((addr, nat_type)) => {
                tracing::info!(%addr, ?nat_type, "discovered public endpoint");
                report_and_apply(node_id, addr, nat_type, &transport, &peer_table).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "STUN discovery failed, will retry next cycle");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.refresh_interval) => {}
            _ = cancel.cancelled() => return,
        }
    }
}

async fn report_and_apply(
    node_id: &str,
    addr: SocketAddr,
    nat_type: NatType,
    transport: &HttpTransport,
    peer_table: &Arc<dyn PeerEndpointUpdater>,
) {
    let path = format!("v1/nodes/{node_id}/endpoint");
    let body = EndpointReport {
        public_endpoint: addr.to_string(),
        nat_type,
    };

    match transport.put::<_, EndpointReportResponse>(&path, &body).await {
        Ok(response) => {
            for peer in response.peer_endpoints {
                if peer.endpoint.is_empty() {
                    continue;
                }
                peer_table.update_endpoint(&peer.peer_id, &peer.endpoint);
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to report endpoint to control plane");
        }
    }
}
