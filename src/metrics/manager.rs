use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::transport::{HttpTransport, TransportError};

use super::batch::{AuditBatch, LogBatch, MetricSample, MetricsBatch};

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub collect_interval: Duration,
    pub report_interval: Duration,
    pub batch_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            collect_interval: Duration::from_secs(15),
            report_interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// The OS/process metrics reader; out of scope per the design, this crate
/// only calls it and owns the batch/report plumbing.
pub trait MetricsCollector: Send + Sync {
    fn collect(&self) -> Vec<MetricSample>;
}

pub async fn post_metrics(
    transport: &HttpTransport,
    node_id: &str,
    batch: &MetricsBatch,
) -> Result<(), TransportError> {
    let path = format!("v1/nodes/{node_id}/metrics");
    transport.post::<_, serde_json::Value>(&path, batch).await?;
    Ok(())
}

pub async fn post_logs(transport: &HttpTransport, node_id: &str, batch: &LogBatch) -> Result<(), TransportError> {
    let path = format!("v1/nodes/{node_id}/logs");
    transport.post::<_, serde_json::Value>(&path, batch).await?;
    Ok(())
}

pub async fn post_audit(transport: &HttpTransport, node_id: &str, batch: &AuditBatch) -> Result<(), TransportError> {
    let path = format!("v1/nodes/{node_id}/audit");
    transport.post::<_, serde_json::Value>(&path, batch).await?;
    Ok(())
}

/// Periodically collects samples from `collector` and flushes them to the
/// control plane, whichever of `report_interval` or `batch_size` is hit
/// first. Runs as its own task, per the design's scheduling model.
pub async fn run_collect_loop(
    transport: Arc<HttpTransport>,
    node_id: String,
    config: MetricsConfig,
    collector: Arc<dyn MetricsCollector>,
    cancel: CancellationToken,
) {
    let mut buffer: Vec<MetricSample> = Vec::new();
    let mut last_flush = tokio::time::Instant::now();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.collect_interval) => {}
            _ = cancel.cancelled() => return,
        }

        buffer.extend(collector.collect());

        let due_by_time = last_flush.elapsed() >= config.report_interval;
        let due_by_size = buffer.len() >= config.batch_size;
        if !buffer.is_empty() && (due_by_time || due_by_size) {
            let batch = MetricsBatch {
                samples: std::mem::take(&mut buffer),
            };
            if let Err(err) = post_metrics(&transport, &node_id, &batch).await {
                tracing::warn!(error = %err, "failed to report metrics batch");
            }
            last_flush = tokio::time::Instant::now();
        }

        if cancel.is_cancelled() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportConfig;

    struct FixedCollector;
    impl MetricsCollector for FixedCollector {
        fn collect(&self) -> Vec<MetricSample> {
            vec![MetricSample {
                name: "cpu_pct".to_string(),
                value: 12.5,
                timestamp: chrono::Utc::now(),
                labels: Default::default(),
            }]
        }
    }

    #[tokio::test]
    async fn posts_batch_once_size_threshold_is_hit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/nodes/n1/metrics")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let transport = Arc::new(
            HttpTransport::new(TransportConfig {
                base_url: format!("{}/", server.url()),
                ..Default::default()
            })
            .unwrap(),
        );

        let config = MetricsConfig {
            enabled: true,
            collect_interval: Duration::from_millis(1),
            report_interval: Duration::from_secs(3600),
            batch_size: 2,
        };
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(run_collect_loop(
            transport,
            "n1".to_string(),
            config,
            Arc::new(FixedCollector),
            cancel2,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let _ = handle.await;

        mock.assert_async().await;
    }
}
