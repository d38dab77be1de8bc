//! Batch envelopes and transport plumbing for the three observability
//! endpoints (metrics, logs, audit). The collectors that produce raw
//! samples are an external concern; this module owns the wire shapes and
//! the periodic metrics-reporting loop.

mod batch;
mod manager;

pub use batch::{AuditBatch, AuditEvent, LogBatch, LogEntry, MetricSample, MetricsBatch};
pub use manager::{post_audit, post_logs, post_metrics, run_collect_loop, MetricsCollector, MetricsConfig};
