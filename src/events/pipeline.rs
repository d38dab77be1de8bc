use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::Method;

use crate::envelope::{Envelope, Verifier};
use crate::transport::{HttpTransport, TransportError};

use super::dispatcher::Dispatcher;
use super::sse::{self, SseError};
use super::types::EventPayload;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Sse(#[from] SseError),
}

/// Connects to the control plane's SSE endpoint for `node_id`, verifying and
/// dispatching every well-formed event, and resuming from the last
/// dispatched event id on the next call.
pub struct EventPipeline {
    transport: Arc<HttpTransport>,
    verifier: Arc<dyn Verifier>,
    dispatcher: Arc<Dispatcher>,
    node_id: String,
    idle_timeout: Duration,
    last_event_id: Mutex<Option<String>>,
}

impl EventPipeline {
    pub fn new(
        transport: Arc<HttpTransport>,
        verifier: Arc<dyn Verifier>,
        dispatcher: Arc<Dispatcher>,
        node_id: impl Into<String>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            verifier,
            dispatcher,
            node_id: node_id.into(),
            idle_timeout,
            last_event_id: Mutex::new(None),
        }
    }

    /// The id of the last dispatched event, carried as `Last-Event-ID` on
    /// the next `connect_once` call. `None` before the first event.
    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().expect("lock poisoned").clone()
    }

    /// Opens one SSE connection and drives it to completion: clean EOF,
    /// idle timeout, or a transport error. This is the `connectFn` the
    /// reconnect engine calls in a loop.
    pub async fn connect_once(&self) -> Result<(), PipelineError> {
        let path = format!("v1/nodes/{}/events", self.node_id);
        let mut headers = vec![("Accept", "text/event-stream".to_string())];
        if let Some(id) = self.last_event_id.lock().expect("lock poisoned").clone() {
            headers.push(("Last-Event-ID", id));
        }

        let response = self.transport.raw(Method::GET, &path, &headers).await?;
        let stream = response
            .bytes_stream()
            .map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        let async_read = tokio_util_compat_reader(stream);
        let reader = sse::buffered(async_read);

        let verifier = self.verifier.clone();
        let dispatcher = self.dispatcher.clone();
        let last_event_id = &self.last_event_id;

        sse::read_events(reader, self.idle_timeout, move |event| {
            if event.event_type == "__retry__" {
                return;
            }
            if let Some(id) = &event.id {
                *last_event_id.lock().expect("lock poisoned") = Some(id.clone());
            }
            let envelope: Envelope = match serde_json::from_str(&event.data) {
                Ok(env) => env,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to parse event envelope, skipping");
                    return;
                }
            };
            let now_ms = chrono::Utc::now().timestamp_millis();
            if let Err(err) = verifier.verify(&envelope, now_ms) {
                tracing::warn!(
                    event_id = %envelope.event_id,
                    error = %err,
                    "envelope verification failed, skipping"
                );
                return;
            }
            let payload = match EventPayload::parse(&envelope.event_type, &envelope.payload) {
                Ok(p) => p,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to parse event payload, skipping");
                    return;
                }
            };
            dispatcher.dispatch(&envelope, &payload);
        })
        .await?;

        Ok(())
    }
}

/// Adapts a fallible byte-chunk stream (as returned by `reqwest::Response`)
/// into an `AsyncRead` the SSE parser can buffer over.
fn tokio_util_compat_reader<S>(stream: S) -> impl tokio::io::AsyncRead + Unpin
where
    S: Stream<Item = std::io::Result<bytes::Bytes>> + Unpin,
{
    tokio_util::io::StreamReader::new(stream)
}
