use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::RwLock;

use crate::envelope::Envelope;

use super::types::EventPayload;

/// A registered event handler. Errors are logged by the dispatcher and do
/// not stop subsequent handlers from running.
pub type Handler = Box<dyn Fn(&Envelope, &EventPayload) -> anyhow::Result<()> + Send + Sync>;

/// Routes verified events to the handlers registered for their type, in
/// registration order.
///
/// `register` and `dispatch` may be called concurrently — registering a new
/// handler while a dispatch is in flight is safe, though it is unspecified
/// whether the in-flight dispatch observes it.
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event_type: impl Into<String>, handler: Handler) {
        let mut handlers = self.handlers.write().expect("dispatcher lock poisoned");
        handlers.entry(event_type.into()).or_default().push(handler);
    }

    /// Dispatches `envelope` to every handler registered for its type. Each
    /// handler's error is logged and swallowed; a handler panic is caught at
    /// this boundary, logged, and treated the same as a returned error —
    /// subsequent handlers still run. Events with no registered handler are
    /// logged at debug level and dropped.
    pub fn dispatch(&self, envelope: &Envelope, payload: &EventPayload) {
        let handlers = self.handlers.read().expect("dispatcher lock poisoned");
        match handlers.get(&envelope.event_type) {
            Some(list) if !list.is_empty() => {
                for handler in list {
                    let outcome =
                        std::panic::catch_unwind(AssertUnwindSafe(|| handler(envelope, payload)));
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            tracing::warn!(
                                event_type = %envelope.event_type,
                                event_id = %envelope.event_id,
                                error = %err,
                                "event handler failed"
                            );
                        }
                        Err(_) => {
                            tracing::error!(
                                event_type = %envelope.event_type,
                                event_id = %envelope.event_id,
                                "event handler panicked"
                            );
                        }
                    }
                }
            }
            _ => {
                tracing::debug!(event_type = %envelope.event_type, "no handler registered, dropping event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::value::RawValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn envelope(event_type: &str) -> Envelope {
        envelope_with_payload(event_type, "{}")
    }

    fn envelope_with_payload(event_type: &str, payload_json: &str) -> Envelope {
        Envelope::new(
            event_type,
            "evt-1",
            1,
            "nonce-1",
            RawValue::from_string(payload_json.to_string()).unwrap(),
        )
    }

    #[test]
    fn invokes_handlers_in_registration_order() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let order1 = order.clone();
        dispatcher.register(
            "peer_removed",
            Box::new(move |_e, _p| {
                order1.lock().unwrap().push(1);
                Ok(())
            }),
        );
        let order2 = order.clone();
        dispatcher.register(
            "peer_removed",
            Box::new(move |_e, _p| {
                order2.lock().unwrap().push(2);
                Ok(())
            }),
        );

        let env = envelope_with_payload("peer_removed", r#"{"peer_id":"p1"}"#);
        let payload = EventPayload::parse(&env.event_type, &env.payload).unwrap();
        dispatcher.dispatch(&env, &payload);

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn failing_handler_does_not_block_others() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.register(
            "peer_removed",
            Box::new(|_e, _p| anyhow::bail!("boom")),
        );
        let calls2 = calls.clone();
        dispatcher.register(
            "peer_removed",
            Box::new(move |_e, _p| {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let env = envelope_with_payload("peer_removed", r#"{"peer_id":"p1"}"#);
        let payload = EventPayload::parse(&env.event_type, &env.payload).unwrap();
        dispatcher.dispatch(&env, &payload);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_block_others_or_unwind() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.register(
            "peer_removed",
            Box::new(|_e, _p| panic!("boom")),
        );
        let calls2 = calls.clone();
        dispatcher.register(
            "peer_removed",
            Box::new(move |_e, _p| {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let env = envelope_with_payload("peer_removed", r#"{"peer_id":"p1"}"#);
        let payload = EventPayload::parse(&env.event_type, &env.payload).unwrap();
        dispatcher.dispatch(&env, &payload);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregistered_type_is_dropped_silently() {
        let dispatcher = Dispatcher::new();
        let env = envelope("some_future_event_type");
        let payload = EventPayload::parse(&env.event_type, &env.payload).unwrap();
        dispatcher.dispatch(&env, &payload);
    }
}
