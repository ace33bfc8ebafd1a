//! # Message bus access.
//!
//! The manager talks to the pub/sub fabric through the [`BusClient`] trait:
//! fire-and-forget publishes plus topic handlers registered under a
//! revocable token. Two implementations exist:
//!
//! - [`MqttBus`]: the production client over an MQTT broker.
//! - [`LocalBus`]: an in-process loopback used by tests, dispatching a
//!   publish synchronously to the handlers registered on the same topic.
//!
//! ## Rules
//! - Publishing never blocks the caller; delivery failures are logged.
//! - Handlers are plain synchronous closures and must stay short: they run
//!   on the bus event-loop task.
//! - Unregistering is synchronous so teardown can run under a mutex.

mod mqtt;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;

pub use mqtt::MqttBus;

/// Topic handler: called with the topic and the decoded JSON payload.
pub type BusHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Delivery guarantee requested for a subscription or publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Revocation token of a registered handler.
#[derive(Debug, Clone)]
pub struct HandlerToken {
    id: u64,
    topic: String,
}

impl HandlerToken {
    /// Topic the handler was registered on.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// What the manager needs from the pub/sub client.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Enqueues a publish without blocking. Failures are logged.
    fn publish(&self, topic: &str, payload: &Value, qos: Qos);

    /// Subscribes to `topic` and registers `handler` for its messages.
    async fn register_handler(
        &self,
        topic: &str,
        qos: Qos,
        handler: BusHandler,
    ) -> Result<HandlerToken, RuntimeError>;

    /// Removes a handler. The subscription is dropped with the last handler
    /// on the topic.
    fn unregister_handler(&self, token: &HandlerToken);

    /// Cancelled when the bus connection is lost for good.
    fn disconnected(&self) -> CancellationToken;
}

/// Handler table shared by the bus implementations.
pub(crate) struct HandlerTable {
    next_id: AtomicU64,
    by_topic: Mutex<HashMap<String, Vec<(u64, BusHandler)>>>,
}

impl HandlerTable {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            by_topic: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, topic: &str, handler: BusHandler) -> HandlerToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.by_topic
            .lock()
            .expect("handler table poisoned")
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        HandlerToken {
            id,
            topic: topic.to_string(),
        }
    }

    /// Removes the handler; returns true if the topic has no handlers left.
    pub(crate) fn remove(&self, token: &HandlerToken) -> bool {
        let mut by_topic = self.by_topic.lock().expect("handler table poisoned");
        if let Some(handlers) = by_topic.get_mut(&token.topic) {
            handlers.retain(|(id, _)| *id != token.id);
            if handlers.is_empty() {
                by_topic.remove(&token.topic);
                return true;
            }
        }
        false
    }

    /// Calls every handler registered on `topic`. Handlers are cloned out
    /// first, so a handler may re-enter the table.
    pub(crate) fn dispatch(&self, topic: &str, payload: &Value) {
        let handlers: Vec<BusHandler> = {
            let by_topic = self.by_topic.lock().expect("handler table poisoned");
            match by_topic.get(topic) {
                Some(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return,
            }
        };
        for handler in handlers {
            handler(topic, payload);
        }
    }

    pub(crate) fn topics(&self) -> Vec<String> {
        self.by_topic
            .lock()
            .expect("handler table poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

/// In-process loopback bus: a publish is delivered synchronously to every
/// handler registered on the exact topic.
pub struct LocalBus {
    handlers: HandlerTable,
    never_disconnected: CancellationToken,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            handlers: HandlerTable::new(),
            never_disconnected: CancellationToken::new(),
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusClient for LocalBus {
    fn publish(&self, topic: &str, payload: &Value, _qos: Qos) {
        self.handlers.dispatch(topic, payload);
    }

    async fn register_handler(
        &self,
        topic: &str,
        _qos: Qos,
        handler: BusHandler,
    ) -> Result<HandlerToken, RuntimeError> {
        Ok(self.handlers.insert(topic, handler))
    }

    fn unregister_handler(&self, token: &HandlerToken) {
        self.handlers.remove(token);
    }

    fn disconnected(&self) -> CancellationToken {
        self.never_disconnected.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn local_bus_dispatches_to_registered_topic_only() {
        let bus = LocalBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let token = bus
            .register_handler(
                "everest/store/ready",
                Qos::ExactlyOnce,
                Arc::new(move |_topic, payload| {
                    assert_eq!(payload, &json!(true));
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        bus.publish("everest/store/ready", &json!(true), Qos::ExactlyOnce);
        bus.publish("everest/other/ready", &json!(true), Qos::ExactlyOnce);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bus.unregister_handler(&token);
        bus.publish("everest/store/ready", &json!(true), Qos::ExactlyOnce);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(token.topic(), "everest/store/ready");
    }

    #[tokio::test]
    async fn dropping_the_last_handler_frees_the_topic() {
        let bus = LocalBus::new();
        let noop: BusHandler = Arc::new(|_, _| {});
        let a = bus
            .register_handler("t", Qos::AtMostOnce, Arc::clone(&noop))
            .await
            .unwrap();
        let b = bus.register_handler("t", Qos::AtMostOnce, noop).await.unwrap();

        assert!(!bus.handlers.remove(&a));
        assert!(bus.handlers.remove(&b));
        assert!(bus.handlers.topics().is_empty());
    }
}
