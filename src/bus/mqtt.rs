//! # MQTT bus client.
//!
//! Wraps an MQTT broker connection behind [`BusClient`]: connect probes the
//! broker and fails boot-level on refusal, then a single event-loop task
//! delivers incoming publishes into the handler table.
//!
//! ## Rules
//! - The event loop reconnects with a fixed delay after transient errors
//!   and resubscribes every registered topic on each connection ack.
//! - Persistent failure (no successful poll across the retry window) fires
//!   the `disconnected` token so the supervisor can tear the fleet down.
//! - Publishes ride the client's bounded queue; a full queue drops the
//!   message with a warning rather than blocking the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, Transport};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{BusClient, BusHandler, HandlerTable, HandlerToken, Qos};
use crate::error::{BootError, RuntimeError};
use crate::settings::Settings;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

fn to_mqtt_qos(qos: Qos) -> rumqttc::QoS {
    match qos {
        Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
        Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// MQTT-backed implementation of [`BusClient`].
pub struct MqttBus {
    client: AsyncClient,
    handlers: Arc<HandlerTable>,
    disconnected: CancellationToken,
}

impl MqttBus {
    /// Connects to the broker named by the settings and spawns the event
    /// loop. Fails with [`BootError::BusConnect`] if the broker does not
    /// acknowledge within the connect timeout.
    pub async fn connect(settings: &Settings) -> Result<Arc<Self>, BootError> {
        let client_id = format!("chargevisor_manager_{}", std::process::id());
        let mut options = match &settings.mqtt.socket_path {
            #[cfg(unix)]
            Some(path) => {
                let mut options =
                    MqttOptions::new(client_id, path.display().to_string(), settings.mqtt.port);
                options.set_transport(Transport::Unix);
                options
            }
            #[cfg(not(unix))]
            Some(_) => MqttOptions::new(client_id, settings.mqtt.host.clone(), settings.mqtt.port),
            None => MqttOptions::new(client_id, settings.mqtt.host.clone(), settings.mqtt.port),
        };
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let endpoint = settings.mqtt.describe();

        // Probe until the broker acks, so boot fails fast on a dead broker.
        let probe = async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(e.to_string()),
                }
            }
        };
        match tokio::time::timeout(CONNECT_TIMEOUT, probe).await {
            Ok(Ok(())) => {}
            Ok(Err(message)) => return Err(BootError::BusConnect { endpoint, message }),
            Err(_) => {
                return Err(BootError::BusConnect {
                    endpoint,
                    message: format!("no broker ack within {CONNECT_TIMEOUT:?}"),
                })
            }
        }
        tracing::info!(endpoint, "connected to message bus");

        let bus = Arc::new(Self {
            client,
            handlers: Arc::new(HandlerTable::new()),
            disconnected: CancellationToken::new(),
        });
        bus.clone().spawn_loop(event_loop);
        Ok(bus)
    }

    /// Spawns the event-loop task owning the broker connection.
    fn spawn_loop(self: Arc<Self>, mut event_loop: rumqttc::EventLoop) {
        tokio::spawn(async move {
            let mut failures: u32 = 0;
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        failures = 0;
                        match serde_json::from_slice::<Value>(&publish.payload) {
                            Ok(payload) => self.handlers.dispatch(&publish.topic, &payload),
                            Err(e) => tracing::warn!(
                                topic = publish.topic,
                                error = %e,
                                "dropping non-JSON bus payload"
                            ),
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        failures = 0;
                        for topic in self.handlers.topics() {
                            if let Err(e) = self
                                .client
                                .subscribe(topic.clone(), rumqttc::QoS::ExactlyOnce)
                                .await
                            {
                                tracing::warn!(topic, error = %e, "resubscribe failed");
                            }
                        }
                    }
                    Ok(_) => failures = 0,
                    Err(e) => {
                        failures += 1;
                        if failures >= MAX_CONSECUTIVE_FAILURES {
                            tracing::error!(error = %e, "message bus connection lost");
                            self.disconnected.cancel();
                            return;
                        }
                        tracing::warn!(error = %e, failures, "bus poll failed, reconnecting");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl BusClient for MqttBus {
    fn publish(&self, topic: &str, payload: &Value, qos: Qos) {
        let encoded = payload.to_string();
        if let Err(e) = self
            .client
            .try_publish(topic, to_mqtt_qos(qos), false, encoded)
        {
            tracing::warn!(topic, error = %e, "dropping bus publish");
        }
    }

    async fn register_handler(
        &self,
        topic: &str,
        qos: Qos,
        handler: BusHandler,
    ) -> Result<HandlerToken, RuntimeError> {
        let token = self.handlers.insert(topic, handler);
        self.client
            .subscribe(topic, to_mqtt_qos(qos))
            .await
            .map_err(|e| {
                self.handlers.remove(&token);
                RuntimeError::BusDisconnected {
                    message: e.to_string(),
                }
            })?;
        Ok(token)
    }

    fn unregister_handler(&self, token: &HandlerToken) {
        if self.handlers.remove(token) {
            if let Err(e) = self.client.try_unsubscribe(&token.topic) {
                tracing::debug!(topic = token.topic, error = %e, "unsubscribe not delivered");
            }
        }
    }

    fn disconnected(&self) -> CancellationToken {
        self.disconnected.clone()
    }
}
