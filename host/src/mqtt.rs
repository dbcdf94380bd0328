//! ==============================================================================
//! mqtt.rs - broker side of the relay
//! ==============================================================================
//!
//! purpose:
//!     republishes each fresh reading to a single topic.
//!
//! design:
//!     rumqttc needs its event loop polled to make progress. a background task
//!     owns the event loop, logs connection changes and keeps a "connected"
//!     flag. publish() never waits on the network: it fails immediately when
//!     disconnected and only enqueues otherwise (try_publish). a broker that
//!     stays down shows up as a stale last_published, which the watchdog
//!     turns into a restart.
//!
//! ==============================================================================

use crate::config::MqttConfig;
use crate::error::TransportError;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outbound message sink.
#[allow(async_fn_in_trait)]
pub trait Publisher {
    async fn publish(&mut self, topic: &str, payload: String) -> Result<(), TransportError>;
}

pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    /// Create the client and spawn the task driving its event loop.
    pub fn connect(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds));
        if !config.user.is_empty() {
            options.set_credentials(&config.user, &config.key);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let connected = Arc::new(AtomicBool::new(false));

        let flag = connected.clone();
        let host = config.host.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("[MQTT] Connected to {}", host);
                        flag.store(true, Ordering::SeqCst);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        tracing::warn!("[MQTT] Broker closed the connection");
                        flag.store(false, Ordering::SeqCst);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if flag.swap(false, Ordering::SeqCst) {
                            tracing::warn!("[MQTT] Connection lost: {}", e);
                        } else {
                            tracing::debug!("[MQTT] Connect failed: {}", e);
                        }
                        // rumqttc reconnects on the next poll
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Self { client, connected }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Publisher for MqttPublisher {
    async fn publish(&mut self, topic: &str, payload: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Mqtt("not connected".into()));
        }
        self.client.try_publish(topic, QoS::AtLeastOnce, false, payload.into_bytes())?;
        Ok(())
    }
}

/// payload sent when the api reported no value for the sensor
pub const ABSENT_PAYLOAD: &str = "null";

/// Text sent to the broker for one value. Always carries a decimal point
/// (`55.0`, not `55`).
pub fn format_payload(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:?}", v),
        None => ABSENT_PAYLOAD.to_string(),
    }
}
