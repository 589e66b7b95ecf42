//! The broker side of the bridge — one MQTT connection, reconnected
//! forever on a fixed cadence.
//!
//! Inbound publishes are processed serially from the event loop, so
//! messages for a given (channel, from) pair reach browsers in broker
//! delivery order.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet};

use meshgate_services::protocol::now_millis;

use crate::bridge::Bridge;
use crate::inbound;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const EVENT_QUEUE_CAPACITY: usize = 64;

/// Drive the broker connection forever.
pub async fn run(bridge: Arc<Bridge>) {
    loop {
        let broker = &bridge.config.broker;
        let client_id = format!("meshtastic-web-{}", now_millis());
        let mut options = MqttOptions::new(client_id, &broker.host, broker.port);
        options.set_keep_alive(KEEP_ALIVE);
        if !broker.username.is_empty() {
            options.set_credentials(&broker.username, &broker.password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, EVENT_QUEUE_CAPACITY);
        bridge.set_client(client);
        tracing::info!(host = %broker.host, port = broker.port, "connecting to broker");

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("broker connected");
                    bridge.on_connect().await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    inbound::handle_broker_message(&bridge, &publish.topic, &publish.payload)
                        .await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "broker connection lost");
                    bridge.on_disconnect();
                    break;
                }
            }
        }

        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
