//! The bridge — owns the broker handle, the browser registry, the
//! learned-key cache, and the subscription set, and handles every
//! browser command.
//!
//! Command replies go to the originating client only; subscription-set
//! changes additionally broadcast a fresh snapshot to everyone. A
//! handler error becomes a single `error` event to the originator — the
//! connection stays open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rumqttc::{AsyncClient, QoS};
use thiserror::Error;

use meshgate_core::config::MeshgateConfig;
use meshgate_core::crypto::{self, KeyError};
use meshgate_core::mesh::{
    encode_data, encode_service_envelope, Data, MeshPacket, PacketBody, ServiceEnvelope,
};
use meshgate_core::node::{NodeId, NodeIdError};
use meshgate_core::ports::PORT_TEXT_MESSAGE;
use meshgate_core::topic::build_topic;
use meshgate_services::protocol::{Command, PublishCommand, PublishedView, ServerEvent};
use meshgate_services::{KeyRing, SubscriptionSet};

use crate::clients::ClientRegistry;

/// Hop budget for packets this gateway originates.
const OUTBOUND_HOP_LIMIT: u32 = 3;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("not connected to the broker")]
    NotConnected,

    #[error("broker rejected the request: {0}")]
    Broker(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Node(#[from] NodeIdError),
}

// ── Bridge ────────────────────────────────────────────────────────────────────

pub struct Bridge {
    pub config: MeshgateConfig,
    pub keyring: KeyRing,
    pub subscriptions: SubscriptionSet,
    pub clients: ClientRegistry,
    mqtt: Mutex<Option<AsyncClient>>,
    connected: AtomicBool,
    seeded: AtomicBool,
}

impl Bridge {
    pub fn new(config: MeshgateConfig) -> Self {
        let keyring = KeyRing::new();
        keyring.seed(
            config
                .channels
                .iter()
                .map(|(channel, key)| (channel.clone(), key.clone())),
        );
        Self {
            config,
            keyring,
            subscriptions: SubscriptionSet::new(),
            clients: ClientRegistry::new(),
            mqtt: Mutex::new(None),
            connected: AtomicBool::new(false),
            seeded: AtomicBool::new(false),
        }
    }

    // ── Broker link state ─────────────────────────────────────────────────────

    pub fn set_client(&self, client: AsyncClient) {
        *self.mqtt.lock().expect("mqtt handle poisoned") = Some(client);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn client(&self) -> Result<AsyncClient, BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        self.mqtt
            .lock()
            .expect("mqtt handle poisoned")
            .clone()
            .ok_or(BridgeError::NotConnected)
    }

    /// Broker connection established. Seeds the configured default
    /// subscription on the first connect with an empty set, then
    /// re-subscribes every filter from a snapshot.
    pub async fn on_connect(&self) {
        self.connected.store(true, Ordering::SeqCst);

        if !self.seeded.swap(true, Ordering::SeqCst)
            && self.subscriptions.is_empty()
            && !self.config.defaults.subscription.is_empty()
        {
            self.subscriptions.insert(&self.config.defaults.subscription);
        }

        let topics = self.subscriptions.snapshot();
        if let Ok(client) = self.client() {
            for topic in topics {
                if let Err(e) = client.subscribe(&topic, QoS::AtMostOnce).await {
                    tracing::warn!(topic, error = %e, "re-subscribe failed");
                }
            }
        }

        self.clients
            .broadcast(&ServerEvent::Status { connected: true });
    }

    /// Broker connection lost. Idempotent — the reconnect loop reports
    /// every failed poll.
    pub fn on_disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.clients
                .broadcast(&ServerEvent::Status { connected: false });
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    pub async fn handle_command(&self, client_id: u64, raw: &str) {
        let command = match serde_json::from_str::<Command>(raw) {
            Ok(command) => command,
            Err(e) => {
                self.clients.send_to(
                    client_id,
                    &ServerEvent::Error {
                        message: format!("bad command: {e}"),
                    },
                );
                return;
            }
        };

        let result = match command {
            Command::Publish(publish) => self.cmd_publish(publish).await.map(|ev| (ev, false)),
            Command::Subscribe {
                topic,
                channel,
                key,
            } => self
                .cmd_subscribe(topic, channel, key)
                .await
                .map(|ev| (ev, true)),
            Command::Unsubscribe { topic } => {
                self.cmd_unsubscribe(topic).await.map(|ev| (ev, true))
            }
            Command::GetSubscriptions => Ok((self.subscriptions_event(), false)),
        };

        match result {
            Ok((event, set_changed)) => {
                self.clients.send_to(client_id, &event);
                if set_changed {
                    self.clients.broadcast(&self.subscriptions_event());
                }
            }
            Err(e) => self.clients.send_to(
                client_id,
                &ServerEvent::Error {
                    message: e.to_string(),
                },
            ),
        }
    }

    pub fn subscriptions_event(&self) -> ServerEvent {
        ServerEvent::Subscriptions {
            topics: self.subscriptions.snapshot(),
        }
    }

    async fn cmd_publish(&self, publish: PublishCommand) -> Result<ServerEvent, BridgeError> {
        let defaults = &self.config.defaults;
        let root = publish.root.unwrap_or_else(|| defaults.root.clone());
        let region = publish.region.unwrap_or_else(|| defaults.region.clone());
        let path = publish.path.unwrap_or_else(|| defaults.path.clone());
        let channel = publish.channel.unwrap_or_else(|| defaults.channel.clone());
        let gateway = publish
            .gateway_id
            .unwrap_or_else(|| defaults.gateway_id.clone());
        let topic = build_topic(&root, &region, &path, &channel, &gateway);

        let from: NodeId = publish.from.as_deref().unwrap_or(&gateway).parse()?;
        let to: NodeId = publish.to.parse()?;
        // Missing key means the default; an empty string means none
        let supplied_key = publish.key;
        let key = supplied_key
            .clone()
            .unwrap_or_else(|| defaults.key.clone());

        let (mode, packet_id, payload) = if path == "json" || path.ends_with("/json") {
            let json = serde_json::json!({
                "from": from.0,
                "to": to.0,
                "type": "sendtext",
                "payload": publish.text,
            });
            ("json", None, json.to_string().into_bytes())
        } else {
            let packet_id = crypto::generate_packet_id();
            let data = Data {
                portnum: PORT_TEXT_MESSAGE,
                payload: publish.text.as_bytes().to_vec(),
                ..Data::default()
            };
            let body = if key.is_empty() {
                PacketBody::Decoded(data)
            } else {
                PacketBody::Encrypted(crypto::encrypt(
                    &encode_data(&data),
                    &key,
                    packet_id,
                    from.0,
                )?)
            };
            let envelope = ServiceEnvelope {
                packet: Some(MeshPacket {
                    from: from.0,
                    to: to.0,
                    id: packet_id,
                    channel_hint: crypto::channel_hash(&channel, &key)?,
                    hop_limit: OUTBOUND_HOP_LIMIT,
                    hop_start: OUTBOUND_HOP_LIMIT,
                    body,
                    ..MeshPacket::default()
                }),
                channel_id: channel.clone(),
                gateway_id: gateway.clone(),
            };
            ("protobuf", Some(packet_id), encode_service_envelope(&envelope))
        };

        self.publish_bytes(&topic, payload).await?;
        tracing::info!(topic, mode, "published");

        if let Some(key) = supplied_key {
            if !key.is_empty() {
                self.keyring.learn(&channel, &key);
            }
        }

        Ok(ServerEvent::Published(PublishedView {
            mode,
            topic,
            packet_id,
            from: from.to_string(),
            to: to.to_string(),
            text: publish.text,
        }))
    }

    async fn cmd_subscribe(
        &self,
        topic: String,
        channel: Option<String>,
        key: Option<String>,
    ) -> Result<ServerEvent, BridgeError> {
        let client = self.client()?;
        client
            .subscribe(&topic, QoS::AtMostOnce)
            .await
            .map_err(|e| BridgeError::Broker(e.to_string()))?;
        self.subscriptions.insert(&topic);
        tracing::info!(topic, "subscribed");

        if let (Some(channel), Some(key)) = (channel, key) {
            if !key.is_empty() {
                self.keyring.learn(&channel, &key);
            }
        }

        Ok(ServerEvent::Subscribed { topic })
    }

    async fn cmd_unsubscribe(&self, topic: String) -> Result<ServerEvent, BridgeError> {
        let client = self.client()?;
        client
            .unsubscribe(&topic)
            .await
            .map_err(|e| BridgeError::Broker(e.to_string()))?;
        self.subscriptions.remove(&topic);
        tracing::info!(topic, "unsubscribed");

        Ok(ServerEvent::Unsubscribed { topic })
    }

    async fn publish_bytes(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        let client = self.client()?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| BridgeError::Broker(e.to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
