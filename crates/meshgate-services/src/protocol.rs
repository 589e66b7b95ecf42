//! The browser socket protocol — JSON commands in, JSON events out.
//!
//! Commands and events are newline-free JSON objects discriminated by a
//! `type` field. View assembly lives here too: turning a classified
//! broker payload (plus a trial-engine outcome) into the `message` or
//! `raw_message` the browser renders.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use meshgate_core::mesh::{EnvelopeDecode, MeshPacket};
use meshgate_core::node::NodeId;
use meshgate_core::ports::{port_name, PORT_NODEINFO, PORT_POSITION, PORT_TELEMETRY, PORT_TEXT_MESSAGE};
use meshgate_core::topic::parse_topic;

use crate::classify::Classification;
use crate::trial::{DecryptStatus, TrialOutcome};

/// How many hex characters of a raw payload the browser gets to see.
const HEX_PREVIEW_CHARS: usize = 100;

// ── Commands (browser → bridge) ───────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Publish(PublishCommand),
    Subscribe {
        topic: String,
        channel: Option<String>,
        key: Option<String>,
    },
    Unsubscribe {
        topic: String,
    },
    GetSubscriptions,
}

/// Fields omitted by the browser fall back to the configured defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishCommand {
    pub root: Option<String>,
    pub region: Option<String>,
    /// Includes its protocol marker, e.g. `2/e` or `2/json`.
    pub path: Option<String>,
    pub channel: Option<String>,
    pub gateway_id: Option<String>,
    pub from: Option<String>,
    pub to: String,
    pub text: String,
    /// Missing = default key; empty string = no encryption.
    pub key: Option<String>,
}

// ── Events (bridge → browser) ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Status { connected: bool },
    Subscriptions { topics: Vec<String> },
    Subscribed { topic: String },
    Unsubscribed { topic: String },
    Published(PublishedView),
    Error { message: String },
    Message(MessageView),
    RawMessage(RawMessageView),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedView {
    pub mode: &'static str,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_id: Option<u32>,
    pub from: String,
    pub to: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecryptionStatus {
    Success,
    Failed,
    Plaintext,
    Json,
    None,
}

impl From<DecryptStatus> for DecryptionStatus {
    fn from(status: DecryptStatus) -> Self {
        match status {
            DecryptStatus::Success => DecryptionStatus::Success,
            DecryptStatus::Plaintext => DecryptionStatus::Plaintext,
            DecryptStatus::Failed => DecryptionStatus::Failed,
        }
    }
}

/// A decoded radio payload, ready to render.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub topic: String,
    pub channel_id: String,
    pub gateway_id: String,
    /// Display form — `!xxxxxxxx` or `^all`.
    pub from: String,
    pub to: String,
    pub packet_id: u32,
    pub hop_limit: u32,
    pub hop_start: u32,
    pub rx_time: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rx_snr: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rx_rssi: Option<i32>,
    pub via_mqtt: bool,
    pub portnum: u32,
    pub port_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub decryption_status: DecryptionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
    /// Unix milliseconds at assembly time.
    pub timestamp: u64,
}

/// A payload the bridge could not decode — shown raw so the browser can
/// say "something arrived".
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessageView {
    pub topic: String,
    /// Base64 of the full payload.
    pub payload: String,
    /// First 100 hex characters.
    pub payload_hex: String,
    pub size: usize,
    pub content_type: &'static str,
    pub topic_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_meta: Option<Value>,
    pub timestamp: u64,
}

// ── View assembly ─────────────────────────────────────────────────────────────

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl MessageView {
    /// Assemble the view for a decoded binary envelope. `outcome` is the
    /// trial-engine result for encrypted packets; packets that arrived
    /// decoded (or header-only) pass None and report no decryption.
    pub fn from_binary(
        topic: &str,
        decode: &EnvelopeDecode,
        outcome: Option<&TrialOutcome>,
        decode_error: Option<String>,
    ) -> Self {
        let empty = MeshPacket::default();
        let packet = decode.envelope.packet.as_ref().unwrap_or(&empty);

        let (portnum, text, payload, status) = match outcome {
            Some(outcome) => (
                outcome.portnum,
                outcome.text.clone(),
                outcome
                    .decoded
                    .as_ref()
                    .and_then(|d| serde_json::to_value(d).ok()),
                outcome.status.into(),
            ),
            None => match packet.decoded() {
                Some(data) => (
                    data.portnum,
                    (data.portnum == PORT_TEXT_MESSAGE)
                        .then(|| String::from_utf8_lossy(&data.payload).into_owned()),
                    meshgate_core::ports::decode_port_payload(data.portnum, &data.payload)
                        .and_then(|d| serde_json::to_value(&d).ok()),
                    DecryptionStatus::None,
                ),
                None => (0, None, None, DecryptionStatus::None),
            },
        };

        Self {
            topic: topic.to_string(),
            channel_id: decode.envelope.channel_id.clone(),
            gateway_id: decode.envelope.gateway_id.clone(),
            from: NodeId(packet.from).to_string(),
            to: NodeId(packet.to).to_string(),
            packet_id: packet.id,
            hop_limit: packet.hop_limit,
            hop_start: packet.hop_start,
            rx_time: packet.rx_time,
            rx_snr: packet.rx_snr,
            rx_rssi: packet.rx_rssi,
            via_mqtt: packet.via_mqtt,
            portnum,
            port_name: port_name(portnum),
            text,
            payload,
            decryption_status: status,
            decode_error,
            timestamp: now_millis(),
        }
    }

    /// Assemble the view for a gateway JSON payload. Field extraction is
    /// best-effort — gateways disagree on details.
    pub fn from_json(topic: &str, json: &Value) -> Self {
        let info = parse_topic(topic);
        let get_u32 = |key: &str| json.get(key).and_then(Value::as_u64).map(|v| v as u32);
        let from = get_u32("from").unwrap_or(0);
        // Some gateways emit -1 for broadcast
        let to = json
            .get("to")
            .and_then(Value::as_i64)
            .map(|v| v as u32)
            .unwrap_or(0xffff_ffff);

        let text = json
            .get("payload")
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str)
            .or_else(|| json.get("payload").and_then(Value::as_str))
            .map(str::to_string);

        let portnum = match json.get("type").and_then(Value::as_str) {
            Some("text" | "sendtext") => PORT_TEXT_MESSAGE,
            Some("position") => PORT_POSITION,
            Some("nodeinfo") => PORT_NODEINFO,
            Some("telemetry") => PORT_TELEMETRY,
            _ => 0,
        };

        Self {
            topic: topic.to_string(),
            channel_id: json
                .get("channel_id")
                .and_then(Value::as_str)
                .unwrap_or(&info.channel)
                .to_string(),
            gateway_id: json
                .get("sender")
                .and_then(Value::as_str)
                .unwrap_or(&info.gateway)
                .to_string(),
            from: NodeId(from).to_string(),
            to: NodeId(to).to_string(),
            packet_id: get_u32("id").unwrap_or(0),
            hop_limit: get_u32("hop_limit").unwrap_or(0),
            hop_start: get_u32("hop_start").unwrap_or(0),
            rx_time: get_u32("timestamp").unwrap_or(0),
            rx_snr: json.get("snr").and_then(Value::as_f64).map(|v| v as f32),
            rx_rssi: json
                .get("rssi")
                .and_then(Value::as_i64)
                .map(|v| v as i32),
            via_mqtt: true,
            portnum,
            port_name: port_name(portnum),
            text,
            payload: json.get("payload").cloned(),
            decryption_status: DecryptionStatus::Json,
            decode_error: None,
            timestamp: now_millis(),
        }
    }
}

impl RawMessageView {
    /// Assemble the raw view for anything the pipeline could not turn
    /// into a message.
    pub fn from_classification(topic: &str, payload: &[u8], c: &Classification) -> Self {
        let hex_full = hex::encode(payload);
        let payload_hex = hex_full.chars().take(HEX_PREVIEW_CHARS).collect();
        Self {
            topic: topic.to_string(),
            payload: BASE64.encode(payload),
            payload_hex,
            size: payload.len(),
            content_type: c.kind.as_str(),
            topic_path: c.topic_path.clone(),
            preview_text: c.preview.clone(),
            decode_error: c.decode_error.clone(),
            json: c.json.clone(),
            packet_meta: c.envelope.as_ref().and_then(packet_meta),
            timestamp: now_millis(),
        }
    }
}

/// Summarise a probed packet for the raw view's metadata field.
fn packet_meta(decode: &EnvelopeDecode) -> Option<Value> {
    let packet = decode.envelope.packet.as_ref()?;
    Some(serde_json::json!({
        "from": NodeId(packet.from).to_string(),
        "to": NodeId(packet.to).to_string(),
        "id": packet.id,
        "channelHint": packet.channel_hint,
        "hopLimit": packet.hop_limit,
        "viaMqtt": packet.via_mqtt,
        "hasEncrypted": packet.encrypted().is_some(),
        "hasDecoded": packet.decoded().is_some(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use meshgate_core::mesh::{Data, PacketBody, ServiceEnvelope};
    use meshgate_core::ports::PORT_UNKNOWN;

    #[test]
    fn commands_parse_from_browser_json() {
        let cmd: Command = serde_json::from_str(
            r#"{"type":"publish","root":"msh","region":"EU_868","path":"2/json",
                "channel":"mqtt","gatewayId":"!d844b556","from":"!d844b556",
                "to":"^all","text":"hi"}"#,
        )
        .unwrap();
        match cmd {
            Command::Publish(p) => {
                assert_eq!(p.gateway_id.as_deref(), Some("!d844b556"));
                assert_eq!(p.to, "^all");
                assert_eq!(p.text, "hi");
                assert!(p.key.is_none());
            }
            other => panic!("wrong command: {other:?}"),
        }

        let cmd: Command =
            serde_json::from_str(r#"{"type":"subscribe","topic":"msh/#","key":"AQ=="}"#).unwrap();
        assert!(matches!(cmd, Command::Subscribe { .. }));

        let cmd: Command = serde_json::from_str(r#"{"type":"get_subscriptions"}"#).unwrap();
        assert!(matches!(cmd, Command::GetSubscriptions));
    }

    #[test]
    fn unknown_command_type_is_an_error() {
        assert!(serde_json::from_str::<Command>(r#"{"type":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<Command>(r#"{"type":"publish"}"#).is_err());
    }

    #[test]
    fn events_serialize_with_snake_case_types() {
        let event = ServerEvent::Status { connected: true };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["connected"], true);

        let event = ServerEvent::Subscriptions {
            topics: vec!["msh/#".into()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "subscriptions");
        assert_eq!(json["topics"][0], "msh/#");
    }

    #[test]
    fn published_event_uses_camel_case_fields() {
        let event = ServerEvent::Published(PublishedView {
            mode: "protobuf",
            topic: "msh/EU_868/2/e/LongFast/!d844b556".into(),
            packet_id: Some(0x1234),
            from: "!d844b556".into(),
            to: "^all".into(),
            text: "hi".into(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "published");
        assert_eq!(json["packetId"], 0x1234);
        assert_eq!(json["mode"], "protobuf");
    }

    #[test]
    fn message_view_formats_node_ids_and_status() {
        let decode = EnvelopeDecode {
            envelope: ServiceEnvelope {
                packet: Some(MeshPacket {
                    from: 0xd844_b556,
                    to: 0xffff_ffff,
                    id: 42,
                    via_mqtt: true,
                    rx_snr: Some(6.5),
                    body: PacketBody::Encrypted(vec![1, 2, 3]),
                    ..MeshPacket::default()
                }),
                channel_id: "LongFast".into(),
                gateway_id: "!d844b556".into(),
            },
            envelope_error: None,
            packet_error: None,
        };
        let outcome = TrialOutcome {
            status: DecryptStatus::Success,
            portnum: PORT_TEXT_MESSAGE,
            payload: b"Test".to_vec(),
            text: Some("Test".into()),
            decoded: None,
            matched: None,
        };
        let view = MessageView::from_binary(
            "msh/EU_868/2/e/LongFast/!d844b556",
            &decode,
            Some(&outcome),
            None,
        );
        assert_eq!(view.from, "!d844b556");
        assert_eq!(view.to, "^all");
        assert_eq!(view.decryption_status, DecryptionStatus::Success);
        assert_eq!(view.port_name, "TEXT_MESSAGE");
        assert_eq!(view.text.as_deref(), Some("Test"));

        let json = serde_json::to_value(&ServerEvent::Message(view)).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["decryptionStatus"], "success");
        assert_eq!(json["rxSnr"], 6.5);
        // Absent metadata is omitted entirely, not null
        assert!(json.get("rxRssi").is_none());
    }

    #[test]
    fn failed_outcome_carries_the_sentinel_port() {
        let decode = EnvelopeDecode {
            envelope: ServiceEnvelope {
                packet: Some(MeshPacket {
                    from: 1,
                    to: 2,
                    id: 3,
                    body: PacketBody::Encrypted(vec![9, 9, 9]),
                    ..MeshPacket::default()
                }),
                channel_id: "private".into(),
                gateway_id: String::new(),
            },
            envelope_error: None,
            packet_error: None,
        };
        let outcome = TrialOutcome {
            status: DecryptStatus::Failed,
            portnum: PORT_UNKNOWN,
            payload: Vec::new(),
            text: None,
            decoded: None,
            matched: None,
        };
        let view = MessageView::from_binary("t", &decode, Some(&outcome), None);
        assert_eq!(view.decryption_status, DecryptionStatus::Failed);
        assert_eq!(view.portnum, PORT_UNKNOWN);
        assert_eq!(view.port_name, "UNKNOWN");
    }

    #[test]
    fn already_decoded_packet_reports_status_none() {
        let decode = EnvelopeDecode {
            envelope: ServiceEnvelope {
                packet: Some(MeshPacket {
                    from: 1,
                    to: 2,
                    id: 3,
                    body: PacketBody::Decoded(Data {
                        portnum: PORT_TEXT_MESSAGE,
                        payload: b"clear".to_vec(),
                        ..Data::default()
                    }),
                    ..MeshPacket::default()
                }),
                channel_id: "LongFast".into(),
                gateway_id: String::new(),
            },
            envelope_error: None,
            packet_error: None,
        };
        let view = MessageView::from_binary("t", &decode, None, None);
        assert_eq!(view.decryption_status, DecryptionStatus::None);
        assert_eq!(view.text.as_deref(), Some("clear"));
    }

    #[test]
    fn json_view_maps_gateway_fields() {
        let json: Value = serde_json::from_str(
            r#"{"from":3628381526,"to":-1,"id":7,"sender":"!d844b556",
                "type":"text","payload":{"text":"hello"},"snr":9.75,"rssi":-60}"#,
        )
        .unwrap();
        let view = MessageView::from_json("msh/EU_868/2/json/mqtt/!d844b556", &json);
        assert_eq!(view.from, "!d844b556");
        assert_eq!(view.to, "^all");
        assert_eq!(view.text.as_deref(), Some("hello"));
        assert_eq!(view.decryption_status, DecryptionStatus::Json);
        assert_eq!(view.rx_snr, Some(9.75));
        assert_eq!(view.rx_rssi, Some(-60));
        assert_eq!(view.port_name, "TEXT_MESSAGE");
    }

    #[test]
    fn raw_view_encodes_payload_and_caps_hex() {
        let payload: Vec<u8> = (0..120).collect();
        let c = classify("odd/topic", &payload);
        let view = RawMessageView::from_classification("odd/topic", &payload, &c);
        assert_eq!(view.size, 120);
        assert_eq!(view.payload_hex.len(), HEX_PREVIEW_CHARS);
        assert_eq!(
            BASE64.decode(view.payload.as_bytes()).unwrap(),
            payload
        );
        let json = serde_json::to_value(&ServerEvent::RawMessage(view)).unwrap();
        assert_eq!(json["type"], "raw_message");
        assert_eq!(json["topicPath"], "unknown");
    }

    #[test]
    fn raw_view_carries_packet_meta_for_near_misses() {
        // A mostly-valid envelope that scores too low: packet with zeroed
        // ids but a real structure
        let decode = EnvelopeDecode {
            envelope: ServiceEnvelope {
                packet: Some(MeshPacket::default()),
                channel_id: String::new(),
                gateway_id: String::new(),
            },
            envelope_error: None,
            packet_error: None,
        };
        let meta = packet_meta(&decode).unwrap();
        assert_eq!(meta["from"], "!00000000");
        assert_eq!(meta["hasEncrypted"], false);
    }
}
