//! Meshgate end-to-end scenarios.
//!
//! These tests run the full inbound pipeline — codec → classifier →
//! trial engine → view — and the outbound construction path, without a
//! live broker. Every byte that would cross the wire is built and
//! consumed by the same code the daemon runs.

use meshgate_core::crypto::{self, DEFAULT_PSK};
use meshgate_core::mesh::{
    decode_mesh_packet, decode_service_envelope, encode_data, encode_service_envelope, Data,
    DecodeMode, MeshPacket, PacketBody, ServiceEnvelope,
};
use meshgate_core::node::NodeId;
use meshgate_core::ports::{decode_port_payload, PortPayload, PORT_POSITION, PORT_TEXT_MESSAGE, PORT_UNKNOWN};
use meshgate_core::proto::WireWriter;
use meshgate_core::topic::{build_topic, parse_topic};
use meshgate_services::classify::{classify, contains_replacement, ContentKind};
use meshgate_services::protocol::{MessageView, ServerEvent};
use meshgate_services::trial::{decrypt_packet, DecryptStatus};

// ── Helpers ───────────────────────────────────────────────────────────────────

const FROM: u32 = 0xd844_b556;
const TO: u32 = 0xffff_ffff;
const PACKET_ID: u32 = 0x1234_5678;

/// Build the exact envelope of the round-trip scenario: a text message
/// encrypted under a key, wrapped in packet and envelope.
fn text_envelope(text: &str, key: &str, channel: &str) -> Vec<u8> {
    let data = Data {
        portnum: PORT_TEXT_MESSAGE,
        payload: text.as_bytes().to_vec(),
        ..Data::default()
    };
    let encrypted = crypto::encrypt(&encode_data(&data), key, PACKET_ID, FROM).unwrap();
    encode_service_envelope(&ServiceEnvelope {
        packet: Some(MeshPacket {
            from: FROM,
            to: TO,
            id: PACKET_ID,
            channel_hint: crypto::channel_hash(channel, key).unwrap(),
            via_mqtt: true,
            body: PacketBody::Encrypted(encrypted),
            ..MeshPacket::default()
        }),
        channel_id: channel.to_string(),
        gateway_id: "!d844b556".to_string(),
    })
}

// ── Scenario 1: round-trip text message ───────────────────────────────────────

#[test]
fn round_trip_text_message() {
    let topic = "msh/EU_868/2/e/LongFast/!d844b556";
    let payload = text_envelope("Test", DEFAULT_PSK, "LongFast");

    let classification = classify(topic, &payload);
    assert_eq!(classification.kind, ContentKind::MeshtasticBinary);

    let decode = classification.envelope.as_ref().unwrap();
    let packet = decode.envelope.packet.as_ref().unwrap();
    assert_eq!(decode.envelope.channel_id, "LongFast");
    assert_eq!(decode.envelope.gateway_id, "!d844b556");

    let cache = vec![("LongFast".to_string(), DEFAULT_PSK.to_string())];
    let outcome = decrypt_packet(packet, "LongFast", &cache, "LongFast", DEFAULT_PSK);
    assert_eq!(outcome.status, DecryptStatus::Success);
    assert_eq!(outcome.portnum, PORT_TEXT_MESSAGE);
    assert_eq!(outcome.text.as_deref(), Some("Test"));

    // And the browser-facing view carries the decoded text
    let view = MessageView::from_binary(topic, decode, Some(&outcome), None);
    let json = serde_json::to_value(&ServerEvent::Message(view)).unwrap();
    assert_eq!(json["type"], "message");
    assert_eq!(json["from"], "!d844b556");
    assert_eq!(json["to"], "^all");
    assert_eq!(json["text"], "Test");
    assert_eq!(json["portName"], "TEXT_MESSAGE");
    assert_eq!(json["decryptionStatus"], "success");
    assert_eq!(json["viaMqtt"], true);
}

// ── Scenario 2: JSON downlink publish ─────────────────────────────────────────

#[test]
fn json_downlink_payload_shape() {
    let topic = build_topic("msh", "EU_868", "2/json", "mqtt", "!d844b556");
    assert_eq!(topic, "msh/EU_868/2/json/mqtt/!d844b556");

    let from: NodeId = "!d844b556".parse().unwrap();
    let to: NodeId = "^all".parse().unwrap();
    let payload = serde_json::json!({
        "from": from.0,
        "to": to.0,
        "type": "sendtext",
        "payload": "hi",
    });
    assert_eq!(payload["from"], 3_628_381_526u32);
    assert_eq!(payload["to"], 4_294_967_295u32);
    assert_eq!(payload["type"], "sendtext");
    assert_eq!(payload["payload"], "hi");

    // The uplink direction understands its own downlink format
    let text = serde_json::to_vec(&payload).unwrap();
    let classification = classify(&topic, &text);
    assert_eq!(classification.kind, ContentKind::MeshtasticJson);
    let view = MessageView::from_json(&topic, classification.json.as_ref().unwrap());
    assert_eq!(view.from, "!d844b556");
    assert_eq!(view.to, "^all");
    assert_eq!(view.text.as_deref(), Some("hi"));
}

// ── Scenario 3: position decode ───────────────────────────────────────────────

#[test]
fn position_decodes_to_decimal_degrees() {
    let mut w = WireWriter::new();
    w.fixed32_field(1, 485_000_000u32);
    w.fixed32_field(2, 115_000_000u32);
    w.varint_field(3, 300);
    let data = Data {
        portnum: PORT_POSITION,
        payload: w.into_bytes(),
        ..Data::default()
    };

    match decode_port_payload(data.portnum, &data.payload) {
        Some(PortPayload::Position(pos)) => {
            assert_eq!(pos.latitude, 48.5);
            assert_eq!(pos.longitude, 11.5);
            assert_eq!(pos.altitude, 300);
        }
        other => panic!("expected a position, got {other:?}"),
    }
}

// ── Scenario 4: unknown key fallback ──────────────────────────────────────────

#[test]
fn unknown_key_yields_failed_status() {
    let random_key = "8rvkvyBzKPDjSoIlzhcEFTVVww1vGfyHZcIG5rOITFw=";
    let topic = "msh/EU_868/2/e/private/!d844b556";
    let payload = text_envelope(
        "a message long enough that a wrong keystream cannot parse cleanly",
        random_key,
        "private",
    );

    let classification = classify(topic, &payload);
    assert_eq!(classification.kind, ContentKind::MeshtasticBinary);

    let decode = classification.envelope.as_ref().unwrap();
    let packet = decode.envelope.packet.as_ref().unwrap();
    // Cache holds only the default — nothing can open this
    let cache = vec![("LongFast".to_string(), DEFAULT_PSK.to_string())];
    let outcome = decrypt_packet(packet, "private", &cache, "LongFast", DEFAULT_PSK);
    assert_eq!(outcome.status, DecryptStatus::Failed);
    assert_eq!(outcome.portnum, PORT_UNKNOWN);

    let view = MessageView::from_binary(topic, decode, Some(&outcome), None);
    let json = serde_json::to_value(&ServerEvent::Message(view)).unwrap();
    assert_eq!(json["decryptionStatus"], "failed");
    assert_eq!(json["portName"], "UNKNOWN");
}

// ── Scenario 5: shorthand expansion ───────────────────────────────────────────

#[test]
fn shorthand_expansion_and_hash_delta() {
    let expanded = crypto::expand_psk("Ag==").unwrap();
    let default = crypto::expand_psk("AQ==").unwrap();
    assert_eq!(expanded[..15], default[..15]);
    assert_eq!(expanded[15], 0x02);

    let one = crypto::channel_hash("LongFast", "AQ==").unwrap();
    let two = crypto::channel_hash("LongFast", "Ag==").unwrap();
    assert_eq!(one ^ two, 3, "hashes differ by XOR of the swapped byte");
}

// ── Scenario 6: corruption drop ───────────────────────────────────────────────

#[test]
fn replacement_sequence_is_detected_for_the_drop() {
    let mut payload = vec![0x20u8; 10];
    payload.extend_from_slice(&[0xef, 0xbf, 0xbd]);
    payload.resize(50, 0x20);
    assert_eq!(payload.len(), 50);
    assert!(contains_replacement(&payload));

    // A clean payload of the same shape is not dropped
    let clean = vec![0x20u8; 50];
    assert!(!contains_replacement(&clean));
}

// ── Boundary behaviors ────────────────────────────────────────────────────────

#[test]
fn oversized_channel_id_keeps_gateway_aligned() {
    let bytes = encode_service_envelope(&ServiceEnvelope {
        packet: None,
        channel_id: "x".repeat(65),
        gateway_id: "!d844b556".to_string(),
    });
    let decoded = decode_service_envelope(&bytes, DecodeMode::Strict).unwrap();
    assert_eq!(decoded.envelope.channel_id, "");
    assert_eq!(decoded.envelope.gateway_id, "!d844b556");
}

#[test]
fn stray_unknown_fields_do_not_break_a_packet() {
    let mut w = WireWriter::new();
    w.fixed32_field(1, FROM);
    w.fixed32_field(2, TO);
    w.varint_field(6, u64::from(PACKET_ID));
    // Unknown fields of every wire type
    w.varint_field(100, 12345);
    w.fixed32_field(101, 0xdead_beef);
    w.bytes_field(102, b"stray");
    let mut bytes = w.into_bytes();
    bytes.push((103 << 3) | 1); // fixed64
    bytes.extend_from_slice(&0xaaaa_bbbb_cccc_ddddu64.to_le_bytes());

    let decoded = decode_mesh_packet(&bytes, DecodeMode::Annotate).unwrap();
    assert!(decoded.error.is_none());
    assert_eq!(decoded.value.from, FROM);
    assert_eq!(decoded.value.to, TO);
    assert_eq!(decoded.value.id, PACKET_ID);
}

#[test]
fn envelope_roundtrip_preserves_everything() {
    let envelope = ServiceEnvelope {
        packet: Some(MeshPacket {
            from: FROM,
            to: TO,
            id: PACKET_ID,
            channel_hint: crypto::channel_hash("LongFast", DEFAULT_PSK).unwrap(),
            hop_limit: 3,
            hop_start: 5,
            want_ack: true,
            via_mqtt: true,
            rx_time: 1_700_000_000,
            rx_snr: Some(-3.75),
            rx_rssi: Some(-101),
            body: PacketBody::Decoded(Data {
                portnum: PORT_TEXT_MESSAGE,
                payload: b"everything".to_vec(),
                want_response: true,
                bitfield: 1,
            }),
        }),
        channel_id: "LongFast".to_string(),
        gateway_id: "!d844b556".to_string(),
    };
    let decoded =
        decode_service_envelope(&encode_service_envelope(&envelope), DecodeMode::Strict).unwrap();
    assert_eq!(decoded.envelope, envelope);
}

// ── Topic properties ──────────────────────────────────────────────────────────

#[test]
fn canonical_topics_recover_their_triple() {
    for (path, channel, gateway) in [
        ("e", "LongFast", "!d844b556"),
        ("c", "admin", "!00000001"),
        ("json", "mqtt", "!aabbccdd"),
    ] {
        let topic = format!("msh/EU_868/2/{path}/{channel}/{gateway}");
        let info = parse_topic(&topic);
        assert_eq!(info.path, path);
        assert_eq!(info.channel, channel);
        assert_eq!(info.gateway, gateway);
    }
}

#[test]
fn non_canonical_topics_use_the_heuristic() {
    let info = parse_topic("telemetry/site-a/ingest");
    assert_eq!(info.path, "unknown");
    assert_eq!(info.channel, "site-a");
    assert_eq!(info.gateway, "ingest");
}

// ── Trial-engine guarantee ────────────────────────────────────────────────────

#[test]
fn correct_key_in_cache_never_falls_back_to_plaintext() {
    // The plaintext fallback would also fail here, but the point is the
    // success path wins first whenever the right key is cached anywhere.
    let key = "8rvkvyBzKPDjSoIlzhcEFTVVww1vGfyHZcIG5rOITFw=";
    let payload = text_envelope("cached away", key, "hidden");
    let classification = classify("msh/EU_868/2/e/hidden/!d844b556", &payload);
    let decode = classification.envelope.as_ref().unwrap();
    let packet = decode.envelope.packet.as_ref().unwrap();

    let cache = vec![
        ("LongFast".to_string(), DEFAULT_PSK.to_string()),
        ("hidden".to_string(), key.to_string()),
    ];
    let outcome = decrypt_packet(packet, "hidden", &cache, "LongFast", DEFAULT_PSK);
    assert_eq!(outcome.status, DecryptStatus::Success);
    assert_eq!(outcome.text.as_deref(), Some("cached away"));
}

// ── Cipher properties ─────────────────────────────────────────────────────────

#[test]
fn encrypt_decrypt_is_the_identity() {
    for (key, label) in [
        (DEFAULT_PSK.to_string(), "default"),
        ("Ag==".to_string(), "shorthand"),
        ("8rvkvyBzKPDjSoIlzhcEFTVVww1vGfyHZcIG5rOITFw=".to_string(), "aes-256"),
    ] {
        let plaintext = b"property: decrypt(encrypt(p)) == p";
        let ct = crypto::encrypt(plaintext, &key, PACKET_ID, FROM).unwrap();
        let pt = crypto::decrypt(&ct, &key, PACKET_ID, FROM).unwrap();
        assert_eq!(&pt[..], &plaintext[..], "key {label}");
    }
}
