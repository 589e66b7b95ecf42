//! The inbound pipeline: broker message → corruption gate → classifier
//! → trial engine → view → fan-out.
//!
//! Nothing in this path is fatal. A payload that cannot be decoded is
//! broadcast raw so browsers can show that something arrived; only
//! replacement-mangled payloads are dropped, with a single log line.

use meshgate_services::classify::{classify, contains_replacement, ContentKind};
use meshgate_services::protocol::{MessageView, RawMessageView, ServerEvent};
use meshgate_services::trial;

use crate::bridge::Bridge;

/// Handle one broker message. Called serially from the broker event
/// loop, preserving per-(channel, from) delivery order.
pub async fn handle_broker_message(bridge: &Bridge, topic: &str, payload: &[u8]) {
    if contains_replacement(payload) {
        tracing::warn!(
            topic,
            size = payload.len(),
            "dropping payload mangled by a lossy text decode"
        );
        return;
    }

    let classification = classify(topic, payload);
    tracing::debug!(
        topic,
        kind = classification.kind.as_str(),
        size = payload.len(),
        "broker message"
    );

    let event = match classification.kind {
        ContentKind::MeshtasticJson => match &classification.json {
            Some(json) => ServerEvent::Message(MessageView::from_json(topic, json)),
            None => raw(topic, payload, &classification),
        },
        ContentKind::MeshtasticBinary | ContentKind::MeshtasticBinaryHeaderOnly => {
            match &classification.envelope {
                Some(decode) => {
                    let defaults = &bridge.config.defaults;
                    let outcome = decode
                        .envelope
                        .packet
                        .as_ref()
                        .filter(|packet| packet.encrypted().is_some())
                        .map(|packet| {
                            trial::decrypt_packet(
                                packet,
                                &decode.envelope.channel_id,
                                &bridge.keyring.snapshot(),
                                &defaults.channel,
                                &defaults.key,
                            )
                        });
                    ServerEvent::Message(MessageView::from_binary(
                        topic,
                        decode,
                        outcome.as_ref(),
                        classification.decode_error.clone(),
                    ))
                }
                None => raw(topic, payload, &classification),
            }
        }
        _ => raw(topic, payload, &classification),
    };

    bridge.clients.broadcast(&event);
}

fn raw(
    topic: &str,
    payload: &[u8],
    classification: &meshgate_services::Classification,
) -> ServerEvent {
    ServerEvent::RawMessage(RawMessageView::from_classification(
        topic,
        payload,
        classification,
    ))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
