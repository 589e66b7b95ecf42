//! Payload classification — what did the broker just hand us?
//!
//! Given a topic and raw bytes, produce a classification: a decoded
//! binary envelope (with a confidence score deciding how much to trust
//! it), gateway JSON, plain JSON, text, or opaque binary. The classifier
//! is a total function — it never fails, it only gets less confident.

use meshgate_core::mesh::{decode_service_envelope, DecodeMode, EnvelopeDecode};
use meshgate_core::proto::FieldError;
use meshgate_core::topic::parse_topic;

/// Confidence at or above this classifies a binary probe as a real
/// envelope.
const SCORE_THRESHOLD: i32 = 6;

/// Printable-byte fraction at or above this reads as text.
const TEXT_RATIO: f64 = 0.85;

/// UTF-8 replacement-sequence fraction at or above this marks a payload
/// as binary a gateway mangled through a text pipeline.
const CORRUPTION_RATIO: f64 = 0.15;

/// Preview length cap in characters.
const PREVIEW_CHARS: usize = 140;

/// The three-byte UTF-8 encoding of U+FFFD.
pub const REPLACEMENT_SEQ: [u8; 3] = [0xef, 0xbf, 0xbd];

// ── Classification value ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    MeshtasticBinary,
    MeshtasticBinaryHeaderOnly,
    MeshtasticJson,
    Json,
    Text,
    Binary,
    BinaryCorrupted,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::MeshtasticBinary => "meshtastic-binary",
            ContentKind::MeshtasticBinaryHeaderOnly => "meshtastic-binary-header-only",
            ContentKind::MeshtasticJson => "meshtastic-json",
            ContentKind::Json => "json",
            ContentKind::Text => "text",
            ContentKind::Binary => "binary",
            ContentKind::BinaryCorrupted => "binary-corrupted",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: ContentKind,
    pub topic_path: String,
    pub preview: Option<String>,
    pub decode_error: Option<String>,
    /// Present for binary kinds, and for near-miss probes that still
    /// yielded a packet worth showing as metadata.
    pub envelope: Option<EnvelopeDecode>,
    pub json: Option<serde_json::Value>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Classify a broker payload. Deterministic: identical inputs yield
/// identical classifications.
pub fn classify(topic: &str, payload: &[u8]) -> Classification {
    let info = parse_topic(topic);
    match info.path.as_str() {
        "json" => classify_json_path(info.path.clone(), payload),
        "e" | "c" => classify_binary_path(info.path.clone(), payload),
        other => {
            let note = format!("unexpected topic path {other:?}");
            let mut c = fallback(info.path.clone(), payload, None);
            c.decode_error = Some(match c.decode_error {
                Some(existing) => format!("{note}; {existing}"),
                None => note,
            });
            c
        }
    }
}

// ── Topic-path dispositions ───────────────────────────────────────────────────

fn classify_json_path(topic_path: String, payload: &[u8]) -> Classification {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(value) => Classification {
            kind: ContentKind::MeshtasticJson,
            topic_path,
            preview: preview_of(payload),
            decode_error: None,
            envelope: None,
            json: Some(value),
        },
        Err(e) => {
            let mut c = fallback(topic_path, payload, None);
            c.decode_error = Some(format!("payload on json path is not JSON: {e}"));
            c
        }
    }
}

fn classify_binary_path(topic_path: String, payload: &[u8]) -> Classification {
    let decode = match decode_service_envelope(payload, DecodeMode::Annotate) {
        Ok(decode) => decode,
        // Annotate mode only errs on pathological input; treat as a
        // zero-confidence probe
        Err(e) => EnvelopeDecode {
            envelope: Default::default(),
            envelope_error: Some(e),
            packet_error: None,
        },
    };

    let score = envelope_score(&decode);
    if score >= SCORE_THRESHOLD {
        let header_only = decode
            .envelope
            .packet
            .as_ref()
            .map_or(true, |p| p.body.is_empty());
        return Classification {
            kind: if header_only {
                ContentKind::MeshtasticBinaryHeaderOnly
            } else {
                ContentKind::MeshtasticBinary
            },
            topic_path,
            preview: None,
            decode_error: decode_error_note(&decode),
            envelope: Some(decode),
            json: None,
        };
    }

    // Keep the probe around when it at least produced a packet — the
    // raw view shows it as metadata
    let probe = decode.envelope.packet.is_some().then_some(decode);
    fallback(topic_path, payload, probe)
}

/// JSON / text / binary detection for payloads nothing else matched.
fn fallback(
    topic_path: String,
    payload: &[u8],
    envelope: Option<EnvelopeDecode>,
) -> Classification {
    if replacement_ratio(payload) >= CORRUPTION_RATIO {
        return Classification {
            kind: ContentKind::BinaryCorrupted,
            topic_path,
            preview: None,
            decode_error: Some("gateway mangled binary as text".to_string()),
            envelope,
            json: None,
        };
    }

    let trimmed = trim_ascii(payload);
    if trimmed.first().is_some_and(|b| *b == b'{' || *b == b'[') {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(payload) {
            return Classification {
                kind: ContentKind::Json,
                topic_path,
                preview: preview_of(payload),
                decode_error: None,
                envelope,
                json: Some(value),
            };
        }
    }

    if printable_ratio(payload) >= TEXT_RATIO {
        return Classification {
            kind: ContentKind::Text,
            topic_path,
            preview: preview_of(payload),
            decode_error: None,
            envelope,
            json: None,
        };
    }

    Classification {
        kind: ContentKind::Binary,
        topic_path,
        preview: None,
        decode_error: None,
        envelope,
        json: None,
    }
}

// ── Confidence scoring ────────────────────────────────────────────────────────

/// Additive confidence score for a binary envelope probe.
pub fn envelope_score(decode: &EnvelopeDecode) -> i32 {
    let mut score = 0;
    if let Some(packet) = &decode.envelope.packet {
        score += 2;
        if packet.from > 0 {
            score += 2;
        }
        if packet.id != 0 {
            score += 2;
        }
        if packet.rx_time != 0 {
            score += 1;
        }
        if packet.hop_start > 0 || packet.hop_limit > 0 || packet.via_mqtt {
            score += 1;
        }
        if !packet.body.is_empty() {
            score += 3;
        }
    }
    if !decode.envelope.channel_id.is_empty() || !decode.envelope.gateway_id.is_empty() {
        score += 1;
    }
    if decode.envelope_error.is_none() && decode.packet_error.is_none() {
        score += 1;
    } else {
        if let Some(e) = &decode.envelope_error {
            score -= envelope_error_penalty(e, true);
        }
        if let Some(e) = &decode.packet_error {
            score -= envelope_error_penalty(e, false);
        }
    }
    score
}

fn envelope_error_penalty(error: &FieldError, envelope_level: bool) -> i32 {
    if error.error.is_truncation() {
        1
    } else if error.error.is_unknown_wire_type() {
        if envelope_level {
            3
        } else {
            1
        }
    } else {
        2
    }
}

fn decode_error_note(decode: &EnvelopeDecode) -> Option<String> {
    match (&decode.envelope_error, &decode.packet_error) {
        (None, None) => None,
        (Some(e), None) => Some(format!("envelope: {e}")),
        (None, Some(e)) => Some(format!("packet: {e}")),
        (Some(a), Some(b)) => Some(format!("envelope: {a}; packet: {b}")),
    }
}

// ── Byte heuristics ───────────────────────────────────────────────────────────

/// Fraction of bytes that are whitespace or printable ASCII. An empty
/// payload counts as fully printable.
pub fn printable_ratio(payload: &[u8]) -> f64 {
    if payload.is_empty() {
        return 1.0;
    }
    let printable = payload
        .iter()
        .filter(|&&b| matches!(b, 0x09 | 0x0a | 0x0d) || (0x20..=0x7e).contains(&b))
        .count();
    printable as f64 / payload.len() as f64
}

/// Fraction of the payload covered by UTF-8 replacement sequences.
pub fn replacement_ratio(payload: &[u8]) -> f64 {
    if payload.is_empty() {
        return 0.0;
    }
    let count = payload
        .windows(3)
        .filter(|w| *w == REPLACEMENT_SEQ)
        .count();
    (count * 3) as f64 / payload.len() as f64
}

/// True when the payload contains a replacement sequence anywhere in its
/// first `len - 2` positions — the broker delivered bytes that went
/// through a lossy text decode and cannot be recovered.
pub fn contains_replacement(payload: &[u8]) -> bool {
    payload.windows(3).any(|w| w == REPLACEMENT_SEQ)
}

/// Whitespace-collapsed preview, capped at 140 characters.
pub fn preview_of(payload: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(payload);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    let mut preview: String = collapsed.chars().take(PREVIEW_CHARS).collect();
    if collapsed.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    Some(preview)
}

fn trim_ascii(payload: &[u8]) -> &[u8] {
    let start = payload
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(payload.len());
    let end = payload
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &payload[start..end]
}

// ── Tests ─────────────────────────────────────────────────────────────────────
