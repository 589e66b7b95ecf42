//! Meshtastic envelope schemas — the on-wire types the bridge speaks.
//!
//! Three nested layers: `ServiceEnvelope` (broker wrapper) carries a
//! `MeshPacket` (radio addressing and hop metadata), which carries either
//! encrypted bytes or a decoded `Data` (port-tagged payload).
//!
//! Decoders populate defaults, skip unknown fields by wire type alone,
//! and in the annotating mode return the partial value with a
//! `FieldError` instead of failing — an inbound packet that half-decodes
//! is still worth showing.

use crate::proto::{FieldError, WireError, WireReader, WireType, WireWriter};

// ── Field numbers ─────────────────────────────────────────────────────────────

const DATA_PORTNUM: u32 = 1;
const DATA_PAYLOAD: u32 = 2;
const DATA_WANT_RESPONSE: u32 = 3;
const DATA_BITFIELD: u32 = 9;

const PACKET_FROM: u32 = 1;
const PACKET_TO: u32 = 2;
const PACKET_CHANNEL: u32 = 3;
const PACKET_DECODED: u32 = 4;
const PACKET_ENCRYPTED: u32 = 5;
const PACKET_ID: u32 = 6;
const PACKET_RX_TIME: u32 = 7;
const PACKET_RX_SNR: u32 = 8;
const PACKET_HOP_LIMIT: u32 = 9;
const PACKET_WANT_ACK: u32 = 10;
const PACKET_RX_RSSI: u32 = 12;
const PACKET_VIA_MQTT: u32 = 14;
const PACKET_HOP_START: u32 = 15;

const ENVELOPE_PACKET: u32 = 1;
const ENVELOPE_CHANNEL_ID: u32 = 2;
const ENVELOPE_GATEWAY_ID: u32 = 3;

/// Longest channel or gateway identifier accepted on the wire. Longer
/// values are consumed from the stream but discarded, so the fields that
/// follow stay aligned.
pub const MAX_ID_BYTES: usize = 64;

// ── Types ─────────────────────────────────────────────────────────────────────

/// The port-tagged inner payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Data {
    pub portnum: u32,
    pub payload: Vec<u8>,
    pub want_response: bool,
    /// Sender capability flags.
    pub bitfield: u32,
}

/// A packet carries exactly one of these on the wire. When an encoder is
/// handed a packet built with both, decoded wins and encrypted is elided.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PacketBody {
    #[default]
    Empty,
    Encrypted(Vec<u8>),
    Decoded(Data),
}

impl PacketBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, PacketBody::Empty)
    }
}

/// Radio-level packet: addressing, hop metadata, and the payload variant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshPacket {
    pub from: u32,
    pub to: u32,
    pub id: u32,
    /// Advisory hash of (channel name, expanded key). Collisions happen.
    pub channel_hint: u32,
    pub hop_limit: u32,
    pub hop_start: u32,
    pub want_ack: bool,
    pub via_mqtt: bool,
    pub rx_time: u32,
    /// Receive-side metadata. None when the field was absent — a packet
    /// heard at exactly 0 dB is distinguishable from one never measured.
    pub rx_snr: Option<f32>,
    pub rx_rssi: Option<i32>,
    pub body: PacketBody,
}

impl MeshPacket {
    pub fn encrypted(&self) -> Option<&[u8]> {
        match &self.body {
            PacketBody::Encrypted(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn decoded(&self) -> Option<&Data> {
        match &self.body {
            PacketBody::Decoded(data) => Some(data),
            _ => None,
        }
    }
}

/// Broker-side wrapper pairing a packet with its channel and gateway.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceEnvelope {
    pub packet: Option<MeshPacket>,
    pub channel_id: String,
    pub gateway_id: String,
}

/// How decoders treat malformed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Return the error.
    Strict,
    /// Stop at the first error and return the partial value with the
    /// error attached.
    #[default]
    Annotate,
}

/// A partially- or fully-decoded value with its error annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub value: T,
    pub error: Option<FieldError>,
}

/// Envelope decode result. Envelope-level and inner-packet errors are
/// reported separately — consumers weigh them differently.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeDecode {
    pub envelope: ServiceEnvelope,
    pub envelope_error: Option<FieldError>,
    pub packet_error: Option<FieldError>,
}

// ── Data ──────────────────────────────────────────────────────────────────────

pub fn encode_data(data: &Data) -> Vec<u8> {
    let mut w = WireWriter::new();
    if data.portnum != 0 {
        w.varint_field(DATA_PORTNUM, u64::from(data.portnum));
    }
    if !data.payload.is_empty() {
        w.bytes_field(DATA_PAYLOAD, &data.payload);
    }
    if data.want_response {
        w.bool_field(DATA_WANT_RESPONSE, true);
    }
    if data.bitfield != 0 {
        w.varint_field(DATA_BITFIELD, u64::from(data.bitfield));
    }
    w.into_bytes()
}

/// Strict decode — the decryption trial engine treats any error here as
/// "wrong key, keep trying".
pub fn decode_data(bytes: &[u8]) -> Result<Data, FieldError> {
    let mut r = WireReader::new(bytes);
    let mut data = Data::default();
    while let Some(tag) = r.read_tag() {
        let (field, wire) = tag.map_err(|e| FieldError::new(0, e))?;
        let step = match (field, wire) {
            (DATA_PORTNUM, WireType::Varint) => r.read_varint32().map(|v| data.portnum = v),
            (DATA_PAYLOAD, WireType::LengthDelimited) => {
                r.read_bytes().map(|b| data.payload = b.to_vec())
            }
            (DATA_WANT_RESPONSE, WireType::Varint) => {
                r.read_varint64().map(|v| data.want_response = v != 0)
            }
            (DATA_BITFIELD, WireType::Varint) => r.read_varint32().map(|v| data.bitfield = v),
            (_, wire) => r.skip(wire),
        };
        step.map_err(|e| FieldError::new(field, e))?;
    }
    Ok(data)
}

// ── MeshPacket ────────────────────────────────────────────────────────────────

pub fn encode_mesh_packet(packet: &MeshPacket) -> Vec<u8> {
    let mut w = WireWriter::new();
    w.fixed32_field(PACKET_FROM, packet.from);
    w.fixed32_field(PACKET_TO, packet.to);
    if packet.channel_hint != 0 {
        w.varint_field(PACKET_CHANNEL, u64::from(packet.channel_hint));
    }
    match &packet.body {
        PacketBody::Decoded(data) => w.bytes_field(PACKET_DECODED, &encode_data(data)),
        PacketBody::Encrypted(bytes) => w.bytes_field(PACKET_ENCRYPTED, bytes),
        PacketBody::Empty => {}
    }
    if packet.id != 0 {
        w.varint_field(PACKET_ID, u64::from(packet.id));
    }
    if packet.rx_time != 0 {
        w.varint_field(PACKET_RX_TIME, u64::from(packet.rx_time));
    }
    if let Some(snr) = packet.rx_snr {
        w.float_field(PACKET_RX_SNR, snr);
    }
    if packet.hop_limit != 0 {
        w.varint_field(PACKET_HOP_LIMIT, u64::from(packet.hop_limit));
    }
    if packet.want_ack {
        w.bool_field(PACKET_WANT_ACK, true);
    }
    if let Some(rssi) = packet.rx_rssi {
        // Two's-complement u32 keeps negative RSSI at five wire bytes
        w.varint_field(PACKET_RX_RSSI, u64::from(rssi as u32));
    }
    if packet.via_mqtt {
        w.bool_field(PACKET_VIA_MQTT, true);
    }
    if packet.hop_start != 0 {
        w.varint_field(PACKET_HOP_START, u64::from(packet.hop_start));
    }
    w.into_bytes()
}

pub fn decode_mesh_packet(
    bytes: &[u8],
    mode: DecodeMode,
) -> Result<Decoded<MeshPacket>, FieldError> {
    let mut r = WireReader::new(bytes);
    let mut packet = MeshPacket::default();
    let mut decoded: Option<Data> = None;
    let mut encrypted: Option<Vec<u8>> = None;

    let error = loop {
        let (field, wire) = match r.read_tag() {
            None => break None,
            Some(Ok(tag)) => tag,
            Some(Err(e)) => break Some(FieldError::new(0, e)),
        };
        let step = read_packet_field(&mut r, field, wire, &mut packet, &mut decoded, &mut encrypted);
        if let Err(e) = step {
            break Some(FieldError::new(field, e));
        }
    };

    // Decoded wins when both variants somehow arrived
    packet.body = match (decoded, encrypted) {
        (Some(data), _) => PacketBody::Decoded(data),
        (None, Some(bytes)) => PacketBody::Encrypted(bytes),
        (None, None) => PacketBody::Empty,
    };

    match (mode, error) {
        (DecodeMode::Strict, Some(e)) => Err(e),
        (_, error) => Ok(Decoded {
            value: packet,
            error,
        }),
    }
}

fn read_packet_field(
    r: &mut WireReader<'_>,
    field: u32,
    wire: WireType,
    packet: &mut MeshPacket,
    decoded: &mut Option<Data>,
    encrypted: &mut Option<Vec<u8>>,
) -> Result<(), WireError> {
    match (field, wire) {
        (PACKET_FROM, WireType::Fixed32) => packet.from = r.read_fixed32()?,
        (PACKET_TO, WireType::Fixed32) => packet.to = r.read_fixed32()?,
        (PACKET_CHANNEL, WireType::Varint) => packet.channel_hint = r.read_varint32()?,
        (PACKET_DECODED, WireType::LengthDelimited) => {
            let inner = r.read_bytes()?;
            // Surface the inner error under this field, keeping its kind
            *decoded = Some(decode_data(inner).map_err(|e| e.error)?);
        }
        (PACKET_ENCRYPTED, WireType::LengthDelimited) => {
            *encrypted = Some(r.read_bytes()?.to_vec());
        }
        (PACKET_ID, WireType::Varint) => packet.id = r.read_varint32()?,
        (PACKET_RX_TIME, WireType::Varint) => packet.rx_time = r.read_varint32()?,
        (PACKET_RX_SNR, WireType::Fixed32) => packet.rx_snr = Some(r.read_float()?),
        (PACKET_HOP_LIMIT, WireType::Varint) => packet.hop_limit = r.read_varint32()?,
        (PACKET_WANT_ACK, WireType::Varint) => packet.want_ack = r.read_varint64()? != 0,
        (PACKET_RX_RSSI, WireType::Varint) => {
            packet.rx_rssi = Some(r.read_varint32()? as i32);
        }
        (PACKET_VIA_MQTT, WireType::Varint) => packet.via_mqtt = r.read_varint64()? != 0,
        (PACKET_HOP_START, WireType::Varint) => packet.hop_start = r.read_varint32()?,
        (_, wire) => r.skip(wire)?,
    }
    Ok(())
}

// ── ServiceEnvelope ───────────────────────────────────────────────────────────

pub fn encode_service_envelope(envelope: &ServiceEnvelope) -> Vec<u8> {
    let mut w = WireWriter::new();
    if let Some(packet) = &envelope.packet {
        w.bytes_field(ENVELOPE_PACKET, &encode_mesh_packet(packet));
    }
    if !envelope.channel_id.is_empty() {
        w.string_field(ENVELOPE_CHANNEL_ID, &envelope.channel_id);
    }
    if !envelope.gateway_id.is_empty() {
        w.string_field(ENVELOPE_GATEWAY_ID, &envelope.gateway_id);
    }
    w.into_bytes()
}

pub fn decode_service_envelope(
    bytes: &[u8],
    mode: DecodeMode,
) -> Result<EnvelopeDecode, FieldError> {
    let mut r = WireReader::new(bytes);
    let mut envelope = ServiceEnvelope::default();
    let mut packet_error = None;

    let envelope_error = loop {
        let (field, wire) = match r.read_tag() {
            None => break None,
            Some(Ok(tag)) => tag,
            Some(Err(e)) => break Some(FieldError::new(0, e)),
        };
        let step: Result<(), WireError> = (|| {
            match (field, wire) {
                (ENVELOPE_PACKET, WireType::LengthDelimited) => {
                    let inner = r.read_bytes()?;
                    // The inner packet is always decoded annotating — a
                    // half-readable packet still scores and displays
                    let decoded = decode_mesh_packet(inner, DecodeMode::Annotate)
                        .unwrap_or_else(|e| Decoded {
                            value: MeshPacket::default(),
                            error: Some(e),
                        });
                    packet_error = decoded.error;
                    envelope.packet = Some(decoded.value);
                }
                (ENVELOPE_CHANNEL_ID, WireType::LengthDelimited) => {
                    envelope.channel_id = read_bounded_string(&mut r)?;
                }
                (ENVELOPE_GATEWAY_ID, WireType::LengthDelimited) => {
                    envelope.gateway_id = read_bounded_string(&mut r)?;
                }
                (_, wire) => r.skip(wire)?,
            }
            Ok(())
        })();
        if let Err(e) = step {
            break Some(FieldError::new(field, e));
        }
    };

    if mode == DecodeMode::Strict {
        if let Some(e) = envelope_error.as_ref().or(packet_error.as_ref()) {
            return Err(e.clone());
        }
    }

    Ok(EnvelopeDecode {
        envelope,
        envelope_error,
        packet_error,
    })
}

/// Read a string field, discarding values longer than [`MAX_ID_BYTES`].
/// The bytes are consumed either way, so the reader stays aligned.
fn read_bounded_string(r: &mut WireReader<'_>) -> Result<String, WireError> {
    let bytes = r.read_bytes()?;
    if bytes.len() > MAX_ID_BYTES {
        return Ok(String::new());
    }
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
