//! Port numbers and typed sub-payload decoders.
//!
//! A `Data` payload is tagged with a port number that says what the
//! bytes mean. The bridge decodes the handful of ports browsers care
//! about; everything else passes through as opaque bytes with its
//! numeric tag. Decoders here never fail — malformed input yields no
//! value, and the caller falls back to the raw bytes.

use serde::Serialize;

use crate::proto::{WireReader, WireType};

// ── Port numbers ──────────────────────────────────────────────────────────────

pub const PORT_TEXT_MESSAGE: u32 = 1;
pub const PORT_POSITION: u32 = 3;
pub const PORT_NODEINFO: u32 = 4;
pub const PORT_ROUTING: u32 = 5;
pub const PORT_ADMIN: u32 = 6;
pub const PORT_TELEMETRY: u32 = 67;
pub const PORT_TRACEROUTE: u32 = 70;
pub const PORT_NEIGHBORINFO: u32 = 71;
pub const PORT_MAP_REPORT: u32 = 73;

/// Sentinel for "no port could be determined".
pub const PORT_UNKNOWN: u32 = u32::MAX;

/// Display name for a port — the enumerator name without its `_APP`
/// suffix. Ports outside the known set render as `UNKNOWN`.
pub fn port_name(portnum: u32) -> &'static str {
    match portnum {
        1 => "TEXT_MESSAGE",
        2 => "REMOTE_HARDWARE",
        3 => "POSITION",
        4 => "NODEINFO",
        5 => "ROUTING",
        6 => "ADMIN",
        7 => "TEXT_MESSAGE_COMPRESSED",
        8 => "WAYPOINT",
        9 => "AUDIO",
        10 => "DETECTION_SENSOR",
        32 => "REPLY",
        33 => "IP_TUNNEL",
        34 => "PAXCOUNTER",
        64 => "SERIAL",
        65 => "STORE_FORWARD",
        66 => "RANGE_TEST",
        67 => "TELEMETRY",
        68 => "ZPS",
        69 => "SIMULATOR",
        70 => "TRACEROUTE",
        71 => "NEIGHBORINFO",
        72 => "ATAK_PLUGIN",
        73 => "MAP_REPORT",
        74 => "POWERSTRESS",
        256 => "PRIVATE",
        257 => "ATAK_FORWARDER",
        _ => "UNKNOWN",
    }
}

// ── Decoded payloads ──────────────────────────────────────────────────────────

/// The typed payload carried inside a `Data`, one variant per decoded
/// port. Serializes as the bare inner value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PortPayload {
    Text(String),
    Position(Position),
    NodeInfo(NodeInfo),
    Routing(Routing),
    Admin(AdminMessage),
    Telemetry(Telemetry),
    Traceroute(RouteDiscovery),
    NeighborInfo(NeighborInfo),
    MapReport(MapReport),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub latitude_i: i32,
    pub longitude_i: i32,
    /// Degrees, derived from the fixed-point fields (× 10⁻⁷).
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
    pub time: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub id: String,
    pub long_name: String,
    pub short_name: String,
    pub hw_model: u32,
    pub role: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Routing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_request: Option<RouteDiscovery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_reply: Option<RouteDiscovery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDiscovery {
    pub route: Vec<u32>,
    /// SNR per hop in dB, decoded from quarter-dB signed bytes.
    pub snr_towards: Vec<f32>,
    pub route_back: Vec<u32>,
    pub snr_back: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMessage {
    pub variant: u32,
    pub operation: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub time: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_metrics: Option<DeviceMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_metrics: Option<EnvironmentMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetrics {
    pub battery_level: u32,
    pub voltage: f32,
    pub channel_utilization: f32,
    pub air_util_tx: f32,
    pub uptime_seconds: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentMetrics {
    pub temperature: f32,
    pub relative_humidity: f32,
    pub barometric_pressure: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NeighborInfo {
    pub node_id: u32,
    pub last_sent_by_id: u32,
    pub node_broadcast_interval_secs: u32,
    pub neighbors: Vec<Neighbor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Neighbor {
    pub node_id: u32,
    pub snr: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapReport {
    pub long_name: String,
    pub short_name: String,
    pub role: u32,
    pub hw_model: u32,
    pub firmware_version: String,
    pub region: u32,
    pub modem_preset: u32,
    pub has_default_channel: bool,
    pub latitude_i: i32,
    pub longitude_i: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
    pub position_precision: u32,
    pub num_online_local_nodes: u32,
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// Decode the typed payload for a port. Unsupported ports yield no
/// value; so does malformed input on a supported port.
pub fn decode_port_payload(portnum: u32, payload: &[u8]) -> Option<PortPayload> {
    match portnum {
        PORT_TEXT_MESSAGE => Some(PortPayload::Text(
            String::from_utf8_lossy(payload).into_owned(),
        )),
        PORT_POSITION => decode_position(payload).map(PortPayload::Position),
        PORT_NODEINFO => decode_node_info(payload).map(PortPayload::NodeInfo),
        PORT_ROUTING => decode_routing(payload).map(PortPayload::Routing),
        PORT_ADMIN => decode_admin(payload).map(PortPayload::Admin),
        PORT_TELEMETRY => decode_telemetry(payload).map(PortPayload::Telemetry),
        PORT_TRACEROUTE => decode_route_discovery(payload).map(PortPayload::Traceroute),
        PORT_NEIGHBORINFO => decode_neighbor_info(payload).map(PortPayload::NeighborInfo),
        PORT_MAP_REPORT => decode_map_report(payload).map(PortPayload::MapReport),
        _ => None,
    }
}

// ── Per-port decoders ─────────────────────────────────────────────────────────

fn decode_position(payload: &[u8]) -> Option<Position> {
    let mut r = WireReader::new(payload);
    let mut pos = Position::default();
    while let Some(tag) = r.read_tag() {
        let (field, wire) = tag.ok()?;
        match (field, wire) {
            (1, WireType::Fixed32) => pos.latitude_i = r.read_fixed32().ok()? as i32,
            (2, WireType::Fixed32) => pos.longitude_i = r.read_fixed32().ok()? as i32,
            (3, WireType::Varint) => pos.altitude = r.read_varint32().ok()? as i32,
            (4, WireType::Varint) => pos.time = r.read_varint32().ok()?,
            (4, WireType::Fixed32) => pos.time = r.read_fixed32().ok()?,
            (_, wire) => r.skip(wire).ok()?,
        }
    }
    pos.latitude = f64::from(pos.latitude_i) / 1e7;
    pos.longitude = f64::from(pos.longitude_i) / 1e7;
    Some(pos)
}

fn decode_node_info(payload: &[u8]) -> Option<NodeInfo> {
    let mut r = WireReader::new(payload);
    let mut info = NodeInfo::default();
    while let Some(tag) = r.read_tag() {
        let (field, wire) = tag.ok()?;
        match (field, wire) {
            (1, WireType::LengthDelimited) => info.id = r.read_string().ok()?,
            (2, WireType::LengthDelimited) => info.long_name = r.read_string().ok()?,
            (3, WireType::LengthDelimited) => info.short_name = r.read_string().ok()?,
            (5, WireType::Varint) => info.hw_model = r.read_varint32().ok()?,
            (7, WireType::Varint) => info.role = r.read_varint32().ok()?,
            (_, wire) => r.skip(wire).ok()?,
        }
    }
    Some(info)
}

fn decode_routing(payload: &[u8]) -> Option<Routing> {
    let mut r = WireReader::new(payload);
    let mut routing = Routing::default();
    while let Some(tag) = r.read_tag() {
        let (field, wire) = tag.ok()?;
        match (field, wire) {
            (1, WireType::LengthDelimited) => {
                routing.route_request = decode_route_discovery(r.read_bytes().ok()?);
            }
            (2, WireType::LengthDelimited) => {
                routing.route_reply = decode_route_discovery(r.read_bytes().ok()?);
            }
            (3, WireType::Varint) => routing.error_reason = Some(r.read_varint32().ok()?),
            (_, wire) => r.skip(wire).ok()?,
        }
    }
    Some(routing)
}

fn decode_route_discovery(payload: &[u8]) -> Option<RouteDiscovery> {
    let mut r = WireReader::new(payload);
    let mut rd = RouteDiscovery::default();
    while let Some(tag) = r.read_tag() {
        let (field, wire) = tag.ok()?;
        match (field, wire) {
            (1, WireType::Fixed32) => rd.route.push(r.read_fixed32().ok()?),
            (1, WireType::LengthDelimited) => {
                append_packed_fixed32(r.read_bytes().ok()?, &mut rd.route)?;
            }
            (2, WireType::Varint) => rd.snr_towards.push(snr_db(r.read_varint64().ok()?)),
            (2, WireType::LengthDelimited) => {
                append_snr_block(r.read_bytes().ok()?, &mut rd.snr_towards);
            }
            (3, WireType::Fixed32) => rd.route_back.push(r.read_fixed32().ok()?),
            (3, WireType::LengthDelimited) => {
                append_packed_fixed32(r.read_bytes().ok()?, &mut rd.route_back)?;
            }
            (4, WireType::Varint) => rd.snr_back.push(snr_db(r.read_varint64().ok()?)),
            (4, WireType::LengthDelimited) => {
                append_snr_block(r.read_bytes().ok()?, &mut rd.snr_back);
            }
            (_, wire) => r.skip(wire).ok()?,
        }
    }
    Some(rd)
}

/// Quarter-dB signed 8-bit value → dB. The varint may carry the byte
/// directly or a sign-extended wider integer; the low byte is
/// authoritative either way.
fn snr_db(raw: u64) -> f32 {
    f32::from(raw as u8 as i8) / 4.0
}

fn append_packed_fixed32(block: &[u8], out: &mut Vec<u32>) -> Option<()> {
    if block.len() % 4 != 0 {
        return None;
    }
    for chunk in block.chunks_exact(4) {
        out.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Some(())
}

/// SNR blocks arrive either as packed varints or as raw signed bytes.
/// Try varints first; a block that does not terminate as varints is
/// reinterpreted as raw bytes.
fn append_snr_block(block: &[u8], out: &mut Vec<f32>) {
    let mut r = WireReader::new(block);
    let mut values = Vec::new();
    while !r.is_empty() {
        match r.read_varint64() {
            Ok(v) => values.push(snr_db(v)),
            Err(_) => {
                out.extend(block.iter().map(|&b| f32::from(b as i8) / 4.0));
                return;
            }
        }
    }
    out.extend(values);
}

fn decode_admin(payload: &[u8]) -> Option<AdminMessage> {
    let mut r = WireReader::new(payload);
    while let Some(tag) = r.read_tag() {
        let (field, wire) = tag.ok()?;
        let operation = admin_operation(field);
        if operation != "unknown" {
            return Some(AdminMessage {
                variant: field,
                operation,
            });
        }
        r.skip(wire).ok()?;
    }
    None
}

fn admin_operation(field: u32) -> &'static str {
    match field {
        1 => "get_channel_request",
        2 => "get_channel_response",
        3 => "get_owner_request",
        4 => "get_owner_response",
        5 => "get_config_request",
        6 => "get_config_response",
        7 => "get_module_config_request",
        8 => "get_module_config_response",
        32 => "set_owner",
        33 => "set_channel",
        34 => "set_config",
        35 => "set_module_config",
        64 => "begin_edit_settings",
        65 => "commit_edit_settings",
        95 => "reboot_ota_seconds",
        97 => "reboot_seconds",
        98 => "shutdown_seconds",
        99 => "factory_reset",
        100 => "nodedb_reset",
        _ => "unknown",
    }
}

fn decode_telemetry(payload: &[u8]) -> Option<Telemetry> {
    let mut r = WireReader::new(payload);
    let mut telemetry = Telemetry::default();
    while let Some(tag) = r.read_tag() {
        let (field, wire) = tag.ok()?;
        match (field, wire) {
            (1, WireType::Fixed32) => telemetry.time = r.read_fixed32().ok()?,
            (1, WireType::Varint) => telemetry.time = r.read_varint32().ok()?,
            (2, WireType::LengthDelimited) => {
                telemetry.device_metrics = decode_device_metrics(r.read_bytes().ok()?);
            }
            (3, WireType::LengthDelimited) => {
                telemetry.environment_metrics = decode_environment_metrics(r.read_bytes().ok()?);
            }
            (_, wire) => r.skip(wire).ok()?,
        }
    }
    Some(telemetry)
}

fn decode_device_metrics(payload: &[u8]) -> Option<DeviceMetrics> {
    let mut r = WireReader::new(payload);
    let mut metrics = DeviceMetrics::default();
    while let Some(tag) = r.read_tag() {
        let (field, wire) = tag.ok()?;
        match (field, wire) {
            (1, WireType::Varint) => metrics.battery_level = r.read_varint32().ok()?,
            (2, WireType::Fixed32) => metrics.voltage = r.read_float().ok()?,
            (3, WireType::Fixed32) => metrics.channel_utilization = r.read_float().ok()?,
            (4, WireType::Fixed32) => metrics.air_util_tx = r.read_float().ok()?,
            (5, WireType::Varint) => metrics.uptime_seconds = r.read_varint32().ok()?,
            (_, wire) => r.skip(wire).ok()?,
        }
    }
    Some(metrics)
}

fn decode_environment_metrics(payload: &[u8]) -> Option<EnvironmentMetrics> {
    let mut r = WireReader::new(payload);
    let mut metrics = EnvironmentMetrics::default();
    while let Some(tag) = r.read_tag() {
        let (field, wire) = tag.ok()?;
        match (field, wire) {
            (1, WireType::Fixed32) => metrics.temperature = r.read_float().ok()?,
            (2, WireType::Fixed32) => metrics.relative_humidity = r.read_float().ok()?,
            (3, WireType::Fixed32) => metrics.barometric_pressure = r.read_float().ok()?,
            (_, wire) => r.skip(wire).ok()?,
        }
    }
    Some(metrics)
}

fn decode_neighbor_info(payload: &[u8]) -> Option<NeighborInfo> {
    let mut r = WireReader::new(payload);
    let mut info = NeighborInfo::default();
    while let Some(tag) = r.read_tag() {
        let (field, wire) = tag.ok()?;
        match (field, wire) {
            (1, WireType::Varint) => info.node_id = r.read_varint32().ok()?,
            (2, WireType::Varint) => info.last_sent_by_id = r.read_varint32().ok()?,
            (3, WireType::Varint) => {
                info.node_broadcast_interval_secs = r.read_varint32().ok()?;
            }
            (4, WireType::LengthDelimited) => {
                info.neighbors.push(decode_neighbor(r.read_bytes().ok()?)?);
            }
            (_, wire) => r.skip(wire).ok()?,
        }
    }
    Some(info)
}

fn decode_neighbor(payload: &[u8]) -> Option<Neighbor> {
    let mut r = WireReader::new(payload);
    let mut neighbor = Neighbor::default();
    while let Some(tag) = r.read_tag() {
        let (field, wire) = tag.ok()?;
        match (field, wire) {
            (1, WireType::Varint) => neighbor.node_id = r.read_varint32().ok()?,
            (2, WireType::Fixed32) => neighbor.snr = r.read_float().ok()?,
            (_, wire) => r.skip(wire).ok()?,
        }
    }
    Some(neighbor)
}

fn decode_map_report(payload: &[u8]) -> Option<MapReport> {
    let mut r = WireReader::new(payload);
    let mut report = MapReport::default();
    while let Some(tag) = r.read_tag() {
        let (field, wire) = tag.ok()?;
        match (field, wire) {
            (1, WireType::LengthDelimited) => report.long_name = r.read_string().ok()?,
            (2, WireType::LengthDelimited) => report.short_name = r.read_string().ok()?,
            (3, WireType::Varint) => report.role = r.read_varint32().ok()?,
            (4, WireType::Varint) => report.hw_model = r.read_varint32().ok()?,
            (5, WireType::LengthDelimited) => report.firmware_version = r.read_string().ok()?,
            (6, WireType::Varint) => report.region = r.read_varint32().ok()?,
            (7, WireType::Varint) => report.modem_preset = r.read_varint32().ok()?,
            (8, WireType::Varint) => {
                report.has_default_channel = r.read_varint64().ok()? != 0;
            }
            (9, WireType::Fixed32) => report.latitude_i = r.read_fixed32().ok()? as i32,
            (10, WireType::Fixed32) => report.longitude_i = r.read_fixed32().ok()? as i32,
            (11, WireType::Varint) => report.altitude = r.read_varint32().ok()? as i32,
            (12, WireType::Varint) => report.position_precision = r.read_varint32().ok()?,
            (13, WireType::Varint) => {
                report.num_online_local_nodes = r.read_varint32().ok()?;
            }
            (_, wire) => r.skip(wire).ok()?,
        }
    }
    report.latitude = f64::from(report.latitude_i) / 1e7;
    report.longitude = f64::from(report.longitude_i) / 1e7;
    Some(report)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
