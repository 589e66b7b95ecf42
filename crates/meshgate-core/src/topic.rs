//! Topic parsing and construction.
//!
//! Canonical topics look like `<root>/<region>/2/<path>/<channel>/<gateway>`
//! where `<path>` is `e` (encrypted binary), `c` (control binary), or
//! `json`. Extra root segments may precede the `2` marker; parsing
//! locates the literal `2` and takes the three segments after it.

/// The path/channel/gateway triple recovered from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    pub path: String,
    pub channel: String,
    pub gateway: String,
}

/// Parse a topic. Non-canonical topics (no `2` marker, or too few
/// segments after it) come back with `path = "unknown"` and the channel
/// and gateway guessed from the last two segments.
pub fn parse_topic(topic: &str) -> TopicInfo {
    let segments: Vec<&str> = topic.split('/').collect();
    if let Some(marker) = segments.iter().position(|s| *s == "2") {
        if segments.len() >= marker + 4 {
            return TopicInfo {
                path: segments[marker + 1].to_string(),
                channel: segments[marker + 2].to_string(),
                gateway: segments[marker + 3].to_string(),
            };
        }
    }
    let n = segments.len();
    TopicInfo {
        path: "unknown".to_string(),
        channel: if n >= 2 { segments[n - 2].to_string() } else { String::new() },
        gateway: segments.last().map(|s| s.to_string()).unwrap_or_default(),
    }
}

/// Build a publish topic from its components. `path` carries its own
/// protocol marker (e.g. `2/e` or `2/json`).
pub fn build_topic(root: &str, region: &str, path: &str, channel: &str, gateway: &str) -> String {
    format!("{root}/{region}/{path}/{channel}/{gateway}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
