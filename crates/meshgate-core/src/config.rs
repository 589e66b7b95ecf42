//! Daemon configuration.
//!
//! One TOML file supplies everything the bridge reads at startup: the
//! broker address and credentials, the topic defaults for outbound
//! publishes, the websocket listen address, and the channel → PSK map
//! that seeds the learned-key cache. MESHGATE_* environment variables
//! override individual fields and always win over the file;
//! `$MESHGATE_CONFIG` points the daemon at an alternate file.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Everything the bridge reads at startup, in one struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshgateConfig {
    pub broker: BrokerConfig,
    pub defaults: DefaultsConfig,
    pub api: ApiConfig,
    /// Channel name → base64 PSK, seeded into the learned-key cache at
    /// startup.
    pub channels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Empty = anonymous.
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Topic root, e.g. "msh".
    pub root: String,
    pub region: String,
    /// Topic path including its protocol marker, e.g. "2/e" or "2/json".
    pub path: String,
    pub channel: String,
    /// Base64 PSK applied when a publish names no key.
    pub key: String,
    /// Node id this gateway publishes as, in display form.
    pub gateway_id: String,
    /// Topic filter subscribed once on first broker connect. Empty =
    /// no seeded subscription.
    pub subscription: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Websocket listen address.
    pub bind: String,
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            root: "msh".to_string(),
            region: "EU_868".to_string(),
            path: "2/e".to_string(),
            channel: "LongFast".to_string(),
            key: "AQ==".to_string(),
            gateway_id: "!00000000".to_string(),
            subscription: "msh/EU_868/2/e/LongFast/#".to_string(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A config problem is fatal — the daemon refuses to start on a file it
/// cannot read or understand, rather than silently bridging the wrong
/// broker with the wrong keys.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot access config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config file {path} is not valid TOML: {source}")]
    Malformed {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("cannot render the default config: {0}")]
    Render(#[from] toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshgateConfig {
    /// Read the config file if there is one, fall back to the built-in
    /// defaults when there is not, then let the environment override
    /// individual fields. Called once, before the bridge starts.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = match std::fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text)
                .map_err(|source| ConfigError::Malformed { path, source })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MeshgateConfig::default(),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Where the config lives. `$MESHGATE_CONFIG` wins outright;
    /// otherwise it is `meshgate/config.toml` under the XDG config home
    /// (falling back to `~/.config`, and `/tmp` for homeless processes).
    pub fn file_path() -> PathBuf {
        if let Ok(explicit) = std::env::var("MESHGATE_CONFIG") {
            return PathBuf::from(explicit);
        }
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| {
                std::env::var("HOME").map(|home| PathBuf::from(home).join(".config"))
            })
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join("meshgate")
            .join("config.toml")
    }

    /// Give operators a file to edit: a fresh install gets the rendered
    /// defaults, an existing file is left untouched. Returns the path
    /// either way so startup logging can point at it.
    pub fn ensure_default_file() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if path.exists() {
            return Ok(path);
        }
        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let rendered = toml::to_string_pretty(&MeshgateConfig::default())?;
        std::fs::write(&path, rendered).map_err(io_err)?;
        Ok(path)
    }

    /// Environment beats file, field by field. Values that do not parse
    /// (a non-numeric port) are ignored rather than fatal.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MESHGATE_BROKER__HOST") {
            self.broker.host = v;
        }
        if let Ok(v) = std::env::var("MESHGATE_BROKER__PORT") {
            if let Ok(p) = v.parse() {
                self.broker.port = p;
            }
        }
        if let Ok(v) = std::env::var("MESHGATE_BROKER__USERNAME") {
            self.broker.username = v;
        }
        if let Ok(v) = std::env::var("MESHGATE_BROKER__PASSWORD") {
            self.broker.password = v;
        }
        if let Ok(v) = std::env::var("MESHGATE_DEFAULTS__ROOT") {
            self.defaults.root = v;
        }
        if let Ok(v) = std::env::var("MESHGATE_DEFAULTS__REGION") {
            self.defaults.region = v;
        }
        if let Ok(v) = std::env::var("MESHGATE_DEFAULTS__CHANNEL") {
            self.defaults.channel = v;
        }
        if let Ok(v) = std::env::var("MESHGATE_DEFAULTS__KEY") {
            self.defaults.key = v;
        }
        if let Ok(v) = std::env::var("MESHGATE_DEFAULTS__GATEWAY_ID") {
            self.defaults.gateway_id = v;
        }
        if let Ok(v) = std::env::var("MESHGATE_DEFAULTS__SUBSCRIPTION") {
            self.defaults.subscription = v;
        }
        if let Ok(v) = std::env::var("MESHGATE_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
