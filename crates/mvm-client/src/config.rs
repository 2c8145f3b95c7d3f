//! Client configuration loading.
//!
//! TOML is the sole config source. Only `mud_name` and a token (inline or
//! via `token_file`) are required; everything else has conservative
//! defaults matching the gateway's published limits.
//!
//! # Token file format
//! Raw token string on a single line; trimmed on read.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use mvm_protocol::validate;

use crate::rate::RateCaps;

// ---------------------------------------------------------------------------
// Validated config types
// ---------------------------------------------------------------------------

/// Top-level client configuration.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// This MUD's name; must be unique on the mesh.
    pub mud_name: String,
    pub admin_email: String,
    /// The bearer token (resolved from the token file when one is given).
    pub token: String,
    pub gateway: GatewayConfig,
    pub timing: TimingConfig,
    pub limits: LimitConfig,
    pub levels: LevelGates,
    pub features: FeatureToggles,
    pub policy: PolicyConfig,
    /// Channels pre-created at startup for hosts that auto-join players.
    pub auto_join: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TimingConfig {
    pub reconnect_delay: Duration,
    pub max_reconnects: u32,
    pub ping_interval: Duration,
    pub connect_timeout: Duration,
    pub retry_backoff: u32,
    pub max_retry_delay: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct LimitConfig {
    /// Hard cap 4096.
    pub max_message_len: usize,
    /// Frame payload cap.
    pub buffer_size: usize,
    pub history_size: usize,
    pub channel_history: usize,
    pub rate: RateCaps,
}

/// Minimum local level per command family.
#[derive(Debug, Clone, Copy)]
pub struct LevelGates {
    pub tell: u32,
    pub channel: u32,
    pub who: u32,
    pub finger: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureToggles {
    pub tell: bool,
    pub channel: bool,
    pub who: bool,
    pub finger: bool,
    pub locate: bool,
    pub emote: bool,
    /// Reserved; no behaviour behind them yet.
    pub mail: bool,
    pub file: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PolicyConfig {
    pub filter_profanity: bool,
    pub log_all_messages: bool,
    pub enable_color: bool,
}

impl MeshConfig {
    /// A config with every default, for embedding and tests.
    pub fn new(mud_name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            mud_name: mud_name.into(),
            admin_email: String::new(),
            token: token.into(),
            gateway: GatewayConfig {
                host: "mesh.mudvault.org".to_owned(),
                port: 8081,
                path: "/".to_owned(),
            },
            timing: TimingConfig {
                reconnect_delay: Duration::from_secs(30),
                max_reconnects: 10,
                ping_interval: Duration::from_secs(60),
                connect_timeout: Duration::from_secs(30),
                retry_backoff: 2,
                max_retry_delay: Duration::from_secs(300),
            },
            limits: LimitConfig {
                max_message_len: 4096,
                buffer_size: 8192,
                history_size: 100,
                channel_history: 50,
                rate: RateCaps::default(),
            },
            levels: LevelGates {
                tell: 1,
                channel: 1,
                who: 1,
                finger: 5,
            },
            features: FeatureToggles {
                tell: true,
                channel: true,
                who: true,
                finger: true,
                locate: true,
                emote: true,
                mail: false,
                file: false,
            },
            policy: PolicyConfig {
                filter_profanity: false,
                log_all_messages: false,
                enable_color: true,
            },
            auto_join: vec!["gossip".to_owned(), "newbie".to_owned(), "ooc".to_owned()],
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    mud_name: Option<String>,
    admin_email: Option<String>,
    gateway: Option<RawGateway>,
    auth: Option<RawAuth>,
    timing: Option<RawTiming>,
    limits: Option<RawLimits>,
    levels: Option<RawLevels>,
    features: Option<RawFeatures>,
    policy: Option<RawPolicy>,
    auto_join: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawGateway {
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAuth {
    token: Option<String>,
    token_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTiming {
    reconnect_delay_secs: Option<u64>,
    max_reconnects: Option<u32>,
    ping_interval_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    retry_backoff: Option<u32>,
    max_retry_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawLimits {
    max_message_len: Option<usize>,
    buffer_size: Option<usize>,
    history_size: Option<usize>,
    channel_history: Option<usize>,
    tells_per_minute: Option<u32>,
    channels_per_minute: Option<u32>,
    who_per_minute: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawLevels {
    tell: Option<u32>,
    channel: Option<u32>,
    who: Option<u32>,
    finger: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawFeatures {
    tell: Option<bool>,
    channel: Option<bool>,
    who: Option<bool>,
    finger: Option<bool>,
    locate: Option<bool>,
    emote: Option<bool>,
    mail: Option<bool>,
    file: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawPolicy {
    filter_profanity: Option<bool>,
    log_all_messages: Option<bool>,
    enable_color: Option<bool>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load and validate a config file.
pub fn load_config_from_path(path: &Path) -> Result<MeshConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load and validate config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<MeshConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let mud_name = raw
        .mud_name
        .ok_or_else(|| ConfigError::MissingField("mud_name".to_owned()))?;
    if !validate::mud_name(&mud_name) {
        return Err(ConfigError::InvalidValue(format!(
            "mud_name '{mud_name}' must be 1-32 alphanumeric/_/- characters"
        )));
    }

    let auth = raw
        .auth
        .ok_or_else(|| ConfigError::MissingField("auth".to_owned()))?;
    let token = match (auth.token, auth.token_file) {
        (_, Some(file)) => read_token_file(&file)?,
        (Some(token), None) => token,
        (None, None) => {
            return Err(ConfigError::MissingField(
                "auth.token or auth.token_file".to_owned(),
            ));
        }
    };
    if token.is_empty() {
        return Err(ConfigError::InvalidValue("auth token is empty".to_owned()));
    }

    let mut cfg = MeshConfig::new(mud_name, token);
    cfg.admin_email = raw.admin_email.unwrap_or_default();

    if let Some(gateway) = raw.gateway {
        if let Some(host) = gateway.host {
            cfg.gateway.host = host;
        }
        if let Some(port) = gateway.port {
            cfg.gateway.port = port;
        }
        if let Some(path) = gateway.path {
            cfg.gateway.path = path;
        }
    }

    if let Some(timing) = raw.timing {
        if let Some(secs) = timing.reconnect_delay_secs {
            cfg.timing.reconnect_delay = Duration::from_secs(secs);
        }
        if let Some(max) = timing.max_reconnects {
            cfg.timing.max_reconnects = max;
        }
        if let Some(secs) = timing.ping_interval_secs {
            if secs < 30 {
                return Err(ConfigError::InvalidValue(format!(
                    "timing.ping_interval_secs must be at least 30, got {secs}"
                )));
            }
            cfg.timing.ping_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = timing.connect_timeout_secs {
            cfg.timing.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(backoff) = timing.retry_backoff {
            if backoff < 1 {
                return Err(ConfigError::InvalidValue(
                    "timing.retry_backoff must be at least 1".to_owned(),
                ));
            }
            cfg.timing.retry_backoff = backoff;
        }
        if let Some(secs) = timing.max_retry_delay_secs {
            cfg.timing.max_retry_delay = Duration::from_secs(secs);
        }
    }

    if let Some(limits) = raw.limits {
        if let Some(len) = limits.max_message_len {
            if len > 4096 {
                return Err(ConfigError::InvalidValue(format!(
                    "limits.max_message_len cannot exceed 4096, got {len}"
                )));
            }
            cfg.limits.max_message_len = len;
        }
        if let Some(size) = limits.buffer_size {
            cfg.limits.buffer_size = size;
        }
        if let Some(size) = limits.history_size {
            cfg.limits.history_size = size;
        }
        if let Some(size) = limits.channel_history {
            cfg.limits.channel_history = size;
        }
        if let Some(cap) = limits.tells_per_minute {
            cfg.limits.rate.tells = cap;
        }
        if let Some(cap) = limits.channels_per_minute {
            cfg.limits.rate.channels = cap;
        }
        if let Some(cap) = limits.who_per_minute {
            cfg.limits.rate.who = cap;
        }
    }

    if let Some(levels) = raw.levels {
        if let Some(level) = levels.tell {
            cfg.levels.tell = level;
        }
        if let Some(level) = levels.channel {
            cfg.levels.channel = level;
        }
        if let Some(level) = levels.who {
            cfg.levels.who = level;
        }
        if let Some(level) = levels.finger {
            cfg.levels.finger = level;
        }
    }

    if let Some(features) = raw.features {
        if let Some(on) = features.tell {
            cfg.features.tell = on;
        }
        if let Some(on) = features.channel {
            cfg.features.channel = on;
        }
        if let Some(on) = features.who {
            cfg.features.who = on;
        }
        if let Some(on) = features.finger {
            cfg.features.finger = on;
        }
        if let Some(on) = features.locate {
            cfg.features.locate = on;
        }
        if let Some(on) = features.emote {
            cfg.features.emote = on;
        }
        if let Some(on) = features.mail {
            cfg.features.mail = on;
        }
        if let Some(on) = features.file {
            cfg.features.file = on;
        }
    }

    if let Some(policy) = raw.policy {
        if let Some(on) = policy.filter_profanity {
            cfg.policy.filter_profanity = on;
        }
        if let Some(on) = policy.log_all_messages {
            cfg.policy.log_all_messages = on;
        }
        if let Some(on) = policy.enable_color {
            cfg.policy.enable_color = on;
        }
    }

    if let Some(auto_join) = raw.auto_join {
        for name in &auto_join {
            if !validate::channel_name(name) {
                return Err(ConfigError::InvalidValue(format!(
                    "auto_join channel '{name}' is not a valid channel name"
                )));
            }
        }
        cfg.auto_join = auto_join;
    }

    Ok(cfg)
}

fn read_token_file(path: &str) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading token file '{path}': {e}")))?;
    Ok(content.trim().to_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
