//! Configuration system for Tether.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TETHER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tether/config.toml
//!   3. ~/.config/tether/config.toml

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::address::Namespace;
use crate::codec::DEFAULT_CHUNK_SIZE;
use crate::policy::TransferPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub protocol: ProtocolConfig,
    pub transport: TransportConfig,
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
}

/// Settings both ends must agree on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Topic prefix for every file message.
    pub prefix: String,
    /// Top-level folder whose files are always sent raw.
    pub verbatim_subtree: String,
    pub chunk_size_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    /// In-process bus; only useful when sender and receiver share a process.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Address the receiver listens on.
    pub listen: String,
    /// Address the sender dials.
    pub connect: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMode {
    /// Each wait owns a one-shot slot keyed by address. Reordered acks are kept.
    Correlated,
    /// Single shared queue; non-matching acks are discarded while waiting.
    Fifo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    pub source_root: PathBuf,
    /// Top-level folders under `source_root` to walk.
    pub folders: Vec<String>,
    /// Relative paths sent with the chunked policy.
    pub chunked_paths: Vec<String>,
    /// Per-attempt ack wait. 0 = wait forever.
    pub ack_timeout_secs: u64,
    /// Total publish attempts per message, including the first.
    pub max_attempts: u32,
    pub ack_mode: AckMode,
    /// Pause after connecting before the first publish.
    pub connect_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub destination_root: PathBuf,
    /// argv of the downstream pipeline launched on completion. Empty = log only.
    pub on_complete: Vec<String>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            prefix: "workdir".to_string(),
            verbatim_subtree: "splitted".to_string(),
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Tcp,
            listen: "0.0.0.0:7447".to_string(),
            connect: "127.0.0.1:7447".to_string(),
        }
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            source_root: data_dir().join("outbox"),
            folders: vec![
                "splitted".to_string(),
                "quadrilaterals".to_string(),
                "tracking".to_string(),
            ],
            chunked_paths: vec![
                "quadrilaterals/quadrilaterals.pkl".to_string(),
                "tracking/tracks.csv".to_string(),
            ],
            ack_timeout_secs: 30,
            max_attempts: 3,
            ack_mode: AckMode::Correlated,
            connect_grace_ms: 500,
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            destination_root: data_dir().join("inbox"),
            on_complete: Vec::new(),
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl ProtocolConfig {
    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.prefix.clone(), self.verbatim_subtree.clone())
    }

    pub fn chunk_size(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.chunk_size_bytes)
            .ok_or_else(|| ConfigError::Invalid("protocol.chunk_size_bytes must be > 0".into()))
    }
}

impl SenderConfig {
    /// None means wait forever.
    pub fn ack_timeout(&self) -> Option<Duration> {
        match self.ack_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn policy(&self, protocol: &ProtocolConfig) -> TransferPolicy {
        TransferPolicy::new(
            protocol.verbatim_subtree.clone(),
            self.chunked_paths.iter().cloned(),
        )
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tether")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("tether")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TetherConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            TetherConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TETHER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config to `path` if nothing is there. Returns the path.
    pub fn write_default_if_missing(path: &Path) -> Result<PathBuf, ConfigError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
            }
            let text = toml::to_string_pretty(&TetherConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(path, text)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        Ok(path.to_path_buf())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = &self.protocol.prefix;
        if prefix.is_empty() || prefix.starts_with('/') || prefix.ends_with('/') {
            return Err(ConfigError::Invalid(format!(
                "protocol.prefix {prefix:?} must be non-empty without leading or trailing '/'"
            )));
        }
        if prefix.contains('*') {
            return Err(ConfigError::Invalid(format!(
                "protocol.prefix {prefix:?} must not contain wildcards"
            )));
        }
        if self.protocol.verbatim_subtree.is_empty() {
            return Err(ConfigError::Invalid(
                "protocol.verbatim_subtree must be non-empty".into(),
            ));
        }
        self.protocol.chunk_size()?;
        if self.sender.max_attempts == 0 {
            return Err(ConfigError::Invalid("sender.max_attempts must be >= 1".into()));
        }
        Ok(())
    }

    /// Apply TETHER_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, keyed by TETHER_* variable name.
    /// Values that do not parse are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TETHER_PROTOCOL__PREFIX") {
            self.protocol.prefix = v;
        }
        if let Some(v) = lookup("TETHER_TRANSPORT__LISTEN") {
            self.transport.listen = v;
        }
        if let Some(v) = lookup("TETHER_TRANSPORT__CONNECT") {
            self.transport.connect = v;
        }
        if let Some(v) = lookup("TETHER_SENDER__SOURCE_ROOT") {
            self.sender.source_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("TETHER_SENDER__ACK_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.sender.ack_timeout_secs = secs;
            }
        }
        if let Some(v) = lookup("TETHER_RECEIVER__DESTINATION_ROOT") {
            self.receiver.destination_root = PathBuf::from(v);
        }
    }
}
