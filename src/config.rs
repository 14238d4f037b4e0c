//! Protocol configuration file handling
//!
//! Every protocol constant is fixed when the core is constructed. Settings are
//! read from a TOML file with a `[protocol]` and a `[logging]` section.
//!
//! ```toml
//! [protocol]
//! global_state_tree_depth = 16
//! epoch_length = "15m"   # or a plain number of seconds
//! ```

use crate::logging::LoggingConfig;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Deepest tree the SMT engine supports.
pub const MAX_TREE_DEPTH: u8 = 128;

/// GST and user state tree leaf indices are `u64`.
pub const MAX_STATE_TREE_DEPTH: u8 = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Constants fixed at initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub global_state_tree_depth: u8,
    pub user_state_tree_depth: u8,
    pub epoch_tree_depth: u8,
    pub max_users: u64,
    pub num_epoch_key_nonce_per_epoch: u64,
    pub max_attestations_per_epoch_key: u64,
    /// Seconds. Accepts an integer or a humantime string ("15m", "1 day").
    #[serde(deserialize_with = "deserialize_secs")]
    pub epoch_length: u64,
    pub attesting_fee: u64,
    pub transition_compensation_per_key: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            global_state_tree_depth: 16,
            user_state_tree_depth: 16,
            epoch_tree_depth: 64,
            max_users: (1 << 16) - 1,
            num_epoch_key_nonce_per_epoch: 3,
            max_attestations_per_epoch_key: 10,
            epoch_length: 15 * 60,
            attesting_fee: 0,
            transition_compensation_per_key: 0,
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_depth(
            "global_state_tree_depth",
            self.global_state_tree_depth,
            MAX_STATE_TREE_DEPTH,
        )?;
        check_depth(
            "user_state_tree_depth",
            self.user_state_tree_depth,
            MAX_STATE_TREE_DEPTH,
        )?;
        check_depth("epoch_tree_depth", self.epoch_tree_depth, MAX_TREE_DEPTH)?;

        if self.max_users == 0 {
            return Err(invalid("max_users must be at least 1"));
        }
        // depth 64 admits every u64
        if self.global_state_tree_depth < 64 && self.max_users > 1u64 << self.global_state_tree_depth
        {
            return Err(ConfigError::Invalid(format!(
                "max_users {} exceeds the {} leaves of a depth {} global state tree",
                self.max_users,
                1u64 << self.global_state_tree_depth,
                self.global_state_tree_depth
            )));
        }
        if self.num_epoch_key_nonce_per_epoch == 0 {
            return Err(invalid("num_epoch_key_nonce_per_epoch must be at least 1"));
        }
        if self.max_attestations_per_epoch_key == 0 {
            return Err(invalid("max_attestations_per_epoch_key must be at least 1"));
        }
        if self.epoch_length == 0 {
            return Err(invalid("epoch_length must be at least 1 second"));
        }
        self.num_attestations_per_epoch()?;
        usize::try_from(self.num_epoch_key_nonce_per_epoch)
            .map_err(|_| invalid("num_epoch_key_nonce_per_epoch does not fit in memory"))?;
        Ok(())
    }

    /// `num_epoch_key_nonce_per_epoch × max_attestations_per_epoch_key`
    pub fn num_attestations_per_epoch(&self) -> Result<usize, ConfigError> {
        self.num_epoch_key_nonce_per_epoch
            .checked_mul(self.max_attestations_per_epoch_key)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| invalid("attestation nullifier count overflows"))
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

fn check_depth(name: &str, depth: u8, max: u8) -> Result<(), ConfigError> {
    if depth == 0 || depth > max {
        return Err(ConfigError::Invalid(format!(
            "{name} must be within 1..={max}, got {depth}"
        )));
    }
    Ok(())
}

/// Parse a human-readable duration to seconds ("90", "15m", "1 day").
pub fn parse_duration_secs(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(secs);
    }
    humantime::parse_duration(trimmed)
        .map(|d| d.as_secs())
        .map_err(|e| format!("Invalid duration '{}': {}", input, e))
}

fn deserialize_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Secs {
        Number(u64),
        Text(String),
    }

    match Secs::deserialize(deserializer)? {
        Secs::Number(secs) => Ok(secs),
        Secs::Text(text) => parse_duration_secs(&text).map_err(serde::de::Error::custom),
    }
}

/// Full settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load and validate settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.protocol.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default configuration content as a string with comments
    pub fn generate_default_toml() -> String {
        r#"# epochrep protocol configuration
#
# Protocol constants are fixed when the core starts. Changing them for a
# running deployment invalidates existing proofs and snapshots.

[protocol]
# Tree depths (GST and user state tree: 1..=64, epoch tree: 1..=128)
global_state_tree_depth = 16
user_state_tree_depth = 16
epoch_tree_depth = 64

# Sign-up capacity, at most 2^global_state_tree_depth
max_users = 65535

# Epoch keys per user per epoch
num_epoch_key_nonce_per_epoch = 3

# Attestations accepted per epoch key per epoch
max_attestations_per_epoch_key = 10

# Seconds, or a duration such as "15m" or "1 day"
epoch_length = "15m"

# Exact fee every attestation must carry
attesting_fee = 0

# Credited to the caller per epoch key sealed during a transition
transition_compensation_per_key = 0

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (optional, logs to stderr if not specified)
# file = "/var/log/epochrep/epochrep.log"
"#
        .to_string()
    }

    /// Write the commented default file.
    pub fn create_default(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, Self::generate_default_toml()).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
