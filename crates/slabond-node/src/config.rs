//! Node configuration loading and management.

use serde::{Deserialize, Serialize};
use std::path::Path;

use slabond_core::EngineConfig;
use slabond_crypto::KeyPair;
use slabond_engine::MonitorConfig;
use slabond_ledger::RetryPolicy;

/// Full configuration for the SLABond node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    /// Lifecycle engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Ledger submission retry policy.
    #[serde(default)]
    pub dispatcher: RetryPolicy,

    /// SLA sweep settings.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// The node's own time authority.
    #[serde(default)]
    pub time_authority: TimeAuthorityConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeAuthorityConfig {
    /// Hex-encoded 32-byte Ed25519 seed. An ephemeral key is generated when absent.
    #[serde(default)]
    pub seed_hex: Option<String>,
    /// Certificate presented with every stamp.
    #[serde(default = "default_certificate")]
    pub certificate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_certificate() -> String {
    "slabond-node-authority".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for TimeAuthorityConfig {
    fn default() -> Self {
        Self {
            seed_hex: None,
            certificate: default_certificate(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl TimeAuthorityConfig {
    /// The configured key pair, or a fresh one.
    pub fn keypair(&self) -> anyhow::Result<KeyPair> {
        match &self.seed_hex {
            Some(seed) => Ok(KeyPair::from_seed_hex(seed)?),
            None => {
                tracing::info!("generating ephemeral time-authority key");
                Ok(KeyPair::generate())
            }
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl NodeConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }
}
