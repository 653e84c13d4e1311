//! Endpoint configuration

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::types::{TrackKind, TrackVariant};

/// Endpoint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub connection: ConnectionConfig,
    pub bitrates: BitrateConfig,
    pub data_channels: DataChannelConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    #[default]
    All,
    Relay,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundlePolicy {
    Balanced,
    MaxCompat,
    #[default]
    MaxBundle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Static STUN/TURN URLs, merged with the servers proposed in `offerData`
    pub ice_servers: Vec<String>,
    pub ice_transport_policy: IceTransportPolicy,
    pub bundle_policy: BundlePolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            ice_transport_policy: IceTransportPolicy::All,
            bundle_policy: BundlePolicy::MaxBundle,
        }
    }
}

/// Bitrates (bps) reported for tracks without an explicit limit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BitrateConfig {
    pub audio: u64,
    pub video: u64,
    pub simulcast: BTreeMap<TrackVariant, u64>,
}

impl Default for BitrateConfig {
    fn default() -> Self {
        Self {
            audio: 50_000,
            video: 2_500_000,
            simulcast: BTreeMap::from([
                (TrackVariant::Low, 150_000),
                (TrackVariant::Medium, 500_000),
                (TrackVariant::High, 2_500_000),
            ]),
        }
    }
}

impl BitrateConfig {
    #[must_use]
    pub const fn for_kind(&self, kind: TrackKind) -> u64 {
        match kind {
            TrackKind::Audio => self.audio,
            TrackKind::Video => self.video,
        }
    }

    #[must_use]
    pub fn for_variant(&self, variant: TrackVariant) -> u64 {
        self.simulcast.get(&variant).copied().unwrap_or(self.video)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataChannelConfig {
    pub reliable_label: String,
    pub lossy_label: String,
}

impl Default for DataChannelConfig {
    fn default() -> Self {
        Self {
            reliable_label: "reliable".to_string(),
            lossy_label: "lossy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json`, `pretty` or `compact`
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl EndpointConfig {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // SFU_ENDPOINT_LOGGING__LEVEL, SFU_ENDPOINT_CONNECTION__ICE_TRANSPORT_POLICY, ...
        builder = builder.add_source(
            Environment::with_prefix("SFU_ENDPOINT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }
}
