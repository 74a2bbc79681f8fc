/// Configuration loading and validation.
///
/// The file is TOML with three surfaces: a `[metadata]` section describing
/// how to bootstrap the metadata cache, one `[[routing]]` table per routing
/// instance, and `[logging]`. Routing options are validated against the
/// declared bounds at load time; unknown routing options are warnings, not
/// errors.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::routing::destination::{parse_destinations, DestinationSpec};
use crate::routing::AccessMode;
use crate::utils::split_host_port;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_CONNECT_TIMEOUT: u16 = 1;
pub const DEFAULT_MAX_CONNECTIONS: u16 = 100;
pub const DEFAULT_MAX_CONNECT_ERRORS: u32 = 100;
pub const DEFAULT_CLIENT_CONNECT_TIMEOUT: u32 = 9;
pub const DEFAULT_NET_BUFFER_LENGTH: u32 = 16384;
pub const DEFAULT_METADATA_TTL: u64 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub metadata: Option<MetadataConfig>,
    #[serde(default)]
    pub routing: Vec<RoutingConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bootstrap settings for the metadata cache.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    pub cluster_name: String,
    pub bootstrap_servers: Vec<String>,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_metadata_ttl")]
    pub ttl_sec: u64,
    #[serde(default = "default_connect_timeout_u64")]
    pub connect_timeout_sec: u64,
}

impl MetadataConfig {
    /// Seed addresses in configuration order, with the port defaulting to
    /// 3306.
    pub fn seeds(&self) -> Result<Vec<(String, u16)>, ConfigError> {
        self.bootstrap_servers
            .iter()
            .map(|addr| {
                let (host, port) = split_host_port(addr).map_err(|reason| {
                    ConfigError::Invalid(format!(
                        "option bootstrap_servers in [metadata] has an invalid address '{addr}': {reason}"
                    ))
                })?;
                Ok((host, port.unwrap_or(3306)))
            })
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "option cluster_name in [metadata] is required and needs a value".to_string(),
            ));
        }
        if self.bootstrap_servers.is_empty() {
            return Err(ConfigError::Invalid(
                "option bootstrap_servers in [metadata] needs at least one address".to_string(),
            ));
        }
        if self.ttl_sec < 1 {
            return Err(ConfigError::Invalid(
                "option ttl_sec in [metadata] needs a value of at least 1".to_string(),
            ));
        }
        if self.connect_timeout_sec < 1 {
            return Err(ConfigError::Invalid(
                "option connect_timeout_sec in [metadata] needs a value of at least 1".to_string(),
            ));
        }
        self.seeds().map(drop)
    }
}

/// One `[[routing]]` table as written in the file, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub destinations: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub bind_port: Option<u16>,
    #[serde(default)]
    pub bind_address: Option<String>,
    #[serde(default)]
    pub socket: Option<PathBuf>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: u16,
    #[serde(default = "default_max_connect_errors")]
    pub max_connect_errors: u32,
    #[serde(default = "default_client_connect_timeout")]
    pub client_connect_timeout: u32,
    #[serde(default = "default_net_buffer_length")]
    pub net_buffer_length: u32,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, toml::Value>,
}

/// A validated routing instance, ready for wiring.
#[derive(Debug, Clone)]
pub struct RoutingInstance {
    pub name: String,
    pub destinations: DestinationSpec,
    pub mode: AccessMode,
    pub bind_address: Option<(String, u16)>,
    pub socket: Option<PathBuf>,
    pub connect_timeout: u16,
    pub max_connections: u16,
    pub max_connect_errors: u32,
    pub client_connect_timeout: u32,
    pub net_buffer_length: u32,
}

impl RoutingConfig {
    fn section(&self) -> String {
        if self.name.is_empty() {
            "[routing]".to_string()
        } else {
            format!("[routing:{}]", self.name)
        }
    }

    fn option_prefix(&self, option: &str) -> String {
        format!("option {option} in {}", self.section())
    }

    fn bounds_error(&self, option: &str, low: u64, high: u64, was: u64) -> ConfigError {
        ConfigError::Invalid(format!(
            "{} needs value between {low} and {high} inclusive (was '{was}')",
            self.option_prefix(option)
        ))
    }

    pub fn validate(&self) -> Result<RoutingInstance, ConfigError> {
        for option in self.unknown.keys() {
            warn!("unknown option {option} in {}", self.section());
        }

        let destinations_raw = self
            .destinations
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ConfigError::Invalid(format!("{} is required", self.option_prefix("destinations")))
            })?;
        let destinations = parse_destinations(destinations_raw).map_err(|err| {
            ConfigError::Invalid(format!("{}: {err}", self.option_prefix("destinations")))
        })?;

        let mode_raw = self.mode.as_deref().map(str::trim).filter(|v| !v.is_empty());
        let mode_raw = mode_raw.ok_or_else(|| {
            ConfigError::Invalid(format!(
                "{} needs to be specified; valid are {}",
                self.option_prefix("mode"),
                AccessMode::valid_names()
            ))
        })?;
        let mode = AccessMode::from_name(mode_raw).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "{} is invalid; valid are {} (was '{}')",
                self.option_prefix("mode"),
                AccessMode::valid_names(),
                mode_raw
            ))
        })?;

        if let Some(port) = self.bind_port {
            if port == 0 {
                return Err(self.bounds_error("bind_port", 1, 65535, 0));
            }
        }

        let bind_address_raw = self.bind_address.as_deref().unwrap_or(DEFAULT_BIND_ADDRESS);
        let (bind_host, bind_port) = split_host_port(bind_address_raw).map_err(|reason| {
            ConfigError::Invalid(format!(
                "{} is invalid (was '{bind_address_raw}'): {reason}",
                self.option_prefix("bind_address")
            ))
        })?;
        let bind_port = bind_port.or(self.bind_port);
        if bind_port == Some(0) {
            return Err(self.bounds_error("bind_address", 1, 65535, 0));
        }
        let bind_address = bind_port.map(|port| (bind_host, port));

        // either bind_address or socket needs to be set, or both
        if bind_address.is_none() && self.socket.is_none() {
            return Err(ConfigError::Invalid(format!(
                "either bind_address or socket option needs to be supplied, or both (in {})",
                self.section()
            )));
        }

        if self.connect_timeout < 1 {
            return Err(self.bounds_error("connect_timeout", 1, 65535, self.connect_timeout as u64));
        }
        if self.max_connections < 1 {
            return Err(self.bounds_error("max_connections", 1, 65535, self.max_connections as u64));
        }
        if self.max_connect_errors < 1 {
            return Err(self.bounds_error(
                "max_connect_errors",
                1,
                u32::MAX as u64,
                self.max_connect_errors as u64,
            ));
        }
        if !(2..=31_536_000).contains(&self.client_connect_timeout) {
            return Err(self.bounds_error(
                "client_connect_timeout",
                2,
                31_536_000,
                self.client_connect_timeout as u64,
            ));
        }
        if !(1024..=1_048_576).contains(&self.net_buffer_length) {
            return Err(self.bounds_error(
                "net_buffer_length",
                1024,
                1_048_576,
                self.net_buffer_length as u64,
            ));
        }

        Ok(RoutingInstance {
            name: self.name.clone(),
            destinations,
            mode,
            bind_address,
            socket: self.socket.clone(),
            connect_timeout: self.connect_timeout,
            max_connections: self.max_connections,
            max_connect_errors: self.max_connect_errors,
            client_connect_timeout: self.client_connect_timeout,
            net_buffer_length: self.net_buffer_length,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        Self::load_from_str(&content)
    }

    pub fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.instances().map(drop)
    }

    /// Validate every routing section and the cross-section requirements.
    pub fn instances(&self) -> Result<Vec<RoutingInstance>, ConfigError> {
        if self.routing.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[routing]] section is required".to_string(),
            ));
        }

        if let Some(metadata) = &self.metadata {
            metadata.validate()?;
        }

        let instances: Vec<RoutingInstance> = self
            .routing
            .iter()
            .map(RoutingConfig::validate)
            .collect::<Result<_, _>>()?;

        for instance in &instances {
            if matches!(instance.destinations, DestinationSpec::MetadataCache { .. })
                && self.metadata.is_none()
            {
                return Err(ConfigError::Invalid(format!(
                    "routing instance '{}' uses metadata-cache destinations but no [metadata] section is defined",
                    instance.name
                )));
            }
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            level => {
                return Err(ConfigError::Invalid(format!(
                    "option level in [logging] is invalid (was '{level}')"
                )))
            }
        }

        Ok(instances)
    }
}

fn default_connect_timeout() -> u16 {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_connect_timeout_u64() -> u64 {
    DEFAULT_CONNECT_TIMEOUT as u64
}

fn default_max_connections() -> u16 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_max_connect_errors() -> u32 {
    DEFAULT_MAX_CONNECT_ERRORS
}

fn default_client_connect_timeout() -> u32 {
    DEFAULT_CLIENT_CONNECT_TIMEOUT
}

fn default_net_buffer_length() -> u32 {
    DEFAULT_NET_BUFFER_LENGTH
}

fn default_metadata_ttl() -> u64 {
    DEFAULT_METADATA_TTL
}

fn default_log_level() -> String {
    "info".to_string()
}
