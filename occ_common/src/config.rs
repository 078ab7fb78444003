//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! across all OCC applications.
//!
//! # Usage
//!
//! ```rust,no_run
//! use occ_common::config::{ConfigLoader, ConfigError, OccConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = OccConfig::load(Path::new("occ.toml"))?;
//!     config.validate()?;
//!     println!("Device: {}", config.link.device);
//!     Ok(())
//! }
//! ```

use crate::consts::{ALIGNMENT, PACKET_MAX_LENGTH};
use crate::hwid::HardwareId;
use crate::packet::command::ModuleType;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// configuration files.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing` filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared across all OCC applications.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "occ-bl14"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `service_name` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Backend behind a transport handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Link adapter driver device file.
    #[default]
    Hardware,
    /// Pair of named pipes, `"<rx>,<tx>"`.
    Pipe,
    /// TCP listener, `"<host>:<port>"`.
    Socket,
}

/// Physical interface selected when resetting the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    /// Copper LVDS link.
    Lvds,
    /// Optical fiber link.
    #[default]
    Optical,
    /// Simulated link over a socket.
    Socket,
}

fn default_wait_timeout_ms() -> u64 {
    100
}

fn default_local_buffer_size() -> usize {
    40 * 1024 * 1024
}

/// Transport and receive buffer settings.
///
/// ```toml
/// [link]
/// device = "/dev/snsocb0"
/// kind = "hardware"
/// interface = "optical"
/// local_buffer_size = 41943040
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Device path, pipe pair or socket address depending on `kind`.
    pub device: String,

    /// Backend selection.
    #[serde(default)]
    pub kind: LinkKind,

    /// Physical interface.
    #[serde(default)]
    pub interface: Interface,

    /// Size of the locally owned ring fed by a copier thread. 0 reads
    /// straight from the transport memory window instead.
    #[serde(default = "default_local_buffer_size")]
    pub local_buffer_size: usize,

    /// Poll period of the copier thread in milliseconds.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

impl LinkConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "link.device cannot be empty".to_string(),
            ));
        }
        if self.local_buffer_size != 0
            && (self.local_buffer_size % ALIGNMENT != 0 || self.local_buffer_size < PACKET_MAX_LENGTH)
        {
            return Err(ConfigError::ValidationError(format!(
                "link.local_buffer_size must be 0 or a multiple of {ALIGNMENT} of at least {PACKET_MAX_LENGTH} bytes, got {}",
                self.local_buffer_size
            )));
        }
        if self.wait_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "link.wait_timeout_ms must be positive".to_string(),
            ));
        }
        if self.kind == LinkKind::Pipe && !self.device.contains(',') {
            return Err(ConfigError::ValidationError(format!(
                "pipe device must be '<rx>,<tx>', got '{}'",
                self.device
            )));
        }
        Ok(())
    }
}

/// How commands reach a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleLink {
    /// Addressed directly by the link adapter.
    Direct,
    /// Relayed by an aggregator over LVDS.
    Lvds,
}

fn default_response_timeout_ms() -> u64 {
    1000
}

/// One front-end module.
///
/// ```toml
/// [[modules]]
/// name = "dsp1"
/// hardware_id = "21.50.85.1"
/// module_type = 0x30
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Module name used in logs.
    pub name: String,

    /// Module address.
    pub hardware_id: HardwareId,

    /// Expected module type.
    pub module_type: ModuleType,

    /// Command path, derived from the module type when omitted.
    #[serde(default)]
    pub link: Option<ModuleLink>,

    /// Response timeout in milliseconds.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl ModuleConfig {
    /// Effective command path.
    pub fn link(&self) -> ModuleLink {
        self.link.unwrap_or(if self.module_type.is_dsp() {
            ModuleLink::Direct
        } else {
            ModuleLink::Lvds
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "module name cannot be empty".to_string(),
            ));
        }
        if self.response_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(format!(
                "module '{}': response_timeout_ms must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

/// Complete configuration of an OCC application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccConfig {
    /// Common fields.
    pub shared: SharedConfig,
    /// Transport settings.
    pub link: LinkConfig,
    /// Known modules.
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

impl OccConfig {
    /// Validate every section, rejecting duplicate module names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.link.validate()?;
        for (i, module) in self.modules.iter().enumerate() {
            module.validate()?;
            if self.modules[..i].iter().any(|m| m.name == module.name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate module name '{}'",
                    module.name
                )));
            }
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
