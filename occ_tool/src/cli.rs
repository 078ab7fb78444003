//! Command line definition and configuration resolution.

use crate::error::ToolResult;
use clap::{Parser, Subcommand, ValueEnum};
use occ::config::{
    ConfigError, ConfigLoader, Interface, LinkConfig, LinkKind, LogLevel, OccConfig, SharedConfig,
};
use occ::consts::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;
use tracing::debug;

/// Default device when neither the config file nor `--device` names one.
pub const DEFAULT_DEVICE: &str = "/dev/snsocb0";

/// OCC link adapter tool
#[derive(Parser, Debug)]
#[command(name = "occ")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Status, packet dump, discovery and register access for OCC link adapters")]
#[command(long_about = None)]
pub struct Args {
    /// Configuration file. Defaults to /etc/occ/occ.toml when present.
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Device path, "<rx>,<tx>" pipe pair or "<host>:<port>" socket address
    #[arg(short, long, global = true)]
    pub device: Option<String>,

    /// Backend kind
    #[arg(short, long, global = true, value_enum)]
    pub kind: Option<KindArg>,

    /// Open a restricted handle next to a running application
    #[arg(long, global = true)]
    pub debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON output and logs
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print board status
    Status,

    /// Print received packets
    Dump {
        /// Stop after this many packets
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Stop after this many milliseconds without data
        #[arg(short, long, value_name = "MS")]
        timeout: Option<u64>,
    },

    /// Discover modules on the link
    Discover {
        /// How long to collect responses, in milliseconds
        #[arg(short, long, value_name = "MS", default_value_t = 2000)]
        timeout: u64,
    },

    /// Verify the configured DSP modules
    Verify,

    /// Read registers
    Read {
        /// BAR index
        bar: usize,
        /// Byte offset, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_number)]
        offset: u32,
        /// Number of 32-bit words
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },

    /// Write registers
    Write {
        /// BAR index
        bar: usize,
        /// Byte offset, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_number)]
        offset: u32,
        /// Values to write, decimal or 0x-prefixed hex
        #[arg(required = true, value_parser = parse_number)]
        values: Vec<u32>,
    },

    /// Reset the link
    Reset,
}

/// `--kind` values.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindArg {
    /// Link adapter driver
    Hardware,
    /// Named pipe simulator
    Pipe,
    /// TCP socket simulator
    Socket,
}

impl From<KindArg> for LinkKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Hardware => LinkKind::Hardware,
            KindArg::Pipe => LinkKind::Pipe,
            KindArg::Socket => LinkKind::Socket,
        }
    }
}

/// Parse a decimal or `0x` hex number.
pub fn parse_number(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("'{text}' is not a number: {e}"))
}

fn default_config() -> OccConfig {
    OccConfig {
        shared: SharedConfig {
            log_level: LogLevel::default(),
            service_name: "occ".to_string(),
        },
        link: LinkConfig {
            device: DEFAULT_DEVICE.to_string(),
            kind: LinkKind::default(),
            interface: Interface::default(),
            local_buffer_size: 0,
            wait_timeout_ms: 100,
        },
        modules: Vec::new(),
    }
}

/// Configuration from `--config` (or the default file if it exists) with
/// the command line overrides applied, validated.
pub fn resolve_config(args: &Args) -> ToolResult<OccConfig> {
    let mut config = match &args.config {
        Some(path) => OccConfig::load(path)?,
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if path.exists() {
                OccConfig::load(&path)?
            } else {
                debug!("No config file, using defaults");
                default_config()
            }
        }
    };

    if let Some(device) = &args.device {
        config.link.device = device.clone();
    }
    if let Some(kind) = args.kind {
        config.link.kind = kind.into();
        if config.link.kind == LinkKind::Socket {
            config.link.interface = Interface::Socket;
        } else if config.link.interface == Interface::Socket {
            config.link.interface = Interface::default();
        }
    }
    if args.verbose {
        config.shared.log_level = LogLevel::Debug;
    }

    config.validate()?;
    if config.link.kind == LinkKind::Socket && config.link.interface != Interface::Socket {
        return Err(ConfigError::ValidationError(
            "socket links need interface = \"socket\"".to_string(),
        )
        .into());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_in_hex_and_decimal() {
        assert_eq!(parse_number("0x10"), Ok(16));
        assert_eq!(parse_number("16"), Ok(16));
        assert!(parse_number("sixteen").is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "occ", "read", "0", "0x40", "-n", "4", "--device", "a,b", "--kind", "pipe",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            Command::Read {
                bar: 0,
                offset: 0x40,
                count: 4
            }
        );
        assert_eq!(args.kind, Some(KindArg::Pipe));
        assert_eq!(args.device.as_deref(), Some("a,b"));
    }

    #[test]
    fn write_needs_values() {
        assert!(Args::try_parse_from(["occ", "write", "0", "0"]).is_err());
    }
}
