//! Error type of the `occ` tool

use occ::config::ConfigError;
use occ::packet::CodecError;
use occ_link::LinkError;
use occ_module::ModuleError;
use thiserror::Error;

/// Everything a subcommand can fail with.
#[derive(Error, Debug)]
pub enum ToolError {
    /// Configuration could not be loaded or is invalid
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Transport failure
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Module protocol failure
    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    /// Packet decoding failure
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Writing output failed
    #[error("Output error: {0}")]
    Output(#[from] std::io::Error),

    /// JSON serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Signal handler could not be installed
    #[error("Signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// Result type of the `occ` tool
pub type ToolResult<T> = Result<T, ToolError>;
