//! Error types for the module protocol

use occ::hwid::HardwareId;
use occ::packet::CodecError;
use occ::packet::command::Command;
use occ_link::LinkError;
use thiserror::Error;

/// Errors raised while talking to a front-end module.
#[derive(Error, Debug)]
pub enum ModuleError {
    /// Another command is still waiting for its response
    #[error("Module {module} busy: {outstanding} still outstanding")]
    Busy {
        /// Module address
        module: HardwareId,
        /// Command awaiting a response
        outstanding: Command,
    },

    /// Transport failure while sending
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Packet could not be built or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Parameter descriptor or value rejected
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParam {
        /// Parameter name
        name: String,
        /// Rejection reason
        reason: String,
    },
}

/// Result type for module protocol operations
pub type ModuleResult<T> = Result<T, ModuleError>;

impl ModuleError {
    pub(crate) fn invalid_param(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParam {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
