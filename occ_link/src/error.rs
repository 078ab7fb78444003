//! Error types for transport and buffer operations

use nix::errno::Errno;
use thiserror::Error;

/// Errors that can occur on the link data path.
///
/// Every kind the caller remediates differently has its own variant.
/// The type is `Clone` so a sticky ring buffer error can be handed out
/// to every subsequent `wait`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Device does not exist
    #[error("Device not found: {path}")]
    NotFound {
        /// Device path
        path: String,
    },

    /// Driver and library disagree on the protocol version
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version this library speaks
        expected: String,
        /// Version reported by the driver
        found: String,
    },

    /// Status handshake returned less than expected
    #[error("Status handshake returned no data")]
    NoData,

    /// Allocation or mapping failed
    #[error("Out of memory: {what}")]
    OutOfMemory {
        /// Resource that could not be allocated
        what: String,
    },

    /// Generic I/O failure
    #[error("IO error ({kind:?}): {message}")]
    Io {
        /// Error category
        kind: std::io::ErrorKind,
        /// Description
        message: String,
    },

    /// No data within the requested time
    #[error("Timed out waiting for data")]
    Timeout,

    /// Link was reset underneath the reader
    #[error("Connection reset")]
    ConnectionReset,

    /// Hardware FIFO or ring buffer overflowed
    #[error("Buffer overflow")]
    Overflow,

    /// DMA stalled because the receive buffer is exhausted
    #[error("DMA stalled, receive buffer full")]
    Stall,

    /// Simulator has no connected peer, or receive is disabled
    #[error("No peer connected or receive disabled")]
    NotConnected,

    /// Operation or region not available on this backend
    #[error("Unsupported: {what}")]
    Unsupported {
        /// Missing capability
        what: String,
    },

    /// Argument rejected before touching the device
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Rejection reason
        reason: String,
    },

    /// Operation not permitted on a debug handle
    #[error("Operation not permitted on a debug handle: {operation}")]
    Restricted {
        /// Rejected operation
        operation: &'static str,
    },

    /// Producer terminated
    #[error("Producer shut down")]
    Shutdown,
}

impl LinkError {
    /// Map an errno returned by the driver to the matching kind.
    pub fn from_errno(errno: Errno, context: &str) -> Self {
        match errno {
            Errno::ENOENT | Errno::ENODEV => Self::NotFound {
                path: context.to_string(),
            },
            Errno::EPROTO => Self::VersionMismatch {
                expected: "driver protocol".to_string(),
                found: context.to_string(),
            },
            Errno::ENODATA => Self::NoData,
            Errno::ENOMEM => Self::OutOfMemory {
                what: context.to_string(),
            },
            Errno::ETIME | Errno::ETIMEDOUT => Self::Timeout,
            Errno::ECONNRESET => Self::ConnectionReset,
            Errno::EOVERFLOW | Errno::ERANGE => Self::Overflow,
            Errno::ENOSPC => Self::Stall,
            Errno::ENOTCONN => Self::NotConnected,
            Errno::ENOSYS | Errno::ENOTSUP => Self::Unsupported {
                what: context.to_string(),
            },
            Errno::EINVAL => Self::InvalidArgument {
                reason: context.to_string(),
            },
            Errno::ESHUTDOWN => Self::Shutdown,
            other => Self::Io {
                kind: std::io::Error::from(other).kind(),
                message: format!("{context}: {}", other.desc()),
            },
        }
    }

    /// Condition that clears after a device reset.
    pub fn needs_reset(&self) -> bool {
        matches!(self, Self::Overflow | Self::Stall | Self::ConnectionReset)
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Self::from_errno(Errno::from_raw(code), &err.to_string()),
            None => Self::Io {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

impl From<Errno> for LinkError {
    fn from(errno: Errno) -> Self {
        Self::from_errno(errno, errno.desc())
    }
}

/// Result type for link operations
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_keeps_kinds_distinct() {
        assert_eq!(LinkError::from(Errno::ETIME), LinkError::Timeout);
        assert_eq!(LinkError::from(Errno::ECONNRESET), LinkError::ConnectionReset);
        assert_eq!(LinkError::from(Errno::EOVERFLOW), LinkError::Overflow);
        assert_eq!(LinkError::from(Errno::ENOSPC), LinkError::Stall);
        assert!(matches!(
            LinkError::from(Errno::EIO),
            LinkError::Io { .. }
        ));
    }

    #[test]
    fn io_error_with_errno_is_mapped() {
        let err = std::io::Error::from_raw_os_error(libc::ENOENT);
        assert!(matches!(LinkError::from(err), LinkError::NotFound { .. }));
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(matches!(LinkError::from(err), LinkError::Io { .. }));
    }

    #[test]
    fn reset_remediation() {
        assert!(LinkError::Stall.needs_reset());
        assert!(!LinkError::Timeout.needs_reset());
    }
}
