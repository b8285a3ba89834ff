//! Error types for drop monitor operations.

use std::io;

/// Result type for drop monitor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the drop monitor subsystem.
///
/// An elapsed read deadline is deliberately *not* represented here: the
/// session's read loop treats it as its normal termination condition and
/// returns `Ok(())`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Kernel returned an error code in a netlink ack.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// The errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Generic netlink family is not registered with the kernel.
    #[error("generic netlink family not found: {name}")]
    FamilyNotFound {
        /// The family name that was not found.
        name: String,
    },

    /// The drop monitor family exists but looks wrong.
    ///
    /// Raised at session construction, e.g. when the family registers a
    /// multicast group count other than exactly one.
    #[error("drop monitor discovery failed: {0}")]
    Discovery(String),

    /// A received attribute stream could not be parsed as TLV records.
    #[error("malformed attribute: {0}")]
    MalformedAttribute(String),

    /// A request attribute could not be encoded to the wire format.
    #[error("attribute encoding failed: {0}")]
    Encoding(String),

    /// `start` was called while the session is already monitoring.
    #[error("session is already monitoring")]
    AlreadyMonitoring,

    /// Message was truncated.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected message length.
        expected: usize,
        /// Actual bytes received.
        actual: usize,
    },

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl Error {
    /// Create a kernel error from a (negative) errno value.
    pub fn from_errno(errno: i32) -> Self {
        let message = io::Error::from_raw_os_error(-errno).to_string();
        Self::Kernel {
            errno: -errno,
            message,
        }
    }

    /// Check if this is a permission error (EPERM, EACCES).
    ///
    /// Packet-mode alerting requires CAP_NET_ADMIN; callers use this to
    /// print a useful hint.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } => matches!(*errno, libc::EPERM | libc::EACCES),
            _ => false,
        }
    }

    /// Check if this is a "not found" error (ENOENT, ENODEV).
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } => matches!(*errno, libc::ENOENT | libc::ENODEV),
            Self::FamilyNotFound { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a "device busy" error (EBUSY).
    ///
    /// The kernel returns EBUSY from CMD_START when alerting is already
    /// enabled, typically left over from a previous crashed capture.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } => *errno == libc::EBUSY,
            _ => false,
        }
    }

    /// Get the errno value if this is a kernel error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_errno() {
        let err = Error::from_errno(-libc::EPERM);
        assert!(err.is_permission_denied());
        assert_eq!(err.errno(), Some(libc::EPERM));
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::from_errno(-libc::ENOENT).is_not_found());
        assert!(Error::from_errno(-libc::ENODEV).is_not_found());
        assert!(
            Error::FamilyNotFound {
                name: "NET_DM".into()
            }
            .is_not_found()
        );
        assert!(!Error::from_errno(-libc::EPERM).is_not_found());
    }

    #[test]
    fn test_is_busy() {
        assert!(Error::from_errno(-libc::EBUSY).is_busy());
        assert!(!Error::from_errno(-libc::EPERM).is_busy());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::FamilyNotFound {
            name: "NET_DM".into(),
        };
        assert_eq!(
            err.to_string(),
            "generic netlink family not found: NET_DM"
        );

        let err = Error::Discovery("2 multicast groups, expected 1".into());
        assert!(err.to_string().contains("expected 1"));

        assert_eq!(
            Error::AlreadyMonitoring.to_string(),
            "session is already monitoring"
        );
    }
}
