//! Error types for Scribe

use std::fmt;

/// Unified error type for all Scribe remote-transport operations
#[derive(Debug)]
pub enum ScribeError {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Protocol error: malformed packet or a message illegal for the
    /// current connection state. Fatal; the connection is torn down.
    Protocol(String),

    /// Key exchange failure: host-key signature or verification failed.
    /// Fatal.
    KeyExchange(String),

    /// Integrity check failed on a received packet. Fatal and never
    /// retried; treated as potential tampering.
    Mac(String),

    /// Authentication failed: method list exhausted or attempt cap
    /// reached for the given user/host.
    Authentication {
        /// Username that failed to authenticate
        user: String,
        /// Host the authentication was attempted against
        host: String,
        /// Failure detail
        message: String,
    },

    /// The peer refused to open a channel. Recoverable: only the
    /// requesting channel fails, the connection stays up.
    ChannelOpen {
        /// Peer-supplied reason code
        reason: u32,
        /// Peer-supplied description
        message: String,
    },

    /// The host is not present in the known-hosts store. Recoverable
    /// pending an explicit user decision; default is to abort.
    HostKeyUnknown(String),

    /// The host presented a key different from the stored one.
    /// Recoverable pending an explicit user decision; default is to abort.
    HostKeyChanged(String),

    /// A file-transfer request failed with a server status code.
    /// Recoverable: only the failed operation is affected.
    Sftp {
        /// Server status code
        code: u32,
        /// Server-supplied message
        message: String,
    },

    /// Other error
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for ScribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScribeError::Io(e) => write!(f, "IO error: {}", e),
            ScribeError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ScribeError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            ScribeError::KeyExchange(msg) => write!(f, "Key exchange failed: {}", msg),
            ScribeError::Mac(msg) => write!(f, "MAC verification failed: {}", msg),
            ScribeError::Authentication {
                user,
                host,
                message,
            } => write!(
                f,
                "Authentication failed for {}@{}: {}",
                user, host, message
            ),
            ScribeError::ChannelOpen { reason, message } => {
                write!(f, "Channel open failed (reason {}): {}", reason, message)
            }
            ScribeError::HostKeyUnknown(msg) => write!(f, "Unknown host key: {}", msg),
            ScribeError::HostKeyChanged(msg) => write!(f, "Host key changed: {}", msg),
            ScribeError::Sftp { code, message } => {
                write!(f, "File transfer failed (status {}): {}", code, message)
            }
            ScribeError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for ScribeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScribeError::Io(e) => Some(e),
            ScribeError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ScribeError {
    fn from(err: std::io::Error) -> Self {
        ScribeError::Io(err)
    }
}

impl ScribeError {
    /// Returns `true` for errors that force the whole connection down.
    ///
    /// Channel-open refusals and pending host-key decisions leave the
    /// connection usable; everything else in the taxonomy does not.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ScribeError::ChannelOpen { .. }
                | ScribeError::HostKeyUnknown(_)
                | ScribeError::HostKeyChanged(_)
                | ScribeError::Sftp { .. }
        )
    }
}

/// Result type for Scribe operations
pub type ScribeResult<T> = Result<T, ScribeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScribeError::Config("Invalid configuration".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid configuration"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ScribeError = io_err.into();
        assert!(matches!(err, ScribeError::Io(_)));
    }

    #[test]
    fn test_authentication_display() {
        let err = ScribeError::Authentication {
            user: "alice".to_string(),
            host: "example.com".to_string(),
            message: "all methods exhausted".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Authentication failed for alice@example.com: all methods exhausted"
        );
    }

    #[test]
    fn test_fatality() {
        assert!(ScribeError::Mac("bad digest".to_string()).is_fatal());
        assert!(ScribeError::Protocol("bad packet".to_string()).is_fatal());
        assert!(!ScribeError::ChannelOpen {
            reason: 1,
            message: "administratively prohibited".to_string(),
        }
        .is_fatal());
        assert!(!ScribeError::HostKeyUnknown("example.com".to_string()).is_fatal());
        assert!(!ScribeError::Sftp {
            code: 2,
            message: "no such file".to_string(),
        }
        .is_fatal());
    }

    #[test]
    fn test_result_type() {
        fn example() -> ScribeResult<i32> {
            Ok(42)
        }

        assert_eq!(example().unwrap(), 42);
    }
}
