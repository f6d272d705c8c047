//! Protocol version exchange (RFC 4253 Section 4.2).
//!
//! A connection begins with both sides sending an identification line:
//!
//! ```text
//! SSH-protoversion-softwareversion SP comments CR LF
//! ```
//!
//! Example: `SSH-2.0-Scribe_0.1.0 Scribe editor remote transport`
//!
//! # Security
//!
//! - Maximum line length: 255 characters (DoS prevention)
//! - Protocol version must be "2.0" or "1.99"
//! - No null bytes allowed in the line
//!
//! # Example
//!
//! ```rust
//! use scribe_proto::ssh::version::Version;
//!
//! let version = Version::new("Scribe_0.1.0", None);
//! assert_eq!(version.to_string(), "SSH-2.0-Scribe_0.1.0");
//!
//! let parsed = Version::parse("SSH-2.0-OpenSSH_8.9\r\n").unwrap();
//! assert_eq!(parsed.software(), "OpenSSH_8.9");
//! ```

use scribe_platform::{ScribeError, ScribeResult};

/// Maximum length of a version line (RFC 4253 Section 4.2).
pub const MAX_VERSION_LENGTH: usize = 255;

/// Protocol identification string exchanged at connection start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Protocol version (e.g., "2.0")
    proto_version: String,
    /// Software version (e.g., "Scribe_0.1.0")
    software_version: String,
    /// Optional comments
    comments: Option<String>,
}

impl Version {
    /// Creates a new version string with protocol version "2.0".
    pub fn new(software: &str, comments: Option<&str>) -> Self {
        Self {
            proto_version: "2.0".to_string(),
            software_version: software.to_string(),
            comments: comments.map(String::from),
        }
    }

    /// Returns the default Scribe version string.
    pub fn default_scribe() -> Self {
        Self::new(&format!("Scribe_{}", env!("CARGO_PKG_VERSION")), None)
    }

    /// Parses a version line (with or without trailing CR LF).
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::Protocol`] if:
    /// - the line exceeds 255 characters
    /// - the line does not start with "SSH-"
    /// - the protocol version is not "2.0" or "1.99"
    /// - the line contains null bytes
    pub fn parse(line: &str) -> ScribeResult<Self> {
        let line = line.trim_end_matches("\r\n").trim_end_matches('\n');

        if line.len() > MAX_VERSION_LENGTH {
            return Err(ScribeError::Protocol(format!(
                "version string too long: {} bytes (max {})",
                line.len(),
                MAX_VERSION_LENGTH
            )));
        }

        if line.contains('\0') {
            return Err(ScribeError::Protocol(
                "version string contains null byte".to_string(),
            ));
        }

        if !line.starts_with("SSH-") {
            return Err(ScribeError::Protocol(format!(
                "invalid version string: must start with 'SSH-', got '{}'",
                line
            )));
        }

        let parts: Vec<&str> = line.splitn(3, '-').collect();
        if parts.len() < 3 {
            return Err(ScribeError::Protocol(format!(
                "invalid version string format: '{}'",
                line
            )));
        }

        let proto_version = parts[1];
        let rest = parts[2];

        if proto_version != "2.0" && proto_version != "1.99" {
            return Err(ScribeError::Protocol(format!(
                "unsupported protocol version: '{}' (expected '2.0' or '1.99')",
                proto_version
            )));
        }

        let (software_version, comments) = if let Some(space_pos) = rest.find(' ') {
            let software = rest[..space_pos].to_string();
            let comments = rest[space_pos + 1..].trim().to_string();
            (software, Some(comments))
        } else {
            (rest.to_string(), None)
        };

        Ok(Self {
            proto_version: proto_version.to_string(),
            software_version,
            comments,
        })
    }

    /// Returns the protocol version (e.g., "2.0").
    pub fn proto_version(&self) -> &str {
        &self.proto_version
    }

    /// Returns the software version (e.g., "Scribe_0.1.0").
    pub fn software(&self) -> &str {
        &self.software_version
    }

    /// Returns the comments, if any.
    pub fn comments(&self) -> Option<&str> {
        self.comments.as_deref()
    }

    /// Converts to wire format (with CR LF).
    pub fn to_wire_format(&self) -> Vec<u8> {
        format!("{}\r\n", self).into_bytes()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SSH-{}-{}", self.proto_version, self.software_version)?;
        if let Some(comments) = &self.comments {
            write!(f, " {}", comments)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_new() {
        let version = Version::new("Scribe_0.1.0", None);
        assert_eq!(version.proto_version(), "2.0");
        assert_eq!(version.software(), "Scribe_0.1.0");
        assert_eq!(version.comments(), None);
    }

    #[test]
    fn test_version_display() {
        let version = Version::new("Scribe_0.1.0", Some("editor transport"));
        assert_eq!(version.to_string(), "SSH-2.0-Scribe_0.1.0 editor transport");
    }

    #[test]
    fn test_version_parse() {
        let version = Version::parse("SSH-2.0-OpenSSH_8.9").unwrap();
        assert_eq!(version.proto_version(), "2.0");
        assert_eq!(version.software(), "OpenSSH_8.9");
        assert_eq!(version.comments(), None);
    }

    #[test]
    fn test_version_parse_with_comments() {
        let version = Version::parse("SSH-2.0-OpenSSH_8.9 Ubuntu-3ubuntu0.1").unwrap();
        assert_eq!(version.software(), "OpenSSH_8.9");
        assert_eq!(version.comments(), Some("Ubuntu-3ubuntu0.1"));
    }

    #[test]
    fn test_version_parse_with_crlf() {
        let version = Version::parse("SSH-2.0-OpenSSH_8.9\r\n").unwrap();
        assert_eq!(version.software(), "OpenSSH_8.9");
    }

    #[test]
    fn test_version_parse_legacy_199() {
        let version = Version::parse("SSH-1.99-OldServer_1.0").unwrap();
        assert_eq!(version.proto_version(), "1.99");
    }

    #[test]
    fn test_version_parse_invalid_prefix() {
        assert!(Version::parse("INVALID-2.0-Test").is_err());
    }

    #[test]
    fn test_version_parse_unsupported_protocol() {
        let result = Version::parse("SSH-1.0-OldClient");
        match result {
            Err(ScribeError::Protocol(msg)) => {
                assert!(msg.contains("unsupported protocol version"));
            }
            _ => panic!("expected Protocol error"),
        }
    }

    #[test]
    fn test_version_parse_too_long() {
        let long_string = format!("SSH-2.0-{}", "A".repeat(300));
        assert!(Version::parse(&long_string).is_err());
    }

    #[test]
    fn test_version_parse_null_byte() {
        assert!(Version::parse("SSH-2.0-Test\0Bad").is_err());
    }

    #[test]
    fn test_version_wire_format() {
        let version = Version::new("Scribe_0.1.0", None);
        assert_eq!(version.to_wire_format(), b"SSH-2.0-Scribe_0.1.0\r\n");
    }

    #[test]
    fn test_version_round_trip() {
        let original = Version::new("Scribe_0.1.0", Some("test"));
        let parsed = Version::parse(&original.to_string()).unwrap();
        assert_eq!(parsed.software(), original.software());
        assert_eq!(parsed.comments(), original.comments());
    }
}
