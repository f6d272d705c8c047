//! Algorithm negotiation (RFC 4253 Section 7.1).
//!
//! Both sides send an `SSH_MSG_KEXINIT` carrying a random cookie and ten
//! preference-ordered, comma-separated algorithm name lists. For each
//! category the negotiated algorithm is the first name in the client's
//! list that also appears in the server's list.
//!
//! # Example
//!
//! ```rust
//! use scribe_proto::ssh::kex::{negotiate_algorithm, KexInit};
//!
//! let client = KexInit::new_client();
//! let server = KexInit::new_client();
//! let kex = negotiate_algorithm(client.kex_algorithms(), server.kex_algorithms()).unwrap();
//! assert_eq!(kex, "diffie-hellman-group14-sha256");
//! ```

use crate::ssh::codec;
use crate::ssh::message::MessageType;
use rand::RngCore;
use scribe_platform::{ScribeError, ScribeResult};

/// Size of the KEXINIT random cookie.
pub const COOKIE_SIZE: usize = 16;

/// SSH_MSG_KEXINIT payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexInit {
    /// Random cookie (16 bytes).
    cookie: [u8; COOKIE_SIZE],
    /// Key exchange algorithms.
    kex_algorithms: Vec<String>,
    /// Server host key algorithms.
    server_host_key_algorithms: Vec<String>,
    /// Encryption algorithms, client to server.
    encryption_client_to_server: Vec<String>,
    /// Encryption algorithms, server to client.
    encryption_server_to_client: Vec<String>,
    /// MAC algorithms, client to server.
    mac_client_to_server: Vec<String>,
    /// MAC algorithms, server to client.
    mac_server_to_client: Vec<String>,
    /// Compression algorithms, client to server.
    compression_client_to_server: Vec<String>,
    /// Compression algorithms, server to client.
    compression_server_to_client: Vec<String>,
    /// Languages, client to server.
    languages_client_to_server: Vec<String>,
    /// Languages, server to client.
    languages_server_to_client: Vec<String>,
    /// Whether a guessed kex packet follows.
    first_kex_packet_follows: bool,
}

impl KexInit {
    /// Creates a KEXINIT with this client's default preference lists.
    pub fn new_client() -> Self {
        Self::with_compression(false)
    }

    /// Default key exchange preference list.
    pub fn default_kex_algorithms() -> Vec<String> {
        vec![
            "diffie-hellman-group14-sha256".to_string(),
            "diffie-hellman-group1-sha1".to_string(),
        ]
    }

    /// Creates a KEXINIT with an explicit key exchange preference list.
    pub fn with_preferences(prefer_zlib: bool, kex_algorithms: &[String]) -> Self {
        let mut init = Self::with_compression(prefer_zlib);
        init.kex_algorithms = kex_algorithms.to_vec();
        init
    }

    /// Creates a KEXINIT, optionally preferring zlib compression.
    pub fn with_compression(prefer_zlib: bool) -> Self {
        let mut cookie = [0u8; COOKIE_SIZE];
        rand::thread_rng().fill_bytes(&mut cookie);

        let compression = if prefer_zlib {
            vec!["zlib".to_string(), "none".to_string()]
        } else {
            vec!["none".to_string()]
        };

        Self {
            cookie,
            kex_algorithms: Self::default_kex_algorithms(),
            server_host_key_algorithms: vec![
                "ssh-ed25519".to_string(),
                "ssh-rsa".to_string(),
                "ssh-dss".to_string(),
            ],
            encryption_client_to_server: vec![
                "aes128-cbc".to_string(),
                "aes256-cbc".to_string(),
            ],
            encryption_server_to_client: vec![
                "aes128-cbc".to_string(),
                "aes256-cbc".to_string(),
            ],
            mac_client_to_server: vec!["hmac-sha2-256".to_string(), "hmac-sha1".to_string()],
            mac_server_to_client: vec!["hmac-sha2-256".to_string(), "hmac-sha1".to_string()],
            compression_client_to_server: compression.clone(),
            compression_server_to_client: compression,
            languages_client_to_server: Vec::new(),
            languages_server_to_client: Vec::new(),
            first_kex_packet_follows: false,
        }
    }

    /// Returns the key exchange algorithm list.
    pub fn kex_algorithms(&self) -> &[String] {
        &self.kex_algorithms
    }

    /// Returns the server host key algorithm list.
    pub fn server_host_key_algorithms(&self) -> &[String] {
        &self.server_host_key_algorithms
    }

    /// Returns the client-to-server encryption algorithm list.
    pub fn encryption_client_to_server(&self) -> &[String] {
        &self.encryption_client_to_server
    }

    /// Returns the server-to-client encryption algorithm list.
    pub fn encryption_server_to_client(&self) -> &[String] {
        &self.encryption_server_to_client
    }

    /// Returns the client-to-server MAC algorithm list.
    pub fn mac_client_to_server(&self) -> &[String] {
        &self.mac_client_to_server
    }

    /// Returns the server-to-client MAC algorithm list.
    pub fn mac_server_to_client(&self) -> &[String] {
        &self.mac_server_to_client
    }

    /// Returns the client-to-server compression algorithm list.
    pub fn compression_client_to_server(&self) -> &[String] {
        &self.compression_client_to_server
    }

    /// Returns the server-to-client compression algorithm list.
    pub fn compression_server_to_client(&self) -> &[String] {
        &self.compression_server_to_client
    }

    /// Serializes to an SSH_MSG_KEXINIT payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::KexInit as u8);
        buf.extend_from_slice(&self.cookie);
        codec::write_name_list(&mut buf, &self.kex_algorithms);
        codec::write_name_list(&mut buf, &self.server_host_key_algorithms);
        codec::write_name_list(&mut buf, &self.encryption_client_to_server);
        codec::write_name_list(&mut buf, &self.encryption_server_to_client);
        codec::write_name_list(&mut buf, &self.mac_client_to_server);
        codec::write_name_list(&mut buf, &self.mac_server_to_client);
        codec::write_name_list(&mut buf, &self.compression_client_to_server);
        codec::write_name_list(&mut buf, &self.compression_server_to_client);
        codec::write_name_list(&mut buf, &self.languages_client_to_server);
        codec::write_name_list(&mut buf, &self.languages_server_to_client);
        codec::write_boolean(&mut buf, self.first_kex_packet_follows);
        codec::write_u32(&mut buf, 0); // reserved
        buf
    }

    /// Parses an SSH_MSG_KEXINIT payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 0;
        let msg_type = codec::read_u8(data, &mut offset)?;
        if msg_type != MessageType::KexInit as u8 {
            return Err(ScribeError::Protocol(format!(
                "expected SSH_MSG_KEXINIT, got message {}",
                msg_type
            )));
        }

        if data.len() < offset + COOKIE_SIZE {
            return Err(ScribeError::Protocol(
                "malformed KEXINIT: truncated cookie".to_string(),
            ));
        }
        let mut cookie = [0u8; COOKIE_SIZE];
        cookie.copy_from_slice(&data[offset..offset + COOKIE_SIZE]);
        offset += COOKIE_SIZE;

        let kex_algorithms = codec::read_name_list(data, &mut offset)?;
        let server_host_key_algorithms = codec::read_name_list(data, &mut offset)?;
        let encryption_client_to_server = codec::read_name_list(data, &mut offset)?;
        let encryption_server_to_client = codec::read_name_list(data, &mut offset)?;
        let mac_client_to_server = codec::read_name_list(data, &mut offset)?;
        let mac_server_to_client = codec::read_name_list(data, &mut offset)?;
        let compression_client_to_server = codec::read_name_list(data, &mut offset)?;
        let compression_server_to_client = codec::read_name_list(data, &mut offset)?;
        let languages_client_to_server = codec::read_name_list(data, &mut offset)?;
        let languages_server_to_client = codec::read_name_list(data, &mut offset)?;
        let first_kex_packet_follows = codec::read_boolean(data, &mut offset)?;
        let _reserved = codec::read_u32(data, &mut offset)?;

        Ok(Self {
            cookie,
            kex_algorithms,
            server_host_key_algorithms,
            encryption_client_to_server,
            encryption_server_to_client,
            mac_client_to_server,
            mac_server_to_client,
            compression_client_to_server,
            compression_server_to_client,
            languages_client_to_server,
            languages_server_to_client,
            first_kex_packet_follows,
        })
    }
}

/// SSH_MSG_NEWKEYS: signals that subsequent packets use the new keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NewKeys;

impl NewKeys {
    /// Creates a NEWKEYS message.
    pub fn new() -> Self {
        Self
    }

    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        vec![MessageType::NewKeys as u8]
    }

    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        if data.len() != 1 || data[0] != MessageType::NewKeys as u8 {
            return Err(ScribeError::Protocol(
                "malformed SSH_MSG_NEWKEYS".to_string(),
            ));
        }
        Ok(Self)
    }
}

/// Negotiates one algorithm category.
///
/// Returns the first name in the client's preference-ordered list that
/// also appears in the server's list (RFC 4253 Section 7.1).
pub fn negotiate_algorithm(client: &[String], server: &[String]) -> ScribeResult<String> {
    client
        .iter()
        .find(|name| server.contains(name))
        .cloned()
        .ok_or_else(|| {
            ScribeError::KeyExchange(format!(
                "no common algorithm: client offers [{}], server offers [{}]",
                client.join(","),
                server.join(",")
            ))
        })
}
