//! Top-level client: one authenticated connection and the channels on
//! it.
//!
//! Ties the layers together: transport handshake and host verification,
//! the authentication ladder, then the channel multiplexer. Interactive
//! decisions (host trust, credentials) arrive through the caller's
//! prompt implementations; nothing here reads terminals.
//!
//! # Example
//!
//! ```no_run
//! use scribe_proto::ssh::agent::NoAgent;
//! use scribe_proto::ssh::client::{SshClient, SshClientConfig};
//! use scribe_proto::ssh::known_hosts::RejectingPrompt;
//! use scribe_proto::ssh::negotiator::NoPrompt;
//!
//! # async fn example() -> scribe_platform::ScribeResult<()> {
//! let config = SshClientConfig::default();
//! let client = SshClient::connect(
//!     "example.net",
//!     22,
//!     "alice",
//!     config,
//!     &RejectingPrompt,
//!     &NoPrompt,
//!     &NoAgent,
//! )
//! .await?;
//! let mut sftp = client.open_sftp().await?;
//! let readme = sftp.read_file("/home/alice/README").await?;
//! # let _ = readme;
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use crate::ssh::agent::SigningAgent;
use crate::ssh::known_hosts::{HostKeyPrompt, KnownHostsStore};
use crate::ssh::mux::Multiplexer;
use crate::ssh::negotiator::{self, AuthConfig, CredentialPrompt, DEFAULT_PASSWORD_ATTEMPTS};
use crate::ssh::session::SessionChannel;
use crate::ssh::sftp::SftpClient;
use crate::ssh::transport::{Transport, TransportConfig};
use scribe_platform::ScribeResult;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct SshClientConfig {
    /// Software version advertised in the identification line.
    pub software_version: String,
    /// Prefer zlib compression during negotiation.
    pub prefer_zlib: bool,
    /// Key exchange preference list, most preferred first.
    pub kex_algorithms: Vec<String>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Handshake/authentication response timeout.
    pub response_timeout: Duration,
    /// Known-hosts file; `None` keeps trust decisions in memory only.
    pub known_hosts_path: Option<PathBuf>,
    /// Cap on interactive password attempts.
    pub password_attempts: u32,
}

impl Default for SshClientConfig {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            software_version: transport.software_version,
            prefer_zlib: false,
            kex_algorithms: transport.kex_algorithms,
            connect_timeout: transport.connect_timeout,
            response_timeout: transport.response_timeout,
            known_hosts_path: None,
            password_attempts: DEFAULT_PASSWORD_ATTEMPTS,
        }
    }
}

impl SshClientConfig {
    fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            software_version: self.software_version.clone(),
            prefer_zlib: self.prefer_zlib,
            kex_algorithms: self.kex_algorithms.clone(),
            connect_timeout: self.connect_timeout,
            response_timeout: self.response_timeout,
        }
    }

    fn known_hosts(&self) -> ScribeResult<KnownHostsStore> {
        match &self.known_hosts_path {
            Some(path) => KnownHostsStore::load(path),
            None => Ok(KnownHostsStore::in_memory()),
        }
    }
}

/// One authenticated connection.
#[derive(Debug)]
pub struct SshClient {
    mux: Multiplexer,
    host: String,
    port: u16,
    username: String,
    server_host_key: Vec<u8>,
}

impl SshClient {
    /// Connects, verifies the host identity, and authenticates.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        config: SshClientConfig,
        host_prompt: &dyn HostKeyPrompt,
        credential_prompt: &dyn CredentialPrompt,
        agent: &dyn SigningAgent,
    ) -> ScribeResult<Self> {
        let mut known_hosts = config.known_hosts()?;
        let mut transport = Transport::connect(
            host,
            port,
            config.transport_config(),
            &mut known_hosts,
            host_prompt,
        )
        .await?;

        let auth = AuthConfig {
            username: username.to_string(),
            password_attempts: config.password_attempts,
        };
        negotiator::authenticate(&mut transport, host, &auth, agent, credential_prompt).await?;

        let server_host_key = transport.server_host_key().unwrap_or_default().to_vec();
        let mux = Multiplexer::start(transport)?;
        info!(host, port, user = username, "connection ready");
        Ok(Self {
            mux,
            host: host.to_string(),
            port,
            username: username.to_string(),
            server_host_key,
        })
    }

    /// Authenticates over a transport the caller already established.
    /// For tests and embedders that own connection setup.
    pub async fn from_transport(
        mut transport: Transport,
        host: &str,
        port: u16,
        username: &str,
        config: &SshClientConfig,
        agent: &dyn SigningAgent,
        credential_prompt: &dyn CredentialPrompt,
    ) -> ScribeResult<Self> {
        let auth = AuthConfig {
            username: username.to_string(),
            password_attempts: config.password_attempts,
        };
        negotiator::authenticate(&mut transport, host, &auth, agent, credential_prompt).await?;
        let server_host_key = transport.server_host_key().unwrap_or_default().to_vec();
        let mux = Multiplexer::start(transport)?;
        Ok(Self {
            mux,
            host: host.to_string(),
            port,
            username: username.to_string(),
            server_host_key,
        })
    }

    /// Host this client is connected to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port this client is connected to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Authenticated account name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The server's host key blob, as verified at connect time.
    pub fn server_host_key(&self) -> &[u8] {
        &self.server_host_key
    }

    /// Opens an interactive session channel.
    pub async fn open_session(&self) -> ScribeResult<SessionChannel> {
        let channel = self.mux.open_channel("session").await?;
        Ok(SessionChannel::new(channel))
    }

    /// Opens a file transfer session.
    pub async fn open_sftp(&self) -> ScribeResult<SftpClient> {
        let channel = self.mux.open_channel("session").await?;
        let mut session = SessionChannel::new(channel);
        session.subsystem("sftp").await?;
        SftpClient::start(session.into_channel()).await
    }

    /// Disconnects the whole connection; every channel on it closes.
    pub async fn disconnect(&self) -> ScribeResult<()> {
        self.mux.disconnect("closed by user").await
    }
}
