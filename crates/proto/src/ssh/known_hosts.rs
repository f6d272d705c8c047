//! Persisted host identities and the trust-on-first-use policy.
//!
//! The store is a line-oriented text file, one entry per line:
//!
//! ```text
//! host[:port] key-algorithm base64-key
//! ```
//!
//! The port suffix is omitted for the default port 22. Lines starting
//! with `#` and blank lines are ignored on load and preserved-by-rewrite
//! is not attempted; saving emits only live entries.
//!
//! Verification policy (trust-on-first-use):
//!
//! - known host, same key → proceed, no prompt
//! - unknown host → prompt; user chooses remember / use once / abort
//! - known host, *different* key → prompt with a strong warning; user
//!   chooses accept-and-update / abort
//!
//! The store is mutated only through explicit user-approved updates.

use crate::ssh::hostkey;
use async_trait::async_trait;
use base64::Engine;
use scribe_platform::{ScribeError, ScribeResult};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default port elided from the host field.
const DEFAULT_PORT: u16 = 22;

/// One persisted host identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownHostEntry {
    /// Hostname as written by the user.
    pub host: String,
    /// Port the identity was seen on.
    pub port: u16,
    /// Key algorithm name (e.g. "ssh-ed25519").
    pub algorithm: String,
    /// Raw public key blob.
    pub key: Vec<u8>,
}

impl KnownHostEntry {
    fn host_field(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Formats the entry as one file line.
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {}",
            self.host_field(),
            self.algorithm,
            base64::engine::general_purpose::STANDARD.encode(&self.key)
        )
    }

    /// Parses one file line.
    pub fn parse_line(line: &str) -> ScribeResult<Self> {
        let mut fields = line.split_whitespace();
        let host_field = fields
            .next()
            .ok_or_else(|| ScribeError::Config("known-hosts line missing host".to_string()))?;
        let algorithm = fields
            .next()
            .ok_or_else(|| ScribeError::Config("known-hosts line missing algorithm".to_string()))?
            .to_string();
        let key_b64 = fields
            .next()
            .ok_or_else(|| ScribeError::Config("known-hosts line missing key".to_string()))?;

        let (host, port) = match host_field.rsplit_once(':') {
            Some((host, port_str)) => match port_str.parse::<u16>() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (host_field.to_string(), DEFAULT_PORT),
            },
            None => (host_field.to_string(), DEFAULT_PORT),
        };

        let key = base64::engine::general_purpose::STANDARD
            .decode(key_b64)
            .map_err(|_| ScribeError::Config("known-hosts line has invalid base64".to_string()))?;

        Ok(Self {
            host,
            port,
            algorithm,
            key,
        })
    }
}

/// Result of checking a presented key against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyStatus {
    /// Host present with the same key.
    Known,
    /// Host not present.
    Unknown,
    /// Host present with a different key.
    Changed {
        /// Algorithm of the stored key.
        old_algorithm: String,
        /// Stored key blob.
        old_key: Vec<u8>,
    },
}

/// User decision for a host never seen before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownHostDecision {
    /// Accept and persist the identity.
    Remember,
    /// Accept for this connection only.
    UseOnce,
    /// Refuse the connection.
    Abort,
}

/// User decision for a host whose key no longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangedKeyDecision {
    /// Replace the stored identity with the presented one.
    AcceptAndUpdate,
    /// Refuse the connection.
    Abort,
}

/// Host-identity prompt surface, implemented by the host application.
#[async_trait]
pub trait HostKeyPrompt: Send + Sync {
    /// Asks about a host with no stored identity.
    async fn unknown_host(
        &self,
        host: &str,
        port: u16,
        algorithm: &str,
        fingerprint: &str,
    ) -> UnknownHostDecision;

    /// Asks about a host whose presented key differs from the stored one.
    /// Implementations should display a strong warning.
    async fn changed_host(
        &self,
        host: &str,
        port: u16,
        algorithm: &str,
        fingerprint: &str,
    ) -> ChangedKeyDecision;
}

/// A prompt that refuses everything; the default when no UI is wired up.
#[derive(Debug, Default)]
pub struct RejectingPrompt;

#[async_trait]
impl HostKeyPrompt for RejectingPrompt {
    async fn unknown_host(&self, _: &str, _: u16, _: &str, _: &str) -> UnknownHostDecision {
        UnknownHostDecision::Abort
    }

    async fn changed_host(&self, _: &str, _: u16, _: &str, _: &str) -> ChangedKeyDecision {
        ChangedKeyDecision::Abort
    }
}

/// The known-hosts store.
#[derive(Debug, Default)]
pub struct KnownHostsStore {
    path: Option<PathBuf>,
    entries: Vec<KnownHostEntry>,
}

impl KnownHostsStore {
    /// Creates an empty in-memory store that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the store from `path`. A missing file yields an empty store
    /// that will be created on first save.
    pub fn load(path: impl AsRef<Path>) -> ScribeResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut entries = Vec::new();

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                for line in content.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    match KnownHostEntry::parse_line(line) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => warn!("skipping malformed known-hosts line: {}", e),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ScribeError::Io(e)),
        }

        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes all entries back to the backing file, if any.
    pub fn save(&self) -> ScribeResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut content = String::new();
        for entry in &self.entries {
            content.push_str(&entry.to_line());
            content.push('\n');
        }
        std::fs::write(path, content).map_err(ScribeError::Io)
    }

    /// Checks a presented key against the store.
    pub fn status(&self, host: &str, port: u16, key: &[u8]) -> HostKeyStatus {
        match self
            .entries
            .iter()
            .find(|e| e.host == host && e.port == port)
        {
            None => HostKeyStatus::Unknown,
            Some(entry) if entry.key == key => HostKeyStatus::Known,
            Some(entry) => HostKeyStatus::Changed {
                old_algorithm: entry.algorithm.clone(),
                old_key: entry.key.clone(),
            },
        }
    }

    /// Appends a new identity and persists the store.
    pub fn remember(
        &mut self,
        host: &str,
        port: u16,
        algorithm: &str,
        key: &[u8],
    ) -> ScribeResult<()> {
        self.entries.push(KnownHostEntry {
            host: host.to_string(),
            port,
            algorithm: algorithm.to_string(),
            key: key.to_vec(),
        });
        self.save()
    }

    /// Replaces the stored identity for `host:port` and persists.
    pub fn update(
        &mut self,
        host: &str,
        port: u16,
        algorithm: &str,
        key: &[u8],
    ) -> ScribeResult<()> {
        self.entries.retain(|e| !(e.host == host && e.port == port));
        self.remember(host, port, algorithm, key)
    }

    /// Applies the trust-on-first-use policy to a presented host key.
    ///
    /// Prompts through `prompt` when a decision is needed. An abort (or
    /// a changed key without an explicit override) surfaces as
    /// [`ScribeError::HostKeyUnknown`] / [`ScribeError::HostKeyChanged`].
    pub async fn verify(
        &mut self,
        host: &str,
        port: u16,
        algorithm: &str,
        key: &[u8],
        prompt: &dyn HostKeyPrompt,
    ) -> ScribeResult<()> {
        match self.status(host, port, key) {
            HostKeyStatus::Known => Ok(()),
            HostKeyStatus::Unknown => {
                let fp = hostkey::fingerprint(key);
                match prompt.unknown_host(host, port, algorithm, &fp).await {
                    UnknownHostDecision::Remember => {
                        info!(host, port, "remembering new host identity");
                        self.remember(host, port, algorithm, key)
                    }
                    UnknownHostDecision::UseOnce => Ok(()),
                    UnknownHostDecision::Abort => Err(ScribeError::HostKeyUnknown(format!(
                        "{}:{} ({})",
                        host, port, fp
                    ))),
                }
            }
            HostKeyStatus::Changed { old_algorithm, .. } => {
                let fp = hostkey::fingerprint(key);
                warn!(
                    host,
                    port, old_algorithm, "host identity changed, possible impersonation"
                );
                match prompt.changed_host(host, port, algorithm, &fp).await {
                    ChangedKeyDecision::AcceptAndUpdate => {
                        self.update(host, port, algorithm, key)
                    }
                    ChangedKeyDecision::Abort => Err(ScribeError::HostKeyChanged(format!(
                        "{}:{} now presents {} ({})",
                        host, port, algorithm, fp
                    ))),
                }
            }
        }
    }
}
