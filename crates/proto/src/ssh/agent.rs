//! Key agent client.
//!
//! Talks the agent protocol over a Unix socket: list identities
//! (request 11, answer 12) and sign (request 13, answer 14, refusal 5).
//! Private keys never leave the agent; the engine only ever sees public
//! blobs and finished signatures.

use crate::ssh::codec;
use async_trait::async_trait;
use scribe_platform::{ScribeError, ScribeResult};
use tracing::debug;

const AGENT_FAILURE: u8 = 5;
const AGENT_REQUEST_IDENTITIES: u8 = 11;
const AGENT_IDENTITIES_ANSWER: u8 = 12;
const AGENT_SIGN_REQUEST: u8 = 13;
const AGENT_SIGN_RESPONSE: u8 = 14;

/// Reply size bound; a well-behaved agent stays far below this.
const MAX_AGENT_REPLY: usize = 1024 * 1024;

/// One key held by an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    /// Public key blob (algorithm name embedded).
    pub key_blob: Vec<u8>,
    /// Human-readable comment.
    pub comment: String,
}

/// A source of identities and signatures.
///
/// The production implementation is [`UnixAgentClient`]; tests supply
/// in-process signers.
#[async_trait]
pub trait SigningAgent: Send + Sync {
    /// Lists the identities the agent holds.
    async fn list_identities(&self) -> ScribeResult<Vec<AgentIdentity>>;

    /// Signs `data` with the key behind `identity`.
    ///
    /// The returned blob is the wire-format signature (algorithm name
    /// embedded). A refusal is an error.
    async fn sign(&self, identity: &AgentIdentity, data: &[u8]) -> ScribeResult<Vec<u8>>;
}

/// An agent with no keys, for configurations without one.
#[derive(Debug, Default)]
pub struct NoAgent;

#[async_trait]
impl SigningAgent for NoAgent {
    async fn list_identities(&self) -> ScribeResult<Vec<AgentIdentity>> {
        Ok(Vec::new())
    }

    async fn sign(&self, _identity: &AgentIdentity, _data: &[u8]) -> ScribeResult<Vec<u8>> {
        Err(ScribeError::Protocol("no agent available".to_string()))
    }
}

/// Client for an agent listening on a Unix socket.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixAgentClient {
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl UnixAgentClient {
    /// Client for the agent at `path`.
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Client for the agent named by `SSH_AUTH_SOCK`, if set.
    pub fn from_env() -> Option<Self> {
        std::env::var_os("SSH_AUTH_SOCK").map(Self::new)
    }

    /// One framed request, one framed reply. The agent protocol is
    /// strictly request-response, so a fresh connection per exchange
    /// keeps framing state trivial.
    async fn roundtrip(&self, request: &[u8]) -> ScribeResult<Vec<u8>> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut stream = tokio::net::UnixStream::connect(&self.path).await?;

        let mut framed = Vec::with_capacity(4 + request.len());
        codec::write_u32(&mut framed, request.len() as u32);
        framed.extend_from_slice(request);
        stream.write_all(&framed).await?;

        let mut length_field = [0u8; 4];
        stream.read_exact(&mut length_field).await?;
        let length = u32::from_be_bytes(length_field) as usize;
        if length == 0 || length > MAX_AGENT_REPLY {
            return Err(ScribeError::Protocol(format!(
                "agent reply length {} out of range",
                length
            )));
        }

        let mut reply = vec![0u8; length];
        stream.read_exact(&mut reply).await?;
        Ok(reply)
    }
}

#[cfg(unix)]
#[async_trait]
impl SigningAgent for UnixAgentClient {
    async fn list_identities(&self) -> ScribeResult<Vec<AgentIdentity>> {
        let reply = self.roundtrip(&[AGENT_REQUEST_IDENTITIES]).await?;
        let mut offset = 0;
        let code = codec::read_u8(&reply, &mut offset)?;
        if code != AGENT_IDENTITIES_ANSWER {
            return Err(ScribeError::Protocol(format!(
                "unexpected agent reply {} to identity request",
                code
            )));
        }

        let count = codec::read_u32(&reply, &mut offset)? as usize;
        if count > reply.len() / 8 + 1 {
            return Err(ScribeError::Protocol(format!(
                "agent declares {} identities in {} bytes",
                count,
                reply.len()
            )));
        }
        let mut identities = Vec::with_capacity(count);
        for _ in 0..count {
            let key_blob = codec::read_string(&reply, &mut offset)?;
            let comment = codec::read_utf8_string(&reply, &mut offset)?;
            identities.push(AgentIdentity { key_blob, comment });
        }
        debug!(count = identities.len(), "agent identities listed");
        Ok(identities)
    }

    async fn sign(&self, identity: &AgentIdentity, data: &[u8]) -> ScribeResult<Vec<u8>> {
        let mut request = Vec::new();
        codec::write_u8(&mut request, AGENT_SIGN_REQUEST);
        codec::write_string(&mut request, &identity.key_blob);
        codec::write_string(&mut request, data);
        codec::write_u32(&mut request, 0); // flags

        let reply = self.roundtrip(&request).await?;
        let mut offset = 0;
        match codec::read_u8(&reply, &mut offset)? {
            AGENT_SIGN_RESPONSE => codec::read_string(&reply, &mut offset),
            AGENT_FAILURE => Err(ScribeError::Protocol(format!(
                "agent refused to sign with key '{}'",
                identity.comment
            ))),
            other => Err(ScribeError::Protocol(format!(
                "unexpected agent reply {} to sign request",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_agent_has_no_identities() {
        let agent = NoAgent;
        assert!(agent.list_identities().await.unwrap().is_empty());
        let identity = AgentIdentity {
            key_blob: vec![1],
            comment: "test".to_string(),
        };
        assert!(agent.sign(&identity, b"data").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_agent_protocol_round_trip() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = std::env::temp_dir().join(format!("scribe-agent-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sock = dir.join("agent.sock");
        let _ = std::fs::remove_file(&sock);
        let listener = tokio::net::UnixListener::bind(&sock).unwrap();

        // Scripted agent: one identity, then one signature.
        let server = tokio::spawn(async move {
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut length_field = [0u8; 4];
                stream.read_exact(&mut length_field).await.unwrap();
                let mut request = vec![0u8; u32::from_be_bytes(length_field) as usize];
                stream.read_exact(&mut request).await.unwrap();

                let mut reply = Vec::new();
                match request[0] {
                    AGENT_REQUEST_IDENTITIES => {
                        codec::write_u8(&mut reply, AGENT_IDENTITIES_ANSWER);
                        codec::write_u32(&mut reply, 1);
                        codec::write_string(&mut reply, b"blob-bytes");
                        codec::write_string(&mut reply, b"test-key");
                    }
                    AGENT_SIGN_REQUEST => {
                        let mut offset = 1;
                        let blob = codec::read_string(&request, &mut offset).unwrap();
                        assert_eq!(blob, b"blob-bytes");
                        codec::write_u8(&mut reply, AGENT_SIGN_RESPONSE);
                        codec::write_string(&mut reply, b"signature-bytes");
                    }
                    other => panic!("unexpected request {}", other),
                }

                let mut framed = Vec::new();
                codec::write_u32(&mut framed, reply.len() as u32);
                framed.extend_from_slice(&reply);
                stream.write_all(&framed).await.unwrap();
            }
        });

        let client = UnixAgentClient::new(&sock);
        let identities = client.list_identities().await.unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].comment, "test-key");

        let signature = client.sign(&identities[0], b"to-sign").await.unwrap();
        assert_eq!(signature, b"signature-bytes");

        server.await.unwrap();
        let _ = std::fs::remove_file(&sock);
    }
}
