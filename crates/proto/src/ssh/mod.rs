//! SSH2 client engine (RFC 4250-4254) for remote editing.
//!
//! Layered bottom-up:
//!
//! - [`codec`]: wire primitives (byte, boolean, uint32, uint64, string,
//!   name-list, mpint)
//! - [`message`]: message type numbers
//! - [`packet`]: binary packet framing, padding, compression
//! - [`version`]: identification line exchange
//! - [`kex`], [`kex_dh`]: algorithm negotiation and Diffie-Hellman key
//!   exchange
//! - [`crypto`]: block ciphers and MACs for the transport
//! - [`hostkey`]: host key algorithms, fingerprints, signature checks
//! - [`known_hosts`]: trust-on-first-use host identity store
//! - [`transport`]: the connection state machine and encrypted packet
//!   I/O
//! - [`auth`], [`negotiator`], [`agent`]: authentication messages, the
//!   method ladder, and the key agent client
//! - [`connection`], [`channel`], [`mux`]: channel messages, flow
//!   control, and the per-connection dispatcher
//! - [`session`], [`sftp`]: the interactive session vocabulary and the
//!   file transfer subsystem
//! - [`client`], [`registry`]: the user-facing client and shared
//!   connection registry

pub mod agent;
pub mod auth;
pub mod channel;
pub mod client;
pub mod codec;
pub mod connection;
pub mod crypto;
pub mod hostkey;
pub mod kex;
pub mod kex_dh;
pub mod known_hosts;
pub mod message;
pub mod mux;
pub mod negotiator;
pub mod packet;
pub mod registry;
pub mod session;
pub mod sftp;
pub mod transport;
pub mod version;

pub use agent::{AgentIdentity, SigningAgent};
pub use channel::Channel;
pub use client::{SshClient, SshClientConfig};
pub use known_hosts::{HostKeyPrompt, KnownHostsStore};
pub use mux::{ChannelEvent, Multiplexer};
pub use negotiator::CredentialPrompt;
pub use registry::{ConnectionKey, ConnectionRegistry};
pub use session::{SessionChannel, SessionEvent};
pub use sftp::SftpClient;
pub use transport::{Transport, TransportConfig};
