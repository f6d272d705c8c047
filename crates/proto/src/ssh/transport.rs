//! Transport connection: socket lifecycle, key exchange, encrypted
//! packet I/O (RFC 4253).
//!
//! A [`Transport`] advances through an explicit state machine:
//!
//! ```text
//! Resolving → Connecting → VersionExchange → KeyExchange → NewKeys
//!     → ServiceRequest → Authenticating → Authenticated → Disconnected
//! ```
//!
//! Every legal transition is enumerated in [`State::can_transition_to`];
//! a message that is illegal for the current state is a protocol error
//! and forces disconnect. Each direction owns a cipher context, a MAC
//! context, and a strictly increasing sequence counter; an increment
//! that would wrap is an error rather than a silent wraparound.
//!
//! Outbound path: compress (when negotiated) → wrap → MAC over
//! (sequence ∥ plaintext) → encrypt → write ciphertext ∥ tag. Inbound:
//! read one cipher block to learn the declared length, read and decrypt
//! the remainder, verify the MAC *before* trusting the payload, then
//! unwrap and decompress.
//!
//! Once authenticated, [`Transport::split`] separates the directions so
//! a dispatcher task can read while channel handles write.
//!
//! # Security
//!
//! - Declared packet lengths are bounded before allocation.
//! - A MAC mismatch is fatal and never retried.
//! - The session identifier is the exchange hash of the first key
//!   exchange and is never replaced.

use crate::ssh::codec;
use crate::ssh::crypto::{CbcCipher, CipherAlgorithm, MacAlgorithm, MacKey, AES_BLOCK_SIZE};
use crate::ssh::hostkey::{self, Ed25519HostKey};
use crate::ssh::kex::{negotiate_algorithm, KexInit, NewKeys};
use crate::ssh::kex_dh::{
    compute_exchange_hash, derive_key, DhExchange, DhGroup, KexDhInit, KexDhReply,
};
use crate::ssh::known_hosts::{HostKeyPrompt, KnownHostsStore};
use crate::ssh::message::MessageType;
use crate::ssh::packet::{Compressor, Packet, MAX_PACKET_SIZE};
use crate::ssh::version::Version;
use scribe_platform::{ScribeError, ScribeResult};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Maximum identification/banner lines tolerated before the version line.
const MAX_PREAMBLE_LINES: usize = 16;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Resolving the host name.
    Resolving,
    /// TCP connect in progress.
    Connecting,
    /// Exchanging identification lines.
    VersionExchange,
    /// Negotiating algorithms and running the key exchange.
    KeyExchange,
    /// Keys derived, waiting to take effect.
    NewKeys,
    /// Requesting the authentication service.
    ServiceRequest,
    /// Authentication in progress.
    Authenticating,
    /// Steady state; channels operate.
    Authenticated,
    /// Torn down.
    Disconnected,
}

impl State {
    /// Returns `true` if `next` is a legal successor of this state.
    ///
    /// Every state may fall to `Disconnected`.
    pub fn can_transition_to(&self, next: State) -> bool {
        if next == State::Disconnected {
            return true;
        }
        matches!(
            (self, next),
            (State::Resolving, State::Connecting)
                | (State::Connecting, State::VersionExchange)
                | (State::VersionExchange, State::KeyExchange)
                | (State::KeyExchange, State::NewKeys)
                | (State::NewKeys, State::ServiceRequest)
                | (State::ServiceRequest, State::Authenticating)
                | (State::Authenticating, State::Authenticated)
        )
    }

    /// Returns the state name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            State::Resolving => "Resolving",
            State::Connecting => "Connecting",
            State::VersionExchange => "VersionExchange",
            State::KeyExchange => "KeyExchange",
            State::NewKeys => "NewKeys",
            State::ServiceRequest => "ServiceRequest",
            State::Authenticating => "Authenticating",
            State::Authenticated => "Authenticated",
            State::Disconnected => "Disconnected",
        }
    }
}

/// Algorithms fixed by negotiation.
#[derive(Debug, Clone)]
pub struct NegotiatedAlgorithms {
    /// Key exchange group and hash.
    pub kex: DhGroup,
    /// Host key algorithm name.
    pub host_key: String,
    /// Cipher, client to server.
    pub cipher_c2s: CipherAlgorithm,
    /// Cipher, server to client.
    pub cipher_s2c: CipherAlgorithm,
    /// MAC, client to server.
    pub mac_c2s: MacAlgorithm,
    /// MAC, server to client.
    pub mac_s2c: MacAlgorithm,
    /// Compression, client to server.
    pub compression_c2s: Compressor,
    /// Compression, server to client.
    pub compression_s2c: Compressor,
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Software version advertised in the identification line.
    pub software_version: String,
    /// Prefer zlib compression during negotiation.
    pub prefer_zlib: bool,
    /// Key exchange preference list, most preferred first.
    pub kex_algorithms: Vec<String>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Coarse "no response within N seconds" bound, applied while the
    /// connection is being established and authenticated.
    pub response_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            software_version: format!("Scribe_{}", env!("CARGO_PKG_VERSION")),
            prefer_zlib: false,
            kex_algorithms: KexInit::default_kex_algorithms(),
            connect_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(60),
        }
    }
}

/// Which side of the connection this transport is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The connecting client.
    Client,
    /// The accepting server (in-process peers and tests).
    Server,
}

/// The inbound half: decrypts, verifies, and unwraps packets.
pub struct TransportReader {
    stream: OwnedReadHalf,
    seq_in: u32,
    cipher_in: Option<CbcCipher>,
    mac_in: Option<MacKey>,
    compressor_in: Compressor,
}

impl TransportReader {
    fn new(stream: OwnedReadHalf) -> Self {
        Self {
            stream,
            seq_in: 0,
            cipher_in: None,
            mac_in: None,
            compressor_in: Compressor::None,
        }
    }

    async fn read_line(&mut self) -> ScribeResult<String> {
        let mut buffer = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.stream.read_exact(&mut byte).await?;
            buffer.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
            if buffer.len() > 255 {
                return Err(ScribeError::Protocol(
                    "identification line too long".to_string(),
                ));
            }
        }
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Receives one packet payload, verifying integrity before
    /// returning. Any error is fatal to the connection.
    pub async fn recv_payload(&mut self) -> ScribeResult<Vec<u8>> {
        let framed = if self.cipher_in.is_some() {
            // First block carries the encrypted length field.
            let mut first = [0u8; AES_BLOCK_SIZE];
            self.stream.read_exact(&mut first).await?;
            let cipher = self
                .cipher_in
                .as_mut()
                .ok_or_else(|| ScribeError::Protocol("cipher context missing".to_string()))?;
            cipher.decrypt(&mut first)?;

            let declared = u32::from_be_bytes([first[0], first[1], first[2], first[3]]) as usize;
            if declared < 2 || declared > MAX_PACKET_SIZE {
                return Err(ScribeError::Protocol(format!(
                    "declared packet length {} out of range",
                    declared
                )));
            }
            let total = 4 + declared;
            if total % AES_BLOCK_SIZE != 0 || total < AES_BLOCK_SIZE {
                return Err(ScribeError::Protocol(format!(
                    "packet length {} not block aligned",
                    total
                )));
            }

            let mut rest = vec![0u8; total - AES_BLOCK_SIZE];
            self.stream.read_exact(&mut rest).await?;
            let cipher = self
                .cipher_in
                .as_mut()
                .ok_or_else(|| ScribeError::Protocol("cipher context missing".to_string()))?;
            cipher.decrypt(&mut rest)?;

            let mut framed = Vec::with_capacity(total);
            framed.extend_from_slice(&first);
            framed.extend_from_slice(&rest);

            let mac = self
                .mac_in
                .as_ref()
                .ok_or_else(|| ScribeError::Protocol("MAC context missing".to_string()))?;
            let mut tag = vec![0u8; mac.algorithm().tag_len()];
            self.stream.read_exact(&mut tag).await?;
            mac.verify(self.seq_in, &framed, &tag)?;
            framed
        } else {
            let mut length_field = [0u8; 4];
            self.stream.read_exact(&mut length_field).await?;
            let declared = u32::from_be_bytes(length_field) as usize;
            if declared < 2 || declared > MAX_PACKET_SIZE {
                return Err(ScribeError::Protocol(format!(
                    "declared packet length {} out of range",
                    declared
                )));
            }
            let mut rest = vec![0u8; declared];
            self.stream.read_exact(&mut rest).await?;

            let mut framed = Vec::with_capacity(4 + declared);
            framed.extend_from_slice(&length_field);
            framed.extend_from_slice(&rest);
            framed
        };

        self.seq_in = self.seq_in.checked_add(1).ok_or_else(|| {
            ScribeError::Protocol("inbound sequence number would wrap".to_string())
        })?;

        let payload = Packet::unwrap(&framed)?.into_payload();
        self.compressor_in.decompress(&payload)
    }

    /// Receives the next substantive message, consuming transparent
    /// ones (`IGNORE`, `DEBUG`) and turning `DISCONNECT` into an error.
    pub async fn recv_message(&mut self) -> ScribeResult<(MessageType, Vec<u8>)> {
        loop {
            let payload = self.recv_payload().await?;
            let Some(&first) = payload.first() else {
                return Err(ScribeError::Protocol("empty packet payload".to_string()));
            };
            let Some(msg_type) = MessageType::from_u8(first) else {
                return Err(ScribeError::Protocol(format!(
                    "unknown message type {}",
                    first
                )));
            };

            match msg_type {
                MessageType::Ignore => continue,
                MessageType::Debug => {
                    let mut offset = 1;
                    let _always_display = codec::read_boolean(&payload, &mut offset)?;
                    let message = codec::read_utf8_string(&payload, &mut offset)?;
                    debug!(peer_debug = %message, "peer debug message");
                    continue;
                }
                MessageType::Disconnect => {
                    let mut offset = 1;
                    let reason = codec::read_u32(&payload, &mut offset)?;
                    let description = codec::read_utf8_string(&payload, &mut offset)?;
                    return Err(ScribeError::Protocol(format!(
                        "peer disconnected (reason {}): {}",
                        reason, description
                    )));
                }
                _ => return Ok((msg_type, payload)),
            }
        }
    }

    /// Inbound packet counter.
    pub fn sequence_in(&self) -> u32 {
        self.seq_in
    }
}

/// The outbound half: wraps, protects, and writes packets.
pub struct TransportWriter {
    stream: OwnedWriteHalf,
    seq_out: u32,
    cipher_out: Option<CbcCipher>,
    mac_out: Option<MacKey>,
    compressor_out: Compressor,
}

impl TransportWriter {
    fn new(stream: OwnedWriteHalf) -> Self {
        Self {
            stream,
            seq_out: 0,
            cipher_out: None,
            mac_out: None,
            compressor_out: Compressor::None,
        }
    }

    /// Sends one payload as a framed (and, once keys are active,
    /// encrypted and MAC-protected) packet.
    pub async fn send_payload(&mut self, payload: &[u8]) -> ScribeResult<()> {
        let payload = self.compressor_out.compress(payload)?;

        let block_size = if self.cipher_out.is_some() {
            AES_BLOCK_SIZE
        } else {
            8
        };
        let mut framed = Packet::wrap(&payload, block_size)?;

        let tag = self
            .mac_out
            .as_ref()
            .map(|mac| mac.compute(self.seq_out, &framed));

        if let Some(cipher) = self.cipher_out.as_mut() {
            cipher.encrypt(&mut framed)?;
        }

        self.stream.write_all(&framed).await?;
        if let Some(tag) = tag {
            self.stream.write_all(&tag).await?;
        }
        self.stream.flush().await?;

        self.seq_out = self.seq_out.checked_add(1).ok_or_else(|| {
            ScribeError::Protocol("outbound sequence number would wrap".to_string())
        })?;
        Ok(())
    }

    /// Sends a DISCONNECT message and closes the outbound direction.
    pub async fn send_disconnect(&mut self, description: &str) -> ScribeResult<()> {
        let mut payload = Vec::new();
        codec::write_u8(&mut payload, MessageType::Disconnect as u8);
        codec::write_u32(&mut payload, 11); // SSH_DISCONNECT_BY_APPLICATION
        codec::write_string(&mut payload, description.as_bytes());
        codec::write_string(&mut payload, b"");
        let _ = self.send_payload(&payload).await;
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    /// Outbound packet counter.
    pub fn sequence_out(&self) -> u32 {
        self.seq_out
    }
}

/// An established (or establishing) transport connection.
pub struct Transport {
    reader: TransportReader,
    writer: TransportWriter,
    role: Role,
    config: TransportConfig,
    state: State,
    session_id: Option<Vec<u8>>,
    negotiated: Option<NegotiatedAlgorithms>,
    server_host_key: Option<Vec<u8>>,
    local_version: String,
    peer_version: String,
}

impl Transport {
    fn new(stream: TcpStream, role: Role, config: TransportConfig, state: State) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: TransportReader::new(read_half),
            writer: TransportWriter::new(write_half),
            role,
            config,
            state,
            session_id: None,
            negotiated: None,
            server_host_key: None,
            local_version: String::new(),
            peer_version: String::new(),
        }
    }

    /// Connects to `host:port` and completes version exchange, key
    /// exchange, host verification, and the service request, leaving the
    /// transport in `Authenticating`.
    pub async fn connect(
        host: &str,
        port: u16,
        config: TransportConfig,
        known_hosts: &mut KnownHostsStore,
        prompt: &dyn HostKeyPrompt,
    ) -> ScribeResult<Self> {
        debug!(host, port, "resolving");
        let mut addrs = tokio::net::lookup_host((host, port)).await?;
        let addr = addrs.next().ok_or_else(|| {
            ScribeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address for {}", host),
            ))
        })?;

        let connect_timeout = config.connect_timeout;
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                ScribeError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connection timeout",
                ))
            })??;
        stream.set_nodelay(true)?;

        let mut transport = Self::new(stream, Role::Client, config, State::Resolving);
        transport.transition(State::Connecting)?;
        transport
            .handshake_client(host, port, known_hosts, prompt)
            .await?;
        Ok(transport)
    }

    /// Client handshake over an already-connected stream.
    ///
    /// Useful when the caller owns connection establishment; `host` and
    /// `port` are used for host-identity verification only.
    pub async fn handshake(
        stream: TcpStream,
        host: &str,
        port: u16,
        config: TransportConfig,
        known_hosts: &mut KnownHostsStore,
        prompt: &dyn HostKeyPrompt,
    ) -> ScribeResult<Self> {
        let mut transport = Self::new(stream, Role::Client, config, State::Resolving);
        transport.transition(State::Connecting)?;
        transport
            .handshake_client(host, port, known_hosts, prompt)
            .await?;
        Ok(transport)
    }

    /// Server side of the handshake, for in-process peers.
    ///
    /// Accepts one connection's version exchange and key exchange,
    /// signing with `host_key`, and answers the authentication service
    /// request, leaving the transport in `Authenticating`.
    pub async fn accept(
        stream: TcpStream,
        config: TransportConfig,
        host_key: &Ed25519HostKey,
    ) -> ScribeResult<Self> {
        let mut transport = Self::new(stream, Role::Server, config, State::Resolving);
        transport.transition(State::Connecting)?;
        transport.handshake_server(host_key).await?;
        Ok(transport)
    }

    async fn handshake_client(
        &mut self,
        host: &str,
        port: u16,
        known_hosts: &mut KnownHostsStore,
        prompt: &dyn HostKeyPrompt,
    ) -> ScribeResult<()> {
        self.transition(State::VersionExchange)?;
        self.exchange_versions().await?;

        self.transition(State::KeyExchange)?;
        let (kexinit_ours, kexinit_theirs) = self.exchange_kexinit().await?;
        let negotiated = self.negotiate(&kexinit_ours, &kexinit_theirs)?;
        info!(
            kex = negotiated.kex.name(),
            cipher = negotiated.cipher_c2s.name(),
            mac = negotiated.mac_c2s.name(),
            "algorithms negotiated"
        );

        // DH: send e, receive host key / f / signature.
        let exchange = DhExchange::new(negotiated.kex)?;
        let init = KexDhInit {
            public_value: exchange.public_value(),
        };
        self.send_payload(&init.to_bytes()).await?;

        let reply_payload = self.recv_expected(MessageType::KexDhReply).await?;
        let reply = KexDhReply::from_bytes(&reply_payload)?;
        let shared = exchange.compute_shared(&reply.public_value)?;

        let exchange_hash = compute_exchange_hash(
            negotiated.kex,
            &self.local_version,
            &self.peer_version,
            &kexinit_ours.to_bytes(),
            &kexinit_theirs.to_bytes(),
            &reply.host_key,
            &exchange.public_value(),
            &reply.public_value,
            &shared,
        );

        hostkey::verify_signature(&reply.host_key, &reply.signature, &exchange_hash)?;
        debug!("host key signature verified");

        let algorithm = hostkey::algorithm_from_blob(&reply.host_key)?;
        known_hosts
            .verify(host, port, algorithm.name(), &reply.host_key, prompt)
            .await?;
        self.server_host_key = Some(reply.host_key.clone());

        self.finish_kex(&negotiated, &shared, &exchange_hash).await?;

        // Request the authentication service.
        self.transition(State::ServiceRequest)?;
        let mut request = Vec::new();
        codec::write_u8(&mut request, MessageType::ServiceRequest as u8);
        codec::write_string(&mut request, b"ssh-userauth");
        self.send_payload(&request).await?;

        let accept = self.recv_expected(MessageType::ServiceAccept).await?;
        let mut offset = 1;
        let service = codec::read_utf8_string(&accept, &mut offset)?;
        if service != "ssh-userauth" {
            return self
                .fail_protocol(format!("unexpected service accepted: {}", service))
                .await;
        }

        self.transition(State::Authenticating)?;
        Ok(())
    }

    async fn handshake_server(&mut self, host_key: &Ed25519HostKey) -> ScribeResult<()> {
        self.transition(State::VersionExchange)?;
        self.exchange_versions().await?;

        self.transition(State::KeyExchange)?;
        let (kexinit_ours, kexinit_theirs) = self.exchange_kexinit().await?;
        let negotiated = self.negotiate(&kexinit_theirs, &kexinit_ours)?;

        let init_payload = self.recv_expected(MessageType::KexDhInit).await?;
        let init = KexDhInit::from_bytes(&init_payload)?;

        let exchange = DhExchange::new(negotiated.kex)?;
        let shared = exchange.compute_shared(&init.public_value)?;
        let host_key_blob = host_key.public_key_blob();

        let exchange_hash = compute_exchange_hash(
            negotiated.kex,
            &self.peer_version,
            &self.local_version,
            &kexinit_theirs.to_bytes(),
            &kexinit_ours.to_bytes(),
            &host_key_blob,
            &init.public_value,
            &exchange.public_value(),
            &shared,
        );

        let reply = KexDhReply {
            host_key: host_key_blob,
            public_value: exchange.public_value(),
            signature: host_key.sign(&exchange_hash),
        };
        self.send_payload(&reply.to_bytes()).await?;

        self.finish_kex(&negotiated, &shared, &exchange_hash).await?;

        self.transition(State::ServiceRequest)?;
        let request = self.recv_expected(MessageType::ServiceRequest).await?;
        let mut offset = 1;
        let service = codec::read_utf8_string(&request, &mut offset)?;
        if service != "ssh-userauth" {
            return self
                .fail_protocol(format!("unsupported service requested: {}", service))
                .await;
        }
        let mut accept = Vec::new();
        codec::write_u8(&mut accept, MessageType::ServiceAccept as u8);
        codec::write_string(&mut accept, b"ssh-userauth");
        self.send_payload(&accept).await?;

        self.transition(State::Authenticating)?;
        Ok(())
    }

    /// Sends NEWKEYS, waits for the peer's NEWKEYS, and installs the
    /// derived cipher, MAC, and compression contexts.
    async fn finish_kex(
        &mut self,
        negotiated: &NegotiatedAlgorithms,
        shared: &[u8],
        exchange_hash: &[u8],
    ) -> ScribeResult<()> {
        self.send_payload(&NewKeys::new().to_bytes()).await?;
        let newkeys = self.recv_expected(MessageType::NewKeys).await?;
        NewKeys::from_bytes(&newkeys)?;
        self.transition(State::NewKeys)?;

        // The session identifier is fixed by the first exchange.
        let session_id = self
            .session_id
            .get_or_insert_with(|| exchange_hash.to_vec())
            .clone();

        let group = negotiated.kex;
        let derive =
            |letter: u8, needed: usize| derive_key(group, shared, exchange_hash, letter, &session_id, needed);

        // Direction letters: IVs 'A'/'B', cipher keys 'C'/'D', MAC keys
        // 'E'/'F', client-to-server first.
        let iv_c2s = derive(b'A', AES_BLOCK_SIZE);
        let iv_s2c = derive(b'B', AES_BLOCK_SIZE);
        let key_c2s = derive(b'C', negotiated.cipher_c2s.key_len());
        let key_s2c = derive(b'D', negotiated.cipher_s2c.key_len());
        let mac_c2s = derive(b'E', negotiated.mac_c2s.key_len());
        let mac_s2c = derive(b'F', negotiated.mac_s2c.key_len());

        let c2s_cipher = CbcCipher::new(negotiated.cipher_c2s, &key_c2s, &iv_c2s)?;
        let s2c_cipher = CbcCipher::new(negotiated.cipher_s2c, &key_s2c, &iv_s2c)?;
        let c2s_mac = MacKey::new(negotiated.mac_c2s, &mac_c2s)?;
        let s2c_mac = MacKey::new(negotiated.mac_s2c, &mac_s2c)?;

        match self.role {
            Role::Client => {
                self.writer.cipher_out = Some(c2s_cipher);
                self.reader.cipher_in = Some(s2c_cipher);
                self.writer.mac_out = Some(c2s_mac);
                self.reader.mac_in = Some(s2c_mac);
                self.writer.compressor_out = negotiated.compression_c2s;
                self.reader.compressor_in = negotiated.compression_s2c;
            }
            Role::Server => {
                self.writer.cipher_out = Some(s2c_cipher);
                self.reader.cipher_in = Some(c2s_cipher);
                self.writer.mac_out = Some(s2c_mac);
                self.reader.mac_in = Some(c2s_mac);
                self.writer.compressor_out = negotiated.compression_s2c;
                self.reader.compressor_in = negotiated.compression_c2s;
            }
        }

        self.negotiated = Some(negotiated.clone());
        info!("session keys installed");
        Ok(())
    }

    async fn exchange_versions(&mut self) -> ScribeResult<()> {
        let ours = Version::new(&self.config.software_version, None);
        self.local_version = ours.to_string();
        self.writer.stream.write_all(&ours.to_wire_format()).await?;
        self.writer.stream.flush().await?;

        // The peer may send banner lines before its identification line.
        let mut lines = 0;
        let line = loop {
            let line = self.reader.read_line().await?;
            if line.starts_with("SSH-") {
                break line;
            }
            lines += 1;
            if lines > MAX_PREAMBLE_LINES {
                return self
                    .fail_protocol("too many banner lines before version".to_string())
                    .await;
            }
            debug!(banner = %line.trim_end(), "preamble line");
        };

        let peer = Version::parse(&line)?;
        self.peer_version = peer.to_string();
        debug!(peer = %self.peer_version, "version exchanged");
        Ok(())
    }

    async fn exchange_kexinit(&mut self) -> ScribeResult<(KexInit, KexInit)> {
        let ours =
            KexInit::with_preferences(self.config.prefer_zlib, &self.config.kex_algorithms);
        self.send_payload(&ours.to_bytes()).await?;

        let payload = self.recv_expected(MessageType::KexInit).await?;
        let theirs = KexInit::from_bytes(&payload)?;
        Ok((ours, theirs))
    }

    /// Negotiates every category, client preference first.
    fn negotiate(&self, client: &KexInit, server: &KexInit) -> ScribeResult<NegotiatedAlgorithms> {
        let kex_name = negotiate_algorithm(client.kex_algorithms(), server.kex_algorithms())?;
        let kex = DhGroup::from_name(&kex_name).ok_or_else(|| {
            ScribeError::KeyExchange(format!("negotiated unknown kex: {}", kex_name))
        })?;

        let host_key = negotiate_algorithm(
            client.server_host_key_algorithms(),
            server.server_host_key_algorithms(),
        )?;

        let pick_cipher = |c: &[String], s: &[String]| -> ScribeResult<CipherAlgorithm> {
            let name = negotiate_algorithm(c, s)?;
            CipherAlgorithm::from_name(&name).ok_or_else(|| {
                ScribeError::KeyExchange(format!("negotiated unknown cipher: {}", name))
            })
        };
        let pick_mac = |c: &[String], s: &[String]| -> ScribeResult<MacAlgorithm> {
            let name = negotiate_algorithm(c, s)?;
            MacAlgorithm::from_name(&name).ok_or_else(|| {
                ScribeError::KeyExchange(format!("negotiated unknown MAC: {}", name))
            })
        };
        let pick_compression = |c: &[String], s: &[String]| -> ScribeResult<Compressor> {
            let name = negotiate_algorithm(c, s)?;
            Compressor::from_name(&name).ok_or_else(|| {
                ScribeError::KeyExchange(format!("negotiated unknown compression: {}", name))
            })
        };

        Ok(NegotiatedAlgorithms {
            kex,
            host_key,
            cipher_c2s: pick_cipher(
                client.encryption_client_to_server(),
                server.encryption_client_to_server(),
            )?,
            cipher_s2c: pick_cipher(
                client.encryption_server_to_client(),
                server.encryption_server_to_client(),
            )?,
            mac_c2s: pick_mac(client.mac_client_to_server(), server.mac_client_to_server())?,
            mac_s2c: pick_mac(client.mac_server_to_client(), server.mac_server_to_client())?,
            compression_c2s: pick_compression(
                client.compression_client_to_server(),
                server.compression_client_to_server(),
            )?,
            compression_s2c: pick_compression(
                client.compression_server_to_client(),
                server.compression_server_to_client(),
            )?,
        })
    }

    /// Moves to `next`, enforcing the transition table.
    pub fn transition(&mut self, next: State) -> ScribeResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ScribeError::Protocol(format!(
                "illegal state transition {} -> {}",
                self.state.name(),
                next.name()
            )));
        }
        debug!(from = self.state.name(), to = next.name(), "state transition");
        self.state = next;
        Ok(())
    }

    /// Returns the current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Returns the session identifier, fixed at the first key exchange.
    pub fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    /// Returns the server's host key blob, once received.
    pub fn server_host_key(&self) -> Option<&[u8]> {
        self.server_host_key.as_deref()
    }

    /// Returns the negotiated algorithms, once fixed.
    pub fn negotiated(&self) -> Option<&NegotiatedAlgorithms> {
        self.negotiated.as_ref()
    }

    /// Marks authentication complete.
    pub fn mark_authenticated(&mut self) -> ScribeResult<()> {
        self.transition(State::Authenticated)
    }

    /// Splits into independent read and write halves.
    ///
    /// Legal only once authenticated; from here on the dispatcher owns
    /// the reader and channel handles share the writer.
    pub fn split(self) -> ScribeResult<(TransportReader, TransportWriter, Option<Vec<u8>>)> {
        if self.state != State::Authenticated {
            return Err(ScribeError::Protocol(format!(
                "cannot split transport in state {}",
                self.state.name()
            )));
        }
        Ok((self.reader, self.writer, self.session_id))
    }

    /// Sends one payload as a framed packet. See
    /// [`TransportWriter::send_payload`].
    pub async fn send_payload(&mut self, payload: &[u8]) -> ScribeResult<()> {
        self.writer.send_payload(payload).await
    }

    /// Receives one packet payload. See
    /// [`TransportReader::recv_payload`].
    pub async fn recv_payload(&mut self) -> ScribeResult<Vec<u8>> {
        match self.reader.recv_payload().await {
            Ok(payload) => Ok(payload),
            Err(e) => {
                self.teardown().await;
                Err(e)
            }
        }
    }

    /// Receives the next substantive message, enforcing per-state
    /// legality. Transparent messages are consumed; `DISCONNECT` and
    /// protocol violations tear the connection down.
    pub async fn recv_message(&mut self) -> ScribeResult<(MessageType, Vec<u8>)> {
        let result = if self.state == State::Authenticated {
            self.reader.recv_message().await
        } else {
            // Coarse response bound while the connection is being
            // established.
            let timeout = self.config.response_timeout;
            tokio::time::timeout(timeout, self.reader.recv_message())
                .await
                .map_err(|_| {
                    ScribeError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "no response from peer",
                    ))
                })?
        };

        let (msg_type, payload) = match result {
            Ok(ok) => ok,
            Err(e) => {
                self.teardown().await;
                return Err(e);
            }
        };

        if !self.legal_in_state(msg_type) {
            return self
                .fail_protocol(format!(
                    "{} illegal in state {}",
                    msg_type,
                    self.state.name()
                ))
                .await;
        }
        Ok((msg_type, payload))
    }

    /// Receives the next message and requires it to be `expected`.
    pub async fn recv_expected(&mut self, expected: MessageType) -> ScribeResult<Vec<u8>> {
        let (msg_type, payload) = self.recv_message().await?;
        if msg_type != expected {
            return self
                .fail_protocol(format!("expected {}, got {}", expected, msg_type))
                .await;
        }
        Ok(payload)
    }

    /// Per-state legality of substantive inbound messages.
    fn legal_in_state(&self, msg: MessageType) -> bool {
        match self.state {
            State::KeyExchange => matches!(
                msg,
                MessageType::KexInit
                    | MessageType::KexDhInit
                    | MessageType::KexDhReply
                    | MessageType::NewKeys
            ),
            State::NewKeys => matches!(msg, MessageType::NewKeys),
            State::ServiceRequest => {
                matches!(msg, MessageType::ServiceRequest | MessageType::ServiceAccept)
            }
            State::Authenticating => matches!(
                msg,
                MessageType::UserauthRequest
                    | MessageType::UserauthFailure
                    | MessageType::UserauthSuccess
                    | MessageType::UserauthBanner
                    | MessageType::UserauthPkOk
                    | MessageType::UserauthInfoResponse
            ),
            State::Authenticated => {
                msg.is_channel_message()
                    || matches!(
                        msg,
                        MessageType::GlobalRequest
                            | MessageType::RequestSuccess
                            | MessageType::RequestFailure
                    )
            }
            _ => false,
        }
    }

    async fn teardown(&mut self) {
        self.state = State::Disconnected;
        let _ = self.writer.stream.shutdown().await;
    }

    /// Records a protocol violation, tears the connection down, and
    /// returns the error.
    async fn fail_protocol<T>(&mut self, message: String) -> ScribeResult<T> {
        warn!(%message, "protocol error, disconnecting");
        self.teardown().await;
        Err(ScribeError::Protocol(message))
    }

    /// Sends a DISCONNECT message and closes the socket.
    pub async fn disconnect(&mut self, description: &str) -> ScribeResult<()> {
        if self.state == State::Disconnected {
            return Ok(());
        }
        self.writer.send_disconnect(description).await?;
        self.state = State::Disconnected;
        info!(%description, "disconnected");
        Ok(())
    }

    /// Outbound packet counter.
    pub fn sequence_out(&self) -> u32 {
        self.writer.seq_out
    }

    /// Inbound packet counter.
    pub fn sequence_in(&self) -> u32 {
        self.reader.seq_in
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("role", &self.role)
            .field("state", &self.state.name())
            .field("seq_out", &self.writer.seq_out)
            .field("seq_in", &self.reader.seq_in)
            .field("encrypted", &self.writer.cipher_out.is_some())
            .finish()
    }
}

#[cfg(test)]
impl Transport {
    /// Connected plaintext pair over loopback, both sides in `state`,
    /// session identifiers pre-set. For exercising the layers above the
    /// transport without a full handshake.
    pub(crate) async fn test_pair(state: State) -> (Transport, Transport) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let (client_stream, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let client_stream = client_stream.expect("connect loopback");
        let (server_stream, _) = accepted.expect("accept loopback");

        let mut client = Transport::new(
            client_stream,
            Role::Client,
            TransportConfig::default(),
            state,
        );
        let mut server = Transport::new(
            server_stream,
            Role::Server,
            TransportConfig::default(),
            state,
        );
        client.session_id = Some(b"test-session-id".to_vec());
        server.session_id = Some(b"test-session-id".to_vec());
        (client, server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_legal() {
        let order = [
            State::Resolving,
            State::Connecting,
            State::VersionExchange,
            State::KeyExchange,
            State::NewKeys,
            State::ServiceRequest,
            State::Authenticating,
            State::Authenticated,
        ];
        for pair in order.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {}",
                pair[0].name(),
                pair[1].name()
            );
        }
    }

    #[test]
    fn test_skipping_states_illegal() {
        assert!(!State::Resolving.can_transition_to(State::VersionExchange));
        assert!(!State::VersionExchange.can_transition_to(State::NewKeys));
        assert!(!State::Authenticating.can_transition_to(State::KeyExchange));
        assert!(!State::Authenticated.can_transition_to(State::Authenticating));
    }

    #[test]
    fn test_any_state_can_disconnect() {
        for state in [
            State::Resolving,
            State::Connecting,
            State::VersionExchange,
            State::KeyExchange,
            State::NewKeys,
            State::ServiceRequest,
            State::Authenticating,
            State::Authenticated,
            State::Disconnected,
        ] {
            assert!(state.can_transition_to(State::Disconnected));
        }
    }

    #[test]
    fn test_no_resurrection_from_disconnected() {
        for state in [
            State::Resolving,
            State::Connecting,
            State::VersionExchange,
            State::Authenticated,
        ] {
            assert!(!State::Disconnected.can_transition_to(state));
        }
    }

    #[tokio::test]
    async fn test_plaintext_payload_round_trip_and_sequence_numbers() {
        let (mut client, mut server) = Transport::test_pair(State::Authenticated).await;

        let server_task = tokio::spawn(async move {
            for i in 0..5u32 {
                let payload = server.recv_payload().await.unwrap();
                assert_eq!(payload, format!("message {}", i).into_bytes());
                assert_eq!(server.sequence_in(), i + 1);
            }
        });

        assert_eq!(client.sequence_out(), 0);
        for i in 0..5u32 {
            client
                .send_payload(format!("message {}", i).as_bytes())
                .await
                .unwrap();
            assert_eq!(client.sequence_out(), i + 1);
        }

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_encrypted_round_trip_with_mac() {
        let (mut client, mut server) = Transport::test_pair(State::Authenticated).await;

        let key = [0x42u8; 16];
        let iv = [0x24u8; 16];
        let mac_key = [0x11u8; 32];

        server.reader.cipher_in =
            Some(CbcCipher::new(CipherAlgorithm::Aes128Cbc, &key, &iv).unwrap());
        server.reader.mac_in = Some(MacKey::new(MacAlgorithm::HmacSha256, &mac_key).unwrap());
        client.writer.cipher_out =
            Some(CbcCipher::new(CipherAlgorithm::Aes128Cbc, &key, &iv).unwrap());
        client.writer.mac_out = Some(MacKey::new(MacAlgorithm::HmacSha256, &mac_key).unwrap());

        let server_task = tokio::spawn(async move {
            let payload = server.recv_payload().await.unwrap();
            assert_eq!(payload, b"secret payload");
        });

        client.send_payload(b"secret payload").await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_mac_mismatch_is_fatal() {
        let (mut client, mut server) = Transport::test_pair(State::Authenticated).await;

        let key = [0x42u8; 16];
        let iv = [0x24u8; 16];

        server.reader.cipher_in =
            Some(CbcCipher::new(CipherAlgorithm::Aes128Cbc, &key, &iv).unwrap());
        // Different MAC key than the sender's.
        server.reader.mac_in = Some(MacKey::new(MacAlgorithm::HmacSha256, &[0x99u8; 32]).unwrap());
        client.writer.cipher_out =
            Some(CbcCipher::new(CipherAlgorithm::Aes128Cbc, &key, &iv).unwrap());
        client.writer.mac_out = Some(MacKey::new(MacAlgorithm::HmacSha256, &[0x11u8; 32]).unwrap());

        let server_task = tokio::spawn(async move {
            let result = server.recv_payload().await;
            assert!(matches!(result, Err(ScribeError::Mac(_))));
            assert_eq!(server.state(), State::Disconnected);
        });

        client.send_payload(b"payload").await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_split_requires_authenticated_state() {
        let (client, _server) = Transport::test_pair(State::Authenticating).await;
        assert!(client.split().is_err());

        let (client, _server) = Transport::test_pair(State::Authenticated).await;
        assert!(client.split().is_ok());
    }
}
