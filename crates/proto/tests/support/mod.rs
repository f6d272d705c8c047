//! In-process server for end-to-end tests: real handshake, scripted
//! authentication, session and file transfer channels over an
//! in-memory filesystem.

#![allow(dead_code)]

use scribe_platform::{ScribeError, ScribeResult};
use scribe_proto::ssh::auth::{AuthFailure, AuthRequest};
use scribe_proto::ssh::codec;
use scribe_proto::ssh::connection::{
    reply_payload, ChannelData, ChannelId, ChannelOpen, ChannelOpenConfirmation, ChannelRequest,
    ChannelRequestKind,
};
use scribe_proto::ssh::hostkey::Ed25519HostKey;
use scribe_proto::ssh::message::MessageType;
use scribe_proto::ssh::sftp::types::{packet_type, status_code, FileAttributes};
use scribe_proto::ssh::transport::{Transport, TransportConfig};
use scribe_proto::ssh::{auth, hostkey};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// How the server treats authentication attempts.
#[derive(Debug, Clone)]
pub struct ServerPolicy {
    /// Accept the "none" probe outright.
    pub accept_none: bool,
    /// Accept this password for this user.
    pub password: Option<(String, String)>,
    /// Accept any correctly signed public key attempt.
    pub accept_publickey: bool,
}

impl Default for ServerPolicy {
    fn default() -> Self {
        Self {
            accept_none: false,
            password: Some(("alice".to_string(), "secret".to_string())),
            accept_publickey: false,
        }
    }
}

impl ServerPolicy {
    fn methods(&self) -> Vec<String> {
        let mut methods = Vec::new();
        if self.accept_publickey {
            methods.push("publickey".to_string());
        }
        if self.password.is_some() {
            methods.push("password".to_string());
        }
        methods
    }
}

/// Shared in-memory filesystem.
#[derive(Debug, Default)]
pub struct MemFs {
    pub files: HashMap<String, Vec<u8>>,
    pub dirs: HashSet<String>,
}

impl MemFs {
    fn new() -> Self {
        let mut fs = Self::default();
        fs.dirs.insert("/".to_string());
        fs
    }
}

/// A listening test server; serves connections until dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    pub host_key_blob: Vec<u8>,
    pub fs: Arc<Mutex<MemFs>>,
}

impl TestServer {
    /// Binds on loopback and starts serving.
    pub async fn spawn(policy: ServerPolicy, config: TransportConfig) -> TestServer {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let host_key = Arc::new(Ed25519HostKey::generate());
        let host_key_blob = host_key.public_key_blob();
        let fs = Arc::new(Mutex::new(MemFs::new()));

        let fs_for_task = fs.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let policy = policy.clone();
                let config = config.clone();
                let fs = fs_for_task.clone();
                let host_key = host_key.clone();
                tokio::spawn(async move {
                    if let Ok(transport) = Transport::accept(stream, config, &host_key).await {
                        let _ = serve_connection(transport, &policy, fs).await;
                    }
                });
            }
        });

        TestServer {
            addr,
            host_key_blob,
            fs,
        }
    }

    /// Seeds a file into the served filesystem.
    pub fn put_file(&self, path: &str, contents: &[u8]) {
        self.fs
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), contents.to_vec());
    }

    /// Reads a file out of the served filesystem.
    pub fn get_file(&self, path: &str) -> Option<Vec<u8>> {
        self.fs.lock().unwrap().files.get(path).cloned()
    }
}

async fn serve_connection(
    mut transport: Transport,
    policy: &ServerPolicy,
    fs: Arc<Mutex<MemFs>>,
) -> ScribeResult<()> {
    authenticate(&mut transport, policy).await?;
    connection_loop(&mut transport, fs).await
}

async fn authenticate(transport: &mut Transport, policy: &ServerPolicy) -> ScribeResult<()> {
    loop {
        let payload = transport.recv_expected(MessageType::UserauthRequest).await?;
        let request = AuthRequest::from_bytes(&payload)?;
        let accepted = match &request {
            AuthRequest::None { .. } => policy.accept_none,
            AuthRequest::Password { username, password } => policy
                .password
                .as_ref()
                .map(|(u, p)| u == username && p == password)
                .unwrap_or(false),
            AuthRequest::PublicKey {
                username,
                algorithm,
                key_blob,
                signature,
            } => {
                if !policy.accept_publickey {
                    false
                } else {
                    match signature {
                        None => {
                            // Key query: echo PK_OK.
                            let ok = auth::AuthPkOk {
                                algorithm: algorithm.clone(),
                                key_blob: key_blob.clone(),
                            };
                            transport.send_payload(&ok.to_bytes()).await?;
                            continue;
                        }
                        Some(signature) => {
                            let session_id = transport
                                .session_id()
                                .ok_or_else(|| {
                                    ScribeError::Protocol("no session id".to_string())
                                })?
                                .to_vec();
                            let data = auth::signature_data(
                                &session_id,
                                username,
                                algorithm,
                                key_blob,
                            );
                            hostkey::verify_signature(key_blob, signature, &data).is_ok()
                        }
                    }
                }
            }
            AuthRequest::KeyboardInteractive { .. } => false,
        };
        if accepted {
            transport
                .send_payload(&[MessageType::UserauthSuccess as u8])
                .await?;
            transport.mark_authenticated()?;
            return Ok(());
        }
        let failure = AuthFailure {
            methods_can_continue: policy.methods(),
            partial_success: false,
        };
        transport.send_payload(&failure.to_bytes()).await?;
    }
}

struct ServedChannel {
    /// The id the client knows itself by; all replies address it.
    client_id: u32,
    sftp: Option<SftpEngine>,
    /// Set once this side has sent CHANNEL_CLOSE; each side closes once.
    close_sent: bool,
}

async fn connection_loop(transport: &mut Transport, fs: Arc<Mutex<MemFs>>) -> ScribeResult<()> {
    // Keyed by the server-side id the client addresses.
    let mut channels: HashMap<u32, ServedChannel> = HashMap::new();
    let mut next_id = 1000u32;

    loop {
        let (msg_type, payload) = match transport.recv_message().await {
            Ok(message) => message,
            Err(_) => return Ok(()),
        };
        match msg_type {
            MessageType::ChannelOpen => {
                let open = ChannelOpen::from_bytes(&payload)?;
                let server_id = next_id;
                next_id += 1;
                channels.insert(
                    server_id,
                    ServedChannel {
                        client_id: open.sender_channel,
                        sftp: None,
                        close_sent: false,
                    },
                );
                let confirm = ChannelOpenConfirmation {
                    recipient_channel: open.sender_channel,
                    sender_channel: server_id,
                    initial_window: 1 << 24,
                    max_packet_size: 32768,
                };
                transport.send_payload(&confirm.to_bytes()).await?;
            }
            MessageType::ChannelRequest => {
                let request = ChannelRequest::from_bytes(&payload)?;
                let Some(channel) = channels.get_mut(&request.recipient_channel) else {
                    continue;
                };
                let client_id = channel.client_id;
                match request.kind {
                    ChannelRequestKind::Subsystem { ref name } if name == "sftp" => {
                        channel.sftp = Some(SftpEngine::new(fs.clone()));
                        if request.want_reply {
                            let reply = reply_payload(MessageType::ChannelSuccess, client_id);
                            transport.send_payload(&reply).await?;
                        }
                    }
                    ChannelRequestKind::Exec { ref command } => {
                        channel.close_sent = true;
                        if request.want_reply {
                            let reply = reply_payload(MessageType::ChannelSuccess, client_id);
                            transport.send_payload(&reply).await?;
                        }
                        // Echo the command back as stdout, then finish.
                        let data = ChannelData {
                            recipient_channel: client_id,
                            data: command.as_bytes().to_vec(),
                        };
                        transport.send_payload(&data.to_bytes()).await?;
                        let status = ChannelRequest {
                            recipient_channel: client_id,
                            want_reply: false,
                            kind: ChannelRequestKind::ExitStatus { status: 0 },
                        };
                        transport.send_payload(&status.to_bytes()).await?;
                        let eof = ChannelId {
                            recipient_channel: client_id,
                        };
                        transport
                            .send_payload(&eof.to_bytes(MessageType::ChannelEof))
                            .await?;
                        transport
                            .send_payload(&eof.to_bytes(MessageType::ChannelClose))
                            .await?;
                    }
                    ChannelRequestKind::PtyReq { .. } | ChannelRequestKind::Shell => {
                        if request.want_reply {
                            let reply = reply_payload(MessageType::ChannelSuccess, client_id);
                            transport.send_payload(&reply).await?;
                        }
                    }
                    _ => {
                        if request.want_reply {
                            let reply = reply_payload(MessageType::ChannelFailure, client_id);
                            transport.send_payload(&reply).await?;
                        }
                    }
                }
            }
            MessageType::ChannelData => {
                let data = ChannelData::from_bytes(&payload)?;
                let Some(channel) = channels.get_mut(&data.recipient_channel) else {
                    continue;
                };
                let client_id = channel.client_id;
                if let Some(engine) = channel.sftp.as_mut() {
                    for reply in engine.handle(&data.data)? {
                        let out = ChannelData {
                            recipient_channel: client_id,
                            data: reply,
                        };
                        transport.send_payload(&out.to_bytes()).await?;
                    }
                }
            }
            MessageType::ChannelClose => {
                let id = ChannelId::from_bytes(&payload)?;
                if let Some(channel) = channels.remove(&id.recipient_channel) {
                    // Reciprocate only a client-initiated close.
                    if !channel.close_sent {
                        let close = ChannelId {
                            recipient_channel: channel.client_id,
                        };
                        transport
                            .send_payload(&close.to_bytes(MessageType::ChannelClose))
                            .await?;
                    }
                }
            }
            MessageType::ChannelEof | MessageType::ChannelWindowAdjust => {}
            _ => {}
        }
    }
}

enum OpenHandle {
    File { path: String },
    Dir { entries: Vec<String>, served: bool },
}

/// File transfer engine over the shared in-memory filesystem.
struct SftpEngine {
    fs: Arc<Mutex<MemFs>>,
    buffer: Vec<u8>,
    handles: HashMap<u32, OpenHandle>,
    next_handle: u32,
}

impl SftpEngine {
    fn new(fs: Arc<Mutex<MemFs>>) -> Self {
        Self {
            fs,
            buffer: Vec::new(),
            handles: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Consumes channel bytes and returns framed reply packets.
    fn handle(&mut self, data: &[u8]) -> ScribeResult<Vec<Vec<u8>>> {
        self.buffer.extend_from_slice(data);
        let mut replies = Vec::new();
        loop {
            if self.buffer.len() < 4 {
                return Ok(replies);
            }
            let length = u32::from_be_bytes([
                self.buffer[0],
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
            ]) as usize;
            if self.buffer.len() < 4 + length {
                return Ok(replies);
            }
            let request_type = self.buffer[4];
            let body = self.buffer[5..4 + length].to_vec();
            self.buffer.drain(..4 + length);
            replies.push(self.handle_packet(request_type, &body)?);
        }
    }

    fn frame(packet_type: u8, body: &[u8]) -> Vec<u8> {
        let length = 1 + body.len();
        let mut buf = Vec::with_capacity(4 + length);
        buf.extend_from_slice(&(length as u32).to_be_bytes());
        buf.push(packet_type);
        buf.extend_from_slice(body);
        buf
    }

    fn status(id: u32, code: u32, message: &str) -> Vec<u8> {
        let mut body = Vec::new();
        codec::write_u32(&mut body, id);
        codec::write_u32(&mut body, code);
        codec::write_string(&mut body, message.as_bytes());
        codec::write_string(&mut body, b"");
        Self::frame(packet_type::STATUS, &body)
    }

    fn handle_packet(&mut self, request_type: u8, body: &[u8]) -> ScribeResult<Vec<u8>> {
        let mut offset = 0;
        if request_type == packet_type::INIT {
            let _version = codec::read_u32(body, &mut offset)?;
            let mut reply = Vec::new();
            codec::write_u32(&mut reply, 3);
            return Ok(Self::frame(packet_type::VERSION, &reply));
        }

        let id = codec::read_u32(body, &mut offset)?;
        match request_type {
            packet_type::OPEN => {
                let path = codec::read_utf8_string(body, &mut offset)?;
                let pflags = codec::read_u32(body, &mut offset)?;
                let mut fs = self.fs.lock().unwrap();
                let exists = fs.files.contains_key(&path);
                if !exists && pflags & 0x08 == 0 {
                    return Ok(Self::status(id, status_code::NO_SUCH_FILE, "no such file"));
                }
                if !exists || pflags & 0x10 != 0 {
                    fs.files.insert(path.clone(), Vec::new());
                }
                drop(fs);
                let handle = self.next_handle;
                self.next_handle += 1;
                self.handles.insert(handle, OpenHandle::File { path });
                let mut reply = Vec::new();
                codec::write_u32(&mut reply, id);
                codec::write_string(&mut reply, &handle.to_be_bytes());
                Ok(Self::frame(packet_type::HANDLE, &reply))
            }
            packet_type::CLOSE => {
                let handle = codec::read_string(body, &mut offset)?;
                let key = handle_key(&handle)?;
                self.handles.remove(&key);
                Ok(Self::status(id, status_code::OK, "ok"))
            }
            packet_type::READ => {
                let handle = codec::read_string(body, &mut offset)?;
                let read_offset = codec::read_u64(body, &mut offset)? as usize;
                let len = codec::read_u32(body, &mut offset)? as usize;
                let key = handle_key(&handle)?;
                let Some(OpenHandle::File { path }) = self.handles.get(&key) else {
                    return Ok(Self::status(id, status_code::FAILURE, "bad handle"));
                };
                let fs = self.fs.lock().unwrap();
                let Some(contents) = fs.files.get(path) else {
                    return Ok(Self::status(id, status_code::NO_SUCH_FILE, "gone"));
                };
                if read_offset >= contents.len() {
                    return Ok(Self::status(id, status_code::EOF, "eof"));
                }
                let end = (read_offset + len).min(contents.len());
                let mut reply = Vec::new();
                codec::write_u32(&mut reply, id);
                codec::write_string(&mut reply, &contents[read_offset..end]);
                Ok(Self::frame(packet_type::DATA, &reply))
            }
            packet_type::WRITE => {
                let handle = codec::read_string(body, &mut offset)?;
                let write_offset = codec::read_u64(body, &mut offset)? as usize;
                let data = codec::read_string(body, &mut offset)?;
                let key = handle_key(&handle)?;
                let Some(OpenHandle::File { path }) = self.handles.get(&key) else {
                    return Ok(Self::status(id, status_code::FAILURE, "bad handle"));
                };
                let mut fs = self.fs.lock().unwrap();
                let contents = fs.files.entry(path.clone()).or_default();
                if contents.len() < write_offset + data.len() {
                    contents.resize(write_offset + data.len(), 0);
                }
                contents[write_offset..write_offset + data.len()].copy_from_slice(&data);
                Ok(Self::status(id, status_code::OK, "ok"))
            }
            packet_type::STAT => {
                let path = codec::read_utf8_string(body, &mut offset)?;
                let fs = self.fs.lock().unwrap();
                if let Some(contents) = fs.files.get(&path) {
                    let attrs = FileAttributes {
                        size: Some(contents.len() as u64),
                        permissions: Some(0o100644),
                        ..Default::default()
                    };
                    let mut reply = Vec::new();
                    codec::write_u32(&mut reply, id);
                    reply.extend_from_slice(&attrs.to_bytes());
                    Ok(Self::frame(packet_type::ATTRS, &reply))
                } else if fs.dirs.contains(&path) {
                    let attrs = FileAttributes {
                        permissions: Some(0o040755),
                        ..Default::default()
                    };
                    let mut reply = Vec::new();
                    codec::write_u32(&mut reply, id);
                    reply.extend_from_slice(&attrs.to_bytes());
                    Ok(Self::frame(packet_type::ATTRS, &reply))
                } else {
                    Ok(Self::status(id, status_code::NO_SUCH_FILE, "no such file"))
                }
            }
            packet_type::OPENDIR => {
                let path = codec::read_utf8_string(body, &mut offset)?;
                let fs = self.fs.lock().unwrap();
                if !fs.dirs.contains(&path) {
                    return Ok(Self::status(id, status_code::NO_SUCH_FILE, "no such dir"));
                }
                let prefix = if path == "/" {
                    "/".to_string()
                } else {
                    format!("{}/", path)
                };
                let mut entries: Vec<String> = fs
                    .files
                    .keys()
                    .chain(fs.dirs.iter())
                    .filter_map(|p| {
                        let rest = p.strip_prefix(&prefix)?;
                        if rest.is_empty() || rest.contains('/') {
                            None
                        } else {
                            Some(rest.to_string())
                        }
                    })
                    .collect();
                entries.sort();
                entries.dedup();
                drop(fs);
                let handle = self.next_handle;
                self.next_handle += 1;
                self.handles.insert(
                    handle,
                    OpenHandle::Dir {
                        entries,
                        served: false,
                    },
                );
                let mut reply = Vec::new();
                codec::write_u32(&mut reply, id);
                codec::write_string(&mut reply, &handle.to_be_bytes());
                Ok(Self::frame(packet_type::HANDLE, &reply))
            }
            packet_type::READDIR => {
                let handle = codec::read_string(body, &mut offset)?;
                let key = handle_key(&handle)?;
                let Some(OpenHandle::Dir { entries, served }) = self.handles.get_mut(&key) else {
                    return Ok(Self::status(id, status_code::FAILURE, "bad handle"));
                };
                if *served {
                    return Ok(Self::status(id, status_code::EOF, "eof"));
                }
                *served = true;
                let mut reply = Vec::new();
                codec::write_u32(&mut reply, id);
                codec::write_u32(&mut reply, entries.len() as u32);
                for name in entries.iter() {
                    codec::write_string(&mut reply, name.as_bytes());
                    codec::write_string(&mut reply, name.as_bytes());
                    reply.extend_from_slice(&FileAttributes::default().to_bytes());
                }
                Ok(Self::frame(packet_type::NAME, &reply))
            }
            packet_type::MKDIR => {
                let path = codec::read_utf8_string(body, &mut offset)?;
                let mut fs = self.fs.lock().unwrap();
                if fs.dirs.contains(&path) || fs.files.contains_key(&path) {
                    return Ok(Self::status(id, status_code::FAILURE, "already exists"));
                }
                fs.dirs.insert(path);
                Ok(Self::status(id, status_code::OK, "ok"))
            }
            packet_type::REMOVE => {
                let path = codec::read_utf8_string(body, &mut offset)?;
                let mut fs = self.fs.lock().unwrap();
                if fs.files.remove(&path).is_some() {
                    Ok(Self::status(id, status_code::OK, "ok"))
                } else {
                    Ok(Self::status(id, status_code::NO_SUCH_FILE, "no such file"))
                }
            }
            packet_type::RMDIR => {
                let path = codec::read_utf8_string(body, &mut offset)?;
                let mut fs = self.fs.lock().unwrap();
                if fs.dirs.remove(&path) {
                    Ok(Self::status(id, status_code::OK, "ok"))
                } else {
                    Ok(Self::status(id, status_code::NO_SUCH_FILE, "no such dir"))
                }
            }
            packet_type::RENAME => {
                let from = codec::read_utf8_string(body, &mut offset)?;
                let to = codec::read_utf8_string(body, &mut offset)?;
                let mut fs = self.fs.lock().unwrap();
                match fs.files.remove(&from) {
                    Some(contents) => {
                        fs.files.insert(to, contents);
                        Ok(Self::status(id, status_code::OK, "ok"))
                    }
                    None => Ok(Self::status(id, status_code::NO_SUCH_FILE, "no such file")),
                }
            }
            packet_type::REALPATH => {
                let path = codec::read_utf8_string(body, &mut offset)?;
                let canonical = if path.is_empty() || path == "." {
                    "/".to_string()
                } else {
                    path
                };
                let mut reply = Vec::new();
                codec::write_u32(&mut reply, id);
                codec::write_u32(&mut reply, 1);
                codec::write_string(&mut reply, canonical.as_bytes());
                codec::write_string(&mut reply, canonical.as_bytes());
                reply.extend_from_slice(&FileAttributes::default().to_bytes());
                Ok(Self::frame(packet_type::NAME, &reply))
            }
            other => Ok(Self::status(
                id,
                status_code::OP_UNSUPPORTED,
                &format!("unsupported request {}", other),
            )),
        }
    }
}

fn handle_key(handle: &[u8]) -> ScribeResult<u32> {
    if handle.len() != 4 {
        return Err(ScribeError::Protocol("bad handle length".to_string()));
    }
    Ok(u32::from_be_bytes([handle[0], handle[1], handle[2], handle[3]]))
}
