//! File transfer client (version 3).
//!
//! Every request carries a client-chosen id and the server may answer
//! out of order; replies for other requests are parked until their
//! waiter asks. Bulk transfers pipeline a bounded number of requests to
//! keep the pipe full without unbounded memory.

use crate::ssh::channel::Channel;
use crate::ssh::codec;
use crate::ssh::mux::ChannelEvent;
use crate::ssh::sftp::message::{frame, SftpFraming};
use crate::ssh::sftp::types::{
    packet_type, status_code, status_error, DirEntry, FileAttributes, OpenFlags, SFTP_VERSION,
};
use scribe_platform::{ScribeError, ScribeResult};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Transfer chunk size for bulk reads and writes.
pub const TRANSFER_CHUNK: u32 = 32768;
/// Pipelined requests in flight during bulk transfers.
const PIPELINE_DEPTH: usize = 8;

/// An opaque server-issued handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpHandle(Vec<u8>);

/// A connected file transfer client.
pub struct SftpClient {
    channel: Channel,
    framing: SftpFraming,
    next_request_id: u32,
    /// Replies that arrived while a different id was awaited.
    parked: HashMap<u32, (u8, Vec<u8>)>,
}

impl SftpClient {
    /// Performs the version handshake over an open channel whose peer
    /// is already running the "sftp" subsystem.
    pub async fn start(channel: Channel) -> ScribeResult<Self> {
        let mut client = Self {
            channel,
            framing: SftpFraming::new(),
            next_request_id: 0,
            parked: HashMap::new(),
        };

        let mut body = Vec::new();
        codec::write_u32(&mut body, SFTP_VERSION);
        client.send_packet(packet_type::INIT, &body).await?;

        let (reply_type, reply) = client.recv_packet().await?;
        if reply_type != packet_type::VERSION {
            return Err(ScribeError::Protocol(format!(
                "expected version reply, got packet type {}",
                reply_type
            )));
        }
        let mut offset = 0;
        let version = codec::read_u32(&reply, &mut offset)?;
        if version < SFTP_VERSION {
            return Err(ScribeError::Protocol(format!(
                "server file transfer version {} too old",
                version
            )));
        }
        debug!(version, "file transfer session established");
        Ok(client)
    }

    async fn send_packet(&mut self, packet_type: u8, body: &[u8]) -> ScribeResult<()> {
        self.channel.send_data(&frame(packet_type, body)).await
    }

    /// Next whole packet from the channel byte stream.
    async fn recv_packet(&mut self) -> ScribeResult<(u8, Vec<u8>)> {
        loop {
            if let Some(packet) = self.framing.next_packet()? {
                return Ok(packet);
            }
            match self.channel.next_event().await {
                Some(ChannelEvent::Data(data)) => self.framing.push(&data),
                Some(ChannelEvent::Eof) | Some(ChannelEvent::Closed) | None => {
                    return Err(ScribeError::Sftp {
                        code: status_code::CONNECTION_LOST,
                        message: "file transfer channel closed".to_string(),
                    });
                }
                Some(other) => {
                    debug!(?other, "ignoring non-data event on file transfer channel");
                }
            }
        }
    }

    fn take_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    /// Sends a request, returning its id without waiting.
    async fn send_request(&mut self, packet_type: u8, body: &[u8]) -> ScribeResult<u32> {
        let id = self.take_request_id();
        let mut framed_body = Vec::with_capacity(4 + body.len());
        codec::write_u32(&mut framed_body, id);
        framed_body.extend_from_slice(body);
        self.send_packet(packet_type, &framed_body).await?;
        Ok(id)
    }

    /// Waits for the reply to `id`, parking replies to other requests.
    async fn await_reply(&mut self, id: u32) -> ScribeResult<(u8, Vec<u8>)> {
        if let Some(reply) = self.parked.remove(&id) {
            return Ok(reply);
        }
        loop {
            let (packet_type, body) = self.recv_packet().await?;
            let mut offset = 0;
            let reply_id = codec::read_u32(&body, &mut offset)?;
            let rest = body[offset..].to_vec();
            if reply_id == id {
                return Ok((packet_type, rest));
            }
            self.parked.insert(reply_id, (packet_type, rest));
        }
    }

    /// One full round trip.
    async fn transact(&mut self, packet_type: u8, body: &[u8]) -> ScribeResult<(u8, Vec<u8>)> {
        let id = self.send_request(packet_type, body).await?;
        self.await_reply(id).await
    }

    fn parse_status(body: &[u8]) -> ScribeResult<(u32, String)> {
        let mut offset = 0;
        let code = codec::read_u32(body, &mut offset)?;
        let message = codec::read_utf8_string(body, &mut offset).unwrap_or_default();
        Ok((code, message))
    }

    /// Interprets a reply that should be STATUS OK.
    fn expect_ok(packet_type: u8, body: &[u8]) -> ScribeResult<()> {
        if packet_type != self::packet_type::STATUS {
            return Err(ScribeError::Protocol(format!(
                "expected status reply, got packet type {}",
                packet_type
            )));
        }
        let (code, message) = Self::parse_status(body)?;
        if code == status_code::OK {
            Ok(())
        } else {
            Err(status_error(code, message))
        }
    }

    fn expect_handle(packet_type: u8, body: &[u8]) -> ScribeResult<SftpHandle> {
        match packet_type {
            self::packet_type::HANDLE => {
                let mut offset = 0;
                Ok(SftpHandle(codec::read_string(body, &mut offset)?))
            }
            self::packet_type::STATUS => {
                let (code, message) = Self::parse_status(body)?;
                Err(status_error(code, message))
            }
            other => Err(ScribeError::Protocol(format!(
                "expected handle reply, got packet type {}",
                other
            ))),
        }
    }

    /// Opens a file.
    pub async fn open(
        &mut self,
        path: &str,
        flags: OpenFlags,
        attrs: &FileAttributes,
    ) -> ScribeResult<SftpHandle> {
        let mut body = Vec::new();
        codec::write_string(&mut body, path.as_bytes());
        codec::write_u32(&mut body, flags.bits());
        body.extend_from_slice(&attrs.to_bytes());
        let (reply_type, reply) = self.transact(packet_type::OPEN, &body).await?;
        Self::expect_handle(reply_type, &reply)
    }

    /// Closes a handle.
    pub async fn close(&mut self, handle: &SftpHandle) -> ScribeResult<()> {
        let mut body = Vec::new();
        codec::write_string(&mut body, &handle.0);
        let (reply_type, reply) = self.transact(packet_type::CLOSE, &body).await?;
        Self::expect_ok(reply_type, &reply)
    }

    /// Reads up to `len` bytes at `offset`. Returns `None` at end of
    /// file.
    pub async fn read(
        &mut self,
        handle: &SftpHandle,
        offset: u64,
        len: u32,
    ) -> ScribeResult<Option<Vec<u8>>> {
        let id = self.send_read(handle, offset, len).await?;
        self.await_read(id).await
    }

    async fn send_read(&mut self, handle: &SftpHandle, offset: u64, len: u32) -> ScribeResult<u32> {
        let mut body = Vec::new();
        codec::write_string(&mut body, &handle.0);
        codec::write_u64(&mut body, offset);
        codec::write_u32(&mut body, len);
        self.send_request(packet_type::READ, &body).await
    }

    async fn await_read(&mut self, id: u32) -> ScribeResult<Option<Vec<u8>>> {
        let (reply_type, reply) = self.await_reply(id).await?;
        match reply_type {
            packet_type::DATA => {
                let mut offset = 0;
                Ok(Some(codec::read_string(&reply, &mut offset)?))
            }
            packet_type::STATUS => {
                let (code, message) = Self::parse_status(&reply)?;
                if code == status_code::EOF {
                    Ok(None)
                } else {
                    Err(status_error(code, message))
                }
            }
            other => Err(ScribeError::Protocol(format!(
                "expected data reply, got packet type {}",
                other
            ))),
        }
    }

    /// Writes `data` at `offset`.
    pub async fn write(
        &mut self,
        handle: &SftpHandle,
        offset: u64,
        data: &[u8],
    ) -> ScribeResult<()> {
        let id = self.send_write(handle, offset, data).await?;
        let (reply_type, reply) = self.await_reply(id).await?;
        Self::expect_ok(reply_type, &reply)
    }

    async fn send_write(
        &mut self,
        handle: &SftpHandle,
        offset: u64,
        data: &[u8],
    ) -> ScribeResult<u32> {
        let mut body = Vec::new();
        codec::write_string(&mut body, &handle.0);
        codec::write_u64(&mut body, offset);
        codec::write_string(&mut body, data);
        self.send_request(packet_type::WRITE, &body).await
    }

    /// Stats a path, following links.
    pub async fn stat(&mut self, path: &str) -> ScribeResult<FileAttributes> {
        let mut body = Vec::new();
        codec::write_string(&mut body, path.as_bytes());
        let (reply_type, reply) = self.transact(packet_type::STAT, &body).await?;
        match reply_type {
            packet_type::ATTRS => {
                let mut offset = 0;
                FileAttributes::read_from(&reply, &mut offset)
            }
            packet_type::STATUS => {
                let (code, message) = Self::parse_status(&reply)?;
                Err(status_error(code, message))
            }
            other => Err(ScribeError::Protocol(format!(
                "expected attrs reply, got packet type {}",
                other
            ))),
        }
    }

    /// Opens a directory for listing.
    pub async fn opendir(&mut self, path: &str) -> ScribeResult<SftpHandle> {
        let mut body = Vec::new();
        codec::write_string(&mut body, path.as_bytes());
        let (reply_type, reply) = self.transact(packet_type::OPENDIR, &body).await?;
        Self::expect_handle(reply_type, &reply)
    }

    /// Reads the next batch of directory entries. Returns `None` once
    /// the listing is exhausted.
    pub async fn readdir(&mut self, handle: &SftpHandle) -> ScribeResult<Option<Vec<DirEntry>>> {
        let mut body = Vec::new();
        codec::write_string(&mut body, &handle.0);
        let (reply_type, reply) = self.transact(packet_type::READDIR, &body).await?;
        match reply_type {
            packet_type::NAME => {
                let mut offset = 0;
                let count = codec::read_u32(&reply, &mut offset)? as usize;
                if count > reply.len() / 8 + 1 {
                    return Err(ScribeError::Protocol(format!(
                        "name reply declares {} entries in {} bytes",
                        count,
                        reply.len()
                    )));
                }
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let filename = codec::read_utf8_string(&reply, &mut offset)?;
                    let longname = codec::read_utf8_string(&reply, &mut offset)?;
                    let attrs = FileAttributes::read_from(&reply, &mut offset)?;
                    entries.push(DirEntry {
                        filename,
                        longname,
                        attrs,
                    });
                }
                Ok(Some(entries))
            }
            packet_type::STATUS => {
                let (code, message) = Self::parse_status(&reply)?;
                if code == status_code::EOF {
                    Ok(None)
                } else {
                    Err(status_error(code, message))
                }
            }
            other => Err(ScribeError::Protocol(format!(
                "expected name reply, got packet type {}",
                other
            ))),
        }
    }

    /// Lists a whole directory.
    pub async fn list_dir(&mut self, path: &str) -> ScribeResult<Vec<DirEntry>> {
        let handle = self.opendir(path).await?;
        let mut entries = Vec::new();
        let result = loop {
            match self.readdir(&handle).await {
                Ok(Some(batch)) => entries.extend(batch),
                Ok(None) => break Ok(entries),
                Err(e) => break Err(e),
            }
        };
        self.close(&handle).await?;
        result
    }

    /// Creates a directory.
    pub async fn mkdir(&mut self, path: &str, attrs: &FileAttributes) -> ScribeResult<()> {
        let mut body = Vec::new();
        codec::write_string(&mut body, path.as_bytes());
        body.extend_from_slice(&attrs.to_bytes());
        let (reply_type, reply) = self.transact(packet_type::MKDIR, &body).await?;
        Self::expect_ok(reply_type, &reply)
    }

    /// Removes a file.
    pub async fn remove(&mut self, path: &str) -> ScribeResult<()> {
        let mut body = Vec::new();
        codec::write_string(&mut body, path.as_bytes());
        let (reply_type, reply) = self.transact(packet_type::REMOVE, &body).await?;
        Self::expect_ok(reply_type, &reply)
    }

    /// Removes an empty directory.
    pub async fn rmdir(&mut self, path: &str) -> ScribeResult<()> {
        let mut body = Vec::new();
        codec::write_string(&mut body, path.as_bytes());
        let (reply_type, reply) = self.transact(packet_type::RMDIR, &body).await?;
        Self::expect_ok(reply_type, &reply)
    }

    /// Renames a path.
    pub async fn rename(&mut self, from: &str, to: &str) -> ScribeResult<()> {
        let mut body = Vec::new();
        codec::write_string(&mut body, from.as_bytes());
        codec::write_string(&mut body, to.as_bytes());
        let (reply_type, reply) = self.transact(packet_type::RENAME, &body).await?;
        Self::expect_ok(reply_type, &reply)
    }

    /// Canonicalizes a path.
    pub async fn realpath(&mut self, path: &str) -> ScribeResult<String> {
        let mut body = Vec::new();
        codec::write_string(&mut body, path.as_bytes());
        let (reply_type, reply) = self.transact(packet_type::REALPATH, &body).await?;
        match reply_type {
            packet_type::NAME => {
                let mut offset = 0;
                let count = codec::read_u32(&reply, &mut offset)?;
                if count != 1 {
                    return Err(ScribeError::Protocol(format!(
                        "realpath returned {} names",
                        count
                    )));
                }
                codec::read_utf8_string(&reply, &mut offset)
            }
            packet_type::STATUS => {
                let (code, message) = Self::parse_status(&reply)?;
                Err(status_error(code, message))
            }
            other => Err(ScribeError::Protocol(format!(
                "expected name reply, got packet type {}",
                other
            ))),
        }
    }

    /// Reads a whole file, pipelining chunk requests.
    pub async fn read_file(&mut self, path: &str) -> ScribeResult<Vec<u8>> {
        let size = self.stat(path).await?.size;
        let handle = self.open(path, OpenFlags::READ, &FileAttributes::default()).await?;
        let result = self.read_file_inner(&handle, size).await;
        self.close(&handle).await?;
        result
    }

    async fn read_file_inner(
        &mut self,
        handle: &SftpHandle,
        size: Option<u64>,
    ) -> ScribeResult<Vec<u8>> {
        let Some(size) = size else {
            // Size unknown: walk the file sequentially.
            let mut contents = Vec::new();
            let mut offset = 0u64;
            while let Some(chunk) = self.read(handle, offset, TRANSFER_CHUNK).await? {
                if chunk.is_empty() {
                    break;
                }
                offset += chunk.len() as u64;
                contents.extend_from_slice(&chunk);
            }
            return Ok(contents);
        };

        let mut contents = vec![0u8; size as usize];
        // Segments still wanted, and ids of requests in flight.
        let mut wanted: VecDeque<(u64, u32)> = VecDeque::new();
        let mut position = 0u64;
        while position < size {
            let len = TRANSFER_CHUNK.min((size - position) as u32);
            wanted.push_back((position, len));
            position += len as u64;
        }

        let mut inflight: VecDeque<(u32, u64, u32)> = VecDeque::new();
        loop {
            while inflight.len() < PIPELINE_DEPTH {
                let Some((offset, len)) = wanted.pop_front() else {
                    break;
                };
                let id = self.send_read(handle, offset, len).await?;
                inflight.push_back((id, offset, len));
            }
            let Some((id, offset, len)) = inflight.pop_front() else {
                break;
            };
            match self.await_read(id).await? {
                Some(chunk) => {
                    let end = offset as usize + chunk.len();
                    if end > contents.len() || chunk.len() > len as usize {
                        return Err(ScribeError::Protocol(
                            "server returned more data than requested".to_string(),
                        ));
                    }
                    contents[offset as usize..end].copy_from_slice(&chunk);
                    // Short read: ask again for the remainder.
                    if (chunk.len() as u32) < len {
                        wanted.push_front((offset + chunk.len() as u64, len - chunk.len() as u32));
                    }
                }
                None => {
                    return Err(ScribeError::Protocol(
                        "unexpected end of file during read".to_string(),
                    ));
                }
            }
        }
        Ok(contents)
    }

    /// Writes a whole file, creating or truncating it, pipelining chunk
    /// requests.
    pub async fn write_file(&mut self, path: &str, data: &[u8]) -> ScribeResult<()> {
        let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE;
        let handle = self.open(path, flags, &FileAttributes::default()).await?;
        let result = self.write_file_inner(&handle, data).await;
        self.close(&handle).await?;
        result
    }

    async fn write_file_inner(&mut self, handle: &SftpHandle, data: &[u8]) -> ScribeResult<()> {
        let mut chunks = data.chunks(TRANSFER_CHUNK as usize);
        let mut offset = 0u64;
        let mut inflight: VecDeque<u32> = VecDeque::new();
        loop {
            while inflight.len() < PIPELINE_DEPTH {
                let Some(chunk) = chunks.next() else {
                    break;
                };
                let id = self.send_write(handle, offset, chunk).await?;
                offset += chunk.len() as u64;
                inflight.push_back(id);
            }
            let Some(id) = inflight.pop_front() else {
                break;
            };
            let (reply_type, reply) = self.await_reply(id).await?;
            Self::expect_ok(reply_type, &reply)?;
        }
        Ok(())
    }

    /// Closes the underlying channel.
    pub async fn shutdown(&mut self) -> ScribeResult<()> {
        self.channel.close().await
    }
}

impl std::fmt::Debug for SftpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpClient")
            .field("next_request_id", &self.next_request_id)
            .field("parked", &self.parked.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::connection::ChannelData;
    use crate::ssh::message::MessageType;
    use crate::ssh::transport::{State, Transport};
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex};

    /// Minimal scripted server: answers over the hand-fed event queue,
    /// reading requests off the loopback transport.
    struct MiniServer {
        server: Transport,
        sender: mpsc::UnboundedSender<ChannelEvent>,
        framing: SftpFraming,
        file: Vec<u8>,
        written: Vec<u8>,
    }

    impl MiniServer {
        async fn next_request(&mut self) -> Option<(u8, Vec<u8>)> {
            loop {
                if let Some(packet) = self.framing.next_packet().unwrap() {
                    return Some(packet);
                }
                let payload = self.server.recv_payload().await.ok()?;
                if payload[0] == MessageType::ChannelData as u8 {
                    let data = ChannelData::from_bytes(&payload).unwrap();
                    self.framing.push(&data.data);
                }
            }
        }

        fn reply(&self, packet_type: u8, body: &[u8]) {
            self.sender
                .send(ChannelEvent::Data(frame(packet_type, body)))
                .unwrap();
        }

        fn reply_status(&self, id: u32, code: u32, message: &str) {
            let mut body = Vec::new();
            codec::write_u32(&mut body, id);
            codec::write_u32(&mut body, code);
            codec::write_string(&mut body, message.as_bytes());
            codec::write_string(&mut body, b"");
            self.reply(packet_type::STATUS, &body);
        }

        /// Serves requests until the client goes quiet.
        async fn serve(&mut self) {
            while let Some((request_type, body)) = self.next_request().await {
                let mut offset = 0;
                match request_type {
                    packet_type::INIT => {
                        let mut reply = Vec::new();
                        codec::write_u32(&mut reply, SFTP_VERSION);
                        self.reply(packet_type::VERSION, &reply);
                    }
                    packet_type::OPEN | packet_type::OPENDIR => {
                        let id = codec::read_u32(&body, &mut offset).unwrap();
                        let mut reply = Vec::new();
                        codec::write_u32(&mut reply, id);
                        codec::write_string(&mut reply, b"h1");
                        self.reply(packet_type::HANDLE, &reply);
                    }
                    packet_type::CLOSE => {
                        let id = codec::read_u32(&body, &mut offset).unwrap();
                        self.reply_status(id, status_code::OK, "ok");
                    }
                    packet_type::STAT => {
                        let id = codec::read_u32(&body, &mut offset).unwrap();
                        let mut reply = Vec::new();
                        codec::write_u32(&mut reply, id);
                        let attrs = FileAttributes {
                            size: Some(self.file.len() as u64),
                            ..Default::default()
                        };
                        reply.extend_from_slice(&attrs.to_bytes());
                        self.reply(packet_type::ATTRS, &reply);
                    }
                    packet_type::READ => {
                        let id = codec::read_u32(&body, &mut offset).unwrap();
                        let _handle = codec::read_string(&body, &mut offset).unwrap();
                        let read_offset = codec::read_u64(&body, &mut offset).unwrap() as usize;
                        let len = codec::read_u32(&body, &mut offset).unwrap() as usize;
                        if read_offset >= self.file.len() {
                            self.reply_status(id, status_code::EOF, "eof");
                        } else {
                            let end = (read_offset + len).min(self.file.len());
                            let mut reply = Vec::new();
                            codec::write_u32(&mut reply, id);
                            codec::write_string(&mut reply, &self.file[read_offset..end]);
                            self.reply(packet_type::DATA, &reply);
                        }
                    }
                    packet_type::WRITE => {
                        let id = codec::read_u32(&body, &mut offset).unwrap();
                        let _handle = codec::read_string(&body, &mut offset).unwrap();
                        let write_offset = codec::read_u64(&body, &mut offset).unwrap() as usize;
                        let data = codec::read_string(&body, &mut offset).unwrap();
                        if self.written.len() < write_offset + data.len() {
                            self.written.resize(write_offset + data.len(), 0);
                        }
                        self.written[write_offset..write_offset + data.len()]
                            .copy_from_slice(&data);
                        self.reply_status(id, status_code::OK, "ok");
                    }
                    packet_type::REMOVE => {
                        let id = codec::read_u32(&body, &mut offset).unwrap();
                        self.reply_status(id, status_code::NO_SUCH_FILE, "no such file");
                    }
                    other => panic!("unhandled request type {}", other),
                }
            }
        }
    }

    async fn harness(file: Vec<u8>) -> (SftpClient, tokio::task::JoinHandle<Vec<u8>>) {
        let (client, server) = Transport::test_pair(State::Authenticated).await;
        let (_reader, writer, _) = client.split().unwrap();
        let (sender, events) = mpsc::unbounded_channel();
        let channel = Channel::new(0, 7, Arc::new(Mutex::new(writer)), events, 1 << 30, 32768);

        let mut mini = MiniServer {
            server,
            sender,
            framing: SftpFraming::new(),
            file,
            written: Vec::new(),
        };
        let server_task = tokio::spawn(async move {
            mini.serve().await;
            mini.written
        });

        let client = SftpClient::start(channel).await.unwrap();
        (client, server_task)
    }

    #[tokio::test]
    async fn test_open_read_close() {
        let (mut sftp, _server) = harness(b"file contents".to_vec()).await;
        let handle = sftp
            .open("/f", OpenFlags::READ, &FileAttributes::default())
            .await
            .unwrap();
        let data = sftp.read(&handle, 0, 1024).await.unwrap().unwrap();
        assert_eq!(data, b"file contents");
        assert!(sftp.read(&handle, 13, 1024).await.unwrap().is_none());
        sftp.close(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_file_pipelines_chunks() {
        // Spans several transfer chunks to exercise pipelining.
        let contents: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let (mut sftp, _server) = harness(contents.clone()).await;
        let read_back = sftp.read_file("/big").await.unwrap();
        assert_eq!(read_back, contents);
    }

    #[tokio::test]
    async fn test_write_file_chunks_and_reassembles() {
        let contents: Vec<u8> = (0..100_000u32).map(|i| (i % 241) as u8).collect();
        let (mut sftp, server) = harness(Vec::new()).await;
        sftp.write_file("/out", &contents).await.unwrap();
        drop(sftp);
        let written = server.await.unwrap();
        assert_eq!(written, contents);
    }

    #[tokio::test]
    async fn test_status_failure_maps_to_error() {
        let (mut sftp, _server) = harness(Vec::new()).await;
        let result = sftp.remove("/missing").await;
        match result {
            Err(ScribeError::Sftp { code, .. }) => {
                assert_eq!(code, status_code::NO_SUCH_FILE);
            }
            other => panic!("expected sftp status error, got {:?}", other.err()),
        }
    }
}
