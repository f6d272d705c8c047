//! Connection protocol messages (RFC 4254): channel open, data flow,
//! window management, and channel requests.
//!
//! Wire forms only; flow control policy lives in
//! [`crate::ssh::channel`] and routing in [`crate::ssh::mux`].

use crate::ssh::codec;
use crate::ssh::message::MessageType;
use scribe_platform::{ScribeError, ScribeResult};

/// Extended data stream carrying stderr.
pub const EXTENDED_DATA_STDERR: u32 = 1;

/// Channel open failure reason codes.
pub mod open_failure_reason {
    /// Administratively prohibited.
    pub const ADMINISTRATIVELY_PROHIBITED: u32 = 1;
    /// Connect failed.
    pub const CONNECT_FAILED: u32 = 2;
    /// Unknown channel type.
    pub const UNKNOWN_CHANNEL_TYPE: u32 = 3;
    /// Resource shortage.
    pub const RESOURCE_SHORTAGE: u32 = 4;
}

/// `CHANNEL_OPEN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpen {
    /// Channel type, e.g. "session".
    pub channel_type: String,
    /// Sender's channel number.
    pub sender_channel: u32,
    /// Initial window the sender grants.
    pub initial_window: u32,
    /// Largest packet the sender will accept.
    pub max_packet_size: u32,
}

impl ChannelOpen {
    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::ChannelOpen as u8);
        codec::write_string(&mut buf, self.channel_type.as_bytes());
        codec::write_u32(&mut buf, self.sender_channel);
        codec::write_u32(&mut buf, self.initial_window);
        codec::write_u32(&mut buf, self.max_packet_size);
        buf
    }

    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 1;
        let channel_type = codec::read_utf8_string(data, &mut offset)?;
        let sender_channel = codec::read_u32(data, &mut offset)?;
        let initial_window = codec::read_u32(data, &mut offset)?;
        let max_packet_size = codec::read_u32(data, &mut offset)?;
        if max_packet_size == 0 {
            return Err(ScribeError::Protocol(
                "channel open with zero max packet size".to_string(),
            ));
        }
        Ok(Self {
            channel_type,
            sender_channel,
            initial_window,
            max_packet_size,
        })
    }
}

/// `CHANNEL_OPEN_CONFIRMATION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenConfirmation {
    /// The opener's channel number being confirmed.
    pub recipient_channel: u32,
    /// The confirmer's own channel number.
    pub sender_channel: u32,
    /// Initial window the confirmer grants.
    pub initial_window: u32,
    /// Largest packet the confirmer will accept.
    pub max_packet_size: u32,
}

impl ChannelOpenConfirmation {
    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::ChannelOpenConfirmation as u8);
        codec::write_u32(&mut buf, self.recipient_channel);
        codec::write_u32(&mut buf, self.sender_channel);
        codec::write_u32(&mut buf, self.initial_window);
        codec::write_u32(&mut buf, self.max_packet_size);
        buf
    }

    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 1;
        let recipient_channel = codec::read_u32(data, &mut offset)?;
        let sender_channel = codec::read_u32(data, &mut offset)?;
        let initial_window = codec::read_u32(data, &mut offset)?;
        let max_packet_size = codec::read_u32(data, &mut offset)?;
        if max_packet_size == 0 {
            return Err(ScribeError::Protocol(
                "channel confirmation with zero max packet size".to_string(),
            ));
        }
        Ok(Self {
            recipient_channel,
            sender_channel,
            initial_window,
            max_packet_size,
        })
    }
}

/// `CHANNEL_OPEN_FAILURE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenFailure {
    /// The opener's channel number being refused.
    pub recipient_channel: u32,
    /// Reason code, see [`open_failure_reason`].
    pub reason: u32,
    /// Human-readable description.
    pub description: String,
}

impl ChannelOpenFailure {
    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::ChannelOpenFailure as u8);
        codec::write_u32(&mut buf, self.recipient_channel);
        codec::write_u32(&mut buf, self.reason);
        codec::write_string(&mut buf, self.description.as_bytes());
        codec::write_string(&mut buf, b"");
        buf
    }

    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 1;
        let recipient_channel = codec::read_u32(data, &mut offset)?;
        let reason = codec::read_u32(data, &mut offset)?;
        let description = codec::read_utf8_string(data, &mut offset)?;
        let _language = codec::read_string(data, &mut offset)?;
        Ok(Self {
            recipient_channel,
            reason,
            description,
        })
    }
}

/// `CHANNEL_WINDOW_ADJUST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelWindowAdjust {
    /// Recipient's channel number.
    pub recipient_channel: u32,
    /// Bytes added to the window.
    pub additional_bytes: u32,
}

impl ChannelWindowAdjust {
    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::ChannelWindowAdjust as u8);
        codec::write_u32(&mut buf, self.recipient_channel);
        codec::write_u32(&mut buf, self.additional_bytes);
        buf
    }

    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 1;
        let recipient_channel = codec::read_u32(data, &mut offset)?;
        let additional_bytes = codec::read_u32(data, &mut offset)?;
        Ok(Self {
            recipient_channel,
            additional_bytes,
        })
    }
}

/// `CHANNEL_DATA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    /// Recipient's channel number.
    pub recipient_channel: u32,
    /// Data bytes.
    pub data: Vec<u8>,
}

impl ChannelData {
    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::ChannelData as u8);
        codec::write_u32(&mut buf, self.recipient_channel);
        codec::write_string(&mut buf, &self.data);
        buf
    }

    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 1;
        let recipient_channel = codec::read_u32(data, &mut offset)?;
        let data = codec::read_string(data, &mut offset)?;
        Ok(Self {
            recipient_channel,
            data,
        })
    }
}

/// `CHANNEL_EXTENDED_DATA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelExtendedData {
    /// Recipient's channel number.
    pub recipient_channel: u32,
    /// Stream code; [`EXTENDED_DATA_STDERR`] carries stderr.
    pub data_type: u32,
    /// Data bytes.
    pub data: Vec<u8>,
}

impl ChannelExtendedData {
    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::ChannelExtendedData as u8);
        codec::write_u32(&mut buf, self.recipient_channel);
        codec::write_u32(&mut buf, self.data_type);
        codec::write_string(&mut buf, &self.data);
        buf
    }

    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 1;
        let recipient_channel = codec::read_u32(data, &mut offset)?;
        let data_type = codec::read_u32(data, &mut offset)?;
        let data = codec::read_string(data, &mut offset)?;
        Ok(Self {
            recipient_channel,
            data_type,
            data,
        })
    }
}

/// `CHANNEL_EOF` and `CHANNEL_CLOSE` share this shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelId {
    /// Recipient's channel number.
    pub recipient_channel: u32,
}

impl ChannelId {
    /// Serializes with the given message type (`ChannelEof` or
    /// `ChannelClose`).
    pub fn to_bytes(&self, msg_type: MessageType) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, msg_type as u8);
        codec::write_u32(&mut buf, self.recipient_channel);
        buf
    }

    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 1;
        let recipient_channel = codec::read_u32(data, &mut offset)?;
        Ok(Self { recipient_channel })
    }
}

/// The typed forms a `CHANNEL_REQUEST` can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequestKind {
    /// Request a pseudo-terminal.
    PtyReq {
        /// TERM value.
        term: String,
        /// Width in columns.
        columns: u32,
        /// Height in rows.
        rows: u32,
    },
    /// Set an environment variable.
    Env {
        /// Variable name.
        name: String,
        /// Variable value.
        value: String,
    },
    /// Start the user's shell.
    Shell,
    /// Run one command.
    Exec {
        /// Command line.
        command: String,
    },
    /// Start a named subsystem.
    Subsystem {
        /// Subsystem name, e.g. "sftp".
        name: String,
    },
    /// Remote process exit status (server to client).
    ExitStatus {
        /// Exit code.
        status: u32,
    },
    /// A request type this engine does not interpret.
    Other {
        /// Request type name.
        name: String,
        /// Raw type-specific bytes.
        data: Vec<u8>,
    },
}

/// `CHANNEL_REQUEST`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Recipient's channel number.
    pub recipient_channel: u32,
    /// Whether a success/failure reply is wanted.
    pub want_reply: bool,
    /// The request itself.
    pub kind: ChannelRequestKind,
}

impl ChannelRequest {
    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::ChannelRequest as u8);
        codec::write_u32(&mut buf, self.recipient_channel);
        let name: &str = match &self.kind {
            ChannelRequestKind::PtyReq { .. } => "pty-req",
            ChannelRequestKind::Env { .. } => "env",
            ChannelRequestKind::Shell => "shell",
            ChannelRequestKind::Exec { .. } => "exec",
            ChannelRequestKind::Subsystem { .. } => "subsystem",
            ChannelRequestKind::ExitStatus { .. } => "exit-status",
            ChannelRequestKind::Other { name, .. } => name,
        };
        codec::write_string(&mut buf, name.as_bytes());
        codec::write_boolean(&mut buf, self.want_reply);
        match &self.kind {
            ChannelRequestKind::PtyReq {
                term,
                columns,
                rows,
            } => {
                codec::write_string(&mut buf, term.as_bytes());
                codec::write_u32(&mut buf, *columns);
                codec::write_u32(&mut buf, *rows);
                // Pixel dimensions unknown, terminal modes empty.
                codec::write_u32(&mut buf, 0);
                codec::write_u32(&mut buf, 0);
                codec::write_string(&mut buf, &[0]);
            }
            ChannelRequestKind::Env { name, value } => {
                codec::write_string(&mut buf, name.as_bytes());
                codec::write_string(&mut buf, value.as_bytes());
            }
            ChannelRequestKind::Shell => {}
            ChannelRequestKind::Exec { command } => {
                codec::write_string(&mut buf, command.as_bytes());
            }
            ChannelRequestKind::Subsystem { name } => {
                codec::write_string(&mut buf, name.as_bytes());
            }
            ChannelRequestKind::ExitStatus { status } => {
                codec::write_u32(&mut buf, *status);
            }
            ChannelRequestKind::Other { data, .. } => {
                buf.extend_from_slice(data);
            }
        }
        buf
    }

    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 1;
        let recipient_channel = codec::read_u32(data, &mut offset)?;
        let name = codec::read_utf8_string(data, &mut offset)?;
        let want_reply = codec::read_boolean(data, &mut offset)?;
        let kind = match name.as_str() {
            "pty-req" => {
                let term = codec::read_utf8_string(data, &mut offset)?;
                let columns = codec::read_u32(data, &mut offset)?;
                let rows = codec::read_u32(data, &mut offset)?;
                let _width_px = codec::read_u32(data, &mut offset)?;
                let _height_px = codec::read_u32(data, &mut offset)?;
                let _modes = codec::read_string(data, &mut offset)?;
                ChannelRequestKind::PtyReq {
                    term,
                    columns,
                    rows,
                }
            }
            "env" => {
                let name = codec::read_utf8_string(data, &mut offset)?;
                let value = codec::read_utf8_string(data, &mut offset)?;
                ChannelRequestKind::Env { name, value }
            }
            "shell" => ChannelRequestKind::Shell,
            "exec" => {
                let command = codec::read_utf8_string(data, &mut offset)?;
                ChannelRequestKind::Exec { command }
            }
            "subsystem" => {
                let name = codec::read_utf8_string(data, &mut offset)?;
                ChannelRequestKind::Subsystem { name }
            }
            "exit-status" => {
                let status = codec::read_u32(data, &mut offset)?;
                ChannelRequestKind::ExitStatus { status }
            }
            _ => ChannelRequestKind::Other {
                name,
                data: data[offset..].to_vec(),
            },
        };
        Ok(Self {
            recipient_channel,
            want_reply,
            kind,
        })
    }
}

/// `CHANNEL_SUCCESS` / `CHANNEL_FAILURE` reply payload builder.
pub fn reply_payload(msg_type: MessageType, recipient_channel: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    codec::write_u8(&mut buf, msg_type as u8);
    codec::write_u32(&mut buf, recipient_channel);
    buf
}
