//! Binary packet framing (RFC 4253 Section 6).
//!
//! Wire format of one packet:
//!
//! ```text
//! uint32    packet_length  (length of everything after this field)
//! byte      padding_length
//! byte[n1]  payload
//! byte[n2]  random padding
//! byte[m]   MAC            (appended by the transport once keys are active)
//! ```
//!
//! [`Packet::wrap`] appends random padding so the framed packet, length
//! field included, is an exact multiple of the active cipher's block size
//! (minimum 8), with padding length in [4, 255]. The length field is part
//! of the encrypted region, which is why alignment covers it.
//!
//! When compression has been negotiated the payload is compressed before
//! wrapping and inflated after parsing; see [`Compressor`].
//!
//! # Security
//!
//! - Declared lengths are bounded by [`MAX_PACKET_SIZE`] before any
//!   allocation.
//! - Every parse is bounds-checked and fails with a protocol error
//!   instead of reading out of range.

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use rand::RngCore;
use scribe_platform::{ScribeError, ScribeResult};
use std::io::Read;

/// Maximum accepted packet size in bytes (RFC 4253 Section 6.1).
pub const MAX_PACKET_SIZE: usize = 35000;

/// Minimum padding length (RFC 4253 Section 6).
pub const MIN_PADDING_LEN: u8 = 4;

/// Maximum padding length.
pub const MAX_PADDING_LEN: u8 = 255;

/// A framed protocol packet.
///
/// Ephemeral: a `Packet` exists only for the duration of one send or
/// receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Vec<u8>,
}

impl Packet {
    /// Creates a packet holding `payload`.
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Returns the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the packet, returning the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Frames `payload` for the wire, aligned to `block_size`.
    ///
    /// The returned buffer is `packet_length ∥ padding_length ∥ payload ∥
    /// random padding`, and its total length is a multiple of
    /// `max(block_size, 8)`. Fails if the payload alone exceeds
    /// [`MAX_PACKET_SIZE`].
    pub fn wrap(payload: &[u8], block_size: usize) -> ScribeResult<Vec<u8>> {
        if payload.len() > MAX_PACKET_SIZE {
            return Err(ScribeError::Protocol(format!(
                "payload too large: {} bytes (max {})",
                payload.len(),
                MAX_PACKET_SIZE
            )));
        }

        let block = block_size.max(8);
        // 4-byte length + 1-byte padding length precede the payload.
        let mut padding = block - ((payload.len() + 5) % block);
        if padding < MIN_PADDING_LEN as usize {
            padding += block;
        }

        let packet_length = (1 + payload.len() + padding) as u32;
        let mut out = Vec::with_capacity(4 + packet_length as usize);
        out.extend_from_slice(&packet_length.to_be_bytes());
        out.push(padding as u8);
        out.extend_from_slice(payload);

        let mut pad = vec![0u8; padding];
        rand::thread_rng().fill_bytes(&mut pad);
        out.extend_from_slice(&pad);

        Ok(out)
    }

    /// Parses a framed packet (length field included, MAC excluded).
    pub fn unwrap(data: &[u8]) -> ScribeResult<Self> {
        if data.len() < 4 {
            return Err(ScribeError::Protocol(
                "malformed packet: missing length field".to_string(),
            ));
        }

        let packet_length =
            u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if packet_length < 2 || packet_length > MAX_PACKET_SIZE {
            return Err(ScribeError::Protocol(format!(
                "malformed packet: declared length {} out of range",
                packet_length
            )));
        }
        if data.len() != 4 + packet_length {
            return Err(ScribeError::Protocol(format!(
                "malformed packet: have {} bytes, declared {}",
                data.len(),
                4 + packet_length
            )));
        }

        let padding_length = data[4] as usize;
        if padding_length < MIN_PADDING_LEN as usize || padding_length + 1 > packet_length {
            return Err(ScribeError::Protocol(format!(
                "malformed packet: padding length {} invalid",
                padding_length
            )));
        }

        let payload_len = packet_length - 1 - padding_length;
        let payload = data[5..5 + payload_len].to_vec();

        Ok(Self { payload })
    }
}

/// Payload compression negotiated during key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compressor {
    /// No compression ("none").
    None,
    /// zlib deflate ("zlib").
    Zlib,
}

impl Compressor {
    /// Returns the compressor for a negotiated algorithm name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "zlib" => Some(Self::Zlib),
            _ => None,
        }
    }

    /// Compresses an outbound payload.
    pub fn compress(&self, payload: &[u8]) -> ScribeResult<Vec<u8>> {
        match self {
            Self::None => Ok(payload.to_vec()),
            Self::Zlib => {
                let mut out = Vec::new();
                ZlibEncoder::new(payload, Compression::default())
                    .read_to_end(&mut out)
                    .map_err(ScribeError::Io)?;
                Ok(out)
            }
        }
    }

    /// Inflates an inbound payload, bounded by [`MAX_PACKET_SIZE`].
    pub fn decompress(&self, payload: &[u8]) -> ScribeResult<Vec<u8>> {
        match self {
            Self::None => Ok(payload.to_vec()),
            Self::Zlib => {
                let mut out = Vec::new();
                ZlibDecoder::new(payload)
                    .take(MAX_PACKET_SIZE as u64 + 1)
                    .read_to_end(&mut out)
                    .map_err(ScribeError::Io)?;
                if out.len() > MAX_PACKET_SIZE {
                    return Err(ScribeError::Protocol(
                        "decompressed payload exceeds packet size bound".to_string(),
                    ));
                }
                Ok(out)
            }
        }
    }
}
