//! File transfer packet framing.
//!
//! Each packet is `u32 length ∥ u8 type ∥ body`, carried opaquely in
//! channel data. Channel message boundaries mean nothing here: one
//! channel data event may hold several packets or a fraction of one, so
//! inbound bytes accumulate in [`SftpFraming`] until whole packets can
//! be cut.

use scribe_platform::{ScribeError, ScribeResult};

/// Largest packet body accepted from a server.
const MAX_SFTP_PACKET: usize = 256 * 1024;

/// Frames an outbound packet of `packet_type` with `body`.
pub fn frame(packet_type: u8, body: &[u8]) -> Vec<u8> {
    let length = 1 + body.len();
    let mut buf = Vec::with_capacity(4 + length);
    buf.extend_from_slice(&(length as u32).to_be_bytes());
    buf.push(packet_type);
    buf.extend_from_slice(body);
    buf
}

/// Reassembles packets from the channel byte stream.
#[derive(Debug, Default)]
pub struct SftpFraming {
    buffer: Vec<u8>,
}

impl SftpFraming {
    /// New, empty reassembly buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends channel bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Cuts the next whole packet, if buffered.
    pub fn next_packet(&mut self) -> ScribeResult<Option<(u8, Vec<u8>)>> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let length =
            u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                as usize;
        if length == 0 || length > MAX_SFTP_PACKET {
            return Err(ScribeError::Protocol(format!(
                "file transfer packet length {} out of range",
                length
            )));
        }
        if self.buffer.len() < 4 + length {
            return Ok(None);
        }

        let packet_type = self.buffer[4];
        let body = self.buffer[5..4 + length].to_vec();
        self.buffer.drain(..4 + length);
        Ok(Some((packet_type, body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_packet_round_trip() {
        let framed = frame(101, b"body-bytes");
        let mut framing = SftpFraming::new();
        framing.push(&framed);
        let (packet_type, body) = framing.next_packet().unwrap().unwrap();
        assert_eq!(packet_type, 101);
        assert_eq!(body, b"body-bytes");
        assert!(framing.next_packet().unwrap().is_none());
    }

    #[test]
    fn test_packet_split_across_pushes() {
        let framed = frame(103, &vec![7u8; 100]);
        let mut framing = SftpFraming::new();
        framing.push(&framed[..3]);
        assert!(framing.next_packet().unwrap().is_none());
        framing.push(&framed[3..50]);
        assert!(framing.next_packet().unwrap().is_none());
        framing.push(&framed[50..]);
        let (packet_type, body) = framing.next_packet().unwrap().unwrap();
        assert_eq!(packet_type, 103);
        assert_eq!(body.len(), 100);
    }

    #[test]
    fn test_multiple_packets_in_one_push() {
        let mut bytes = frame(101, b"first");
        bytes.extend_from_slice(&frame(102, b"second"));
        let mut framing = SftpFraming::new();
        framing.push(&bytes);
        assert_eq!(
            framing.next_packet().unwrap().unwrap(),
            (101, b"first".to_vec())
        );
        assert_eq!(
            framing.next_packet().unwrap().unwrap(),
            (102, b"second".to_vec())
        );
        assert!(framing.next_packet().unwrap().is_none());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut framing = SftpFraming::new();
        framing.push(&u32::MAX.to_be_bytes());
        framing.push(&[1, 2, 3]);
        assert!(framing.next_packet().is_err());
    }
}
