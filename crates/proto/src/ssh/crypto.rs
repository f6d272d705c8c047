//! Symmetric cipher and MAC contexts for the encrypted transport.
//!
//! Packets are encrypted with AES in CBC mode; the IV chains across
//! packets, so one [`CbcCipher`] per direction carries the feedback state
//! for the life of the connection. Integrity is a separate HMAC computed
//! over the packet sequence number followed by the unencrypted packet
//! ([`MacKey::compute`]); the MAC trails the ciphertext on the wire.
//!
//! # Security
//!
//! - MAC verification uses a constant-time comparison ([`subtle`]).
//! - Key material is wiped on drop and redacted from `Debug` output.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes256};
use hmac::{Hmac, Mac};
use scribe_platform::{ScribeError, ScribeResult};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// Negotiable encryption algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// aes128-cbc
    Aes128Cbc,
    /// aes256-cbc
    Aes256Cbc,
}

impl CipherAlgorithm {
    /// Returns the algorithm for a negotiated name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "aes128-cbc" => Some(Self::Aes128Cbc),
            "aes256-cbc" => Some(Self::Aes256Cbc),
            _ => None,
        }
    }

    /// Returns the algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aes128Cbc => "aes128-cbc",
            Self::Aes256Cbc => "aes256-cbc",
        }
    }

    /// Key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128Cbc => 16,
            Self::Aes256Cbc => 32,
        }
    }

    /// Cipher block (and IV) length in bytes.
    pub fn block_len(&self) -> usize {
        AES_BLOCK_SIZE
    }
}

enum AesCipher {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl AesCipher {
    fn encrypt_block(&self, block: &mut [u8; AES_BLOCK_SIZE]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut [u8; AES_BLOCK_SIZE]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.decrypt_block(block),
            Self::Aes256(c) => c.decrypt_block(block),
        }
    }
}

/// One direction's CBC cipher context.
///
/// The feedback register is initialized with the derived IV and then
/// chains: after each operation it holds the last ciphertext block, as
/// the protocol treats the whole connection as one CBC stream.
pub struct CbcCipher {
    cipher: AesCipher,
    feedback: [u8; AES_BLOCK_SIZE],
}

impl CbcCipher {
    /// Creates a context from derived key material.
    ///
    /// # Errors
    ///
    /// Fails if `key` or `iv` have the wrong length for the algorithm.
    pub fn new(algorithm: CipherAlgorithm, key: &[u8], iv: &[u8]) -> ScribeResult<Self> {
        if key.len() != algorithm.key_len() {
            return Err(ScribeError::Config(format!(
                "{} requires a {}-byte key, got {}",
                algorithm.name(),
                algorithm.key_len(),
                key.len()
            )));
        }
        if iv.len() != AES_BLOCK_SIZE {
            return Err(ScribeError::Config(format!(
                "{} requires a {}-byte IV, got {}",
                algorithm.name(),
                AES_BLOCK_SIZE,
                iv.len()
            )));
        }

        let cipher = match algorithm {
            CipherAlgorithm::Aes128Cbc => {
                AesCipher::Aes128(Aes128::new(GenericArray::from_slice(key)))
            }
            CipherAlgorithm::Aes256Cbc => {
                AesCipher::Aes256(Aes256::new(GenericArray::from_slice(key)))
            }
        };

        let mut feedback = [0u8; AES_BLOCK_SIZE];
        feedback.copy_from_slice(iv);

        Ok(Self { cipher, feedback })
    }

    /// Encrypts `data` in place. Length must be a block multiple.
    pub fn encrypt(&mut self, data: &mut [u8]) -> ScribeResult<()> {
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(ScribeError::Protocol(format!(
                "ciphertext length {} is not a block multiple",
                data.len()
            )));
        }

        for chunk in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            let mut block = [0u8; AES_BLOCK_SIZE];
            block.copy_from_slice(chunk);
            for (b, f) in block.iter_mut().zip(self.feedback.iter()) {
                *b ^= f;
            }
            self.cipher.encrypt_block(&mut block);
            chunk.copy_from_slice(&block);
            self.feedback.copy_from_slice(&block);
        }
        Ok(())
    }

    /// Decrypts `data` in place. Length must be a block multiple.
    pub fn decrypt(&mut self, data: &mut [u8]) -> ScribeResult<()> {
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(ScribeError::Protocol(format!(
                "ciphertext length {} is not a block multiple",
                data.len()
            )));
        }

        for chunk in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            let mut ciphertext = [0u8; AES_BLOCK_SIZE];
            ciphertext.copy_from_slice(chunk);

            let mut block = ciphertext;
            self.cipher.decrypt_block(&mut block);
            for (b, f) in block.iter_mut().zip(self.feedback.iter()) {
                *b ^= f;
            }
            chunk.copy_from_slice(&block);
            self.feedback = ciphertext;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CbcCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CbcCipher")
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Negotiable MAC algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    /// hmac-sha1
    HmacSha1,
    /// hmac-sha2-256
    HmacSha256,
}

impl MacAlgorithm {
    /// Returns the algorithm for a negotiated name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "hmac-sha1" => Some(Self::HmacSha1),
            "hmac-sha2-256" => Some(Self::HmacSha256),
            _ => None,
        }
    }

    /// Returns the algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HmacSha1 => "hmac-sha1",
            Self::HmacSha256 => "hmac-sha2-256",
        }
    }

    /// MAC key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            Self::HmacSha1 => 20,
            Self::HmacSha256 => 32,
        }
    }

    /// Tag length appended to each packet.
    pub fn tag_len(&self) -> usize {
        self.key_len()
    }
}

/// One direction's MAC context.
pub struct MacKey {
    algorithm: MacAlgorithm,
    key: Vec<u8>,
}

impl MacKey {
    /// Creates a MAC context from derived key material.
    pub fn new(algorithm: MacAlgorithm, key: &[u8]) -> ScribeResult<Self> {
        if key.len() != algorithm.key_len() {
            return Err(ScribeError::Config(format!(
                "{} requires a {}-byte key, got {}",
                algorithm.name(),
                algorithm.key_len(),
                key.len()
            )));
        }
        Ok(Self {
            algorithm,
            key: key.to_vec(),
        })
    }

    /// Returns the algorithm.
    pub fn algorithm(&self) -> MacAlgorithm {
        self.algorithm
    }

    /// Computes the tag over `sequence_number ∥ packet`.
    pub fn compute(&self, sequence_number: u32, packet: &[u8]) -> Vec<u8> {
        match self.algorithm {
            MacAlgorithm::HmacSha1 => {
                // KeyInit is also in scope for the AES constructors, so
                // the Mac path must be named explicitly.
                let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(&self.key)
                    .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
                mac.update(&sequence_number.to_be_bytes());
                mac.update(packet);
                mac.finalize().into_bytes().to_vec()
            }
            MacAlgorithm::HmacSha256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.key)
                    .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
                mac.update(&sequence_number.to_be_bytes());
                mac.update(packet);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    /// Verifies a received tag in constant time.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::Mac`] on any mismatch; the caller must
    /// treat this as fatal.
    pub fn verify(&self, sequence_number: u32, packet: &[u8], tag: &[u8]) -> ScribeResult<()> {
        let expected = self.compute(sequence_number, packet);
        if expected.len() == tag.len() && bool::from(expected.ct_eq(tag)) {
            Ok(())
        } else {
            Err(ScribeError::Mac(format!(
                "integrity check failed on packet {}",
                sequence_number
            )))
        }
    }
}

impl Drop for MacKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for MacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacKey")
            .field("algorithm", &self.algorithm)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_algorithm_names() {
        assert_eq!(
            CipherAlgorithm::from_name("aes128-cbc"),
            Some(CipherAlgorithm::Aes128Cbc)
        );
        assert_eq!(
            CipherAlgorithm::from_name("aes256-cbc"),
            Some(CipherAlgorithm::Aes256Cbc)
        );
        assert_eq!(CipherAlgorithm::from_name("chacha20-poly1305"), None);
        assert_eq!(CipherAlgorithm::Aes128Cbc.key_len(), 16);
        assert_eq!(CipherAlgorithm::Aes256Cbc.key_len(), 32);
    }

    #[test]
    fn test_cbc_round_trip() {
        let key = [0x42u8; 16];
        let iv = [0x24u8; 16];
        let mut enc = CbcCipher::new(CipherAlgorithm::Aes128Cbc, &key, &iv).unwrap();
        let mut dec = CbcCipher::new(CipherAlgorithm::Aes128Cbc, &key, &iv).unwrap();

        let plaintext = vec![0xA5u8; 64];
        let mut data = plaintext.clone();
        enc.encrypt(&mut data).unwrap();
        assert_ne!(data, plaintext);
        dec.decrypt(&mut data).unwrap();
        assert_eq!(data, plaintext);
    }

    #[test]
    fn test_cbc_chains_across_calls() {
        let key = [0x42u8; 32];
        let iv = [0x24u8; 16];
        let mut enc = CbcCipher::new(CipherAlgorithm::Aes256Cbc, &key, &iv).unwrap();
        let mut dec = CbcCipher::new(CipherAlgorithm::Aes256Cbc, &key, &iv).unwrap();

        // Two packets through the same context must decrypt in order.
        let mut first = vec![0x01u8; 32];
        let mut second = vec![0x02u8; 48];
        enc.encrypt(&mut first).unwrap();
        enc.encrypt(&mut second).unwrap();

        dec.decrypt(&mut first).unwrap();
        dec.decrypt(&mut second).unwrap();
        assert_eq!(first, vec![0x01u8; 32]);
        assert_eq!(second, vec![0x02u8; 48]);

        // Identical plaintext blocks must not produce identical
        // ciphertext once the feedback register has advanced.
        let mut a = vec![0x0Fu8; 16];
        let mut b = vec![0x0Fu8; 16];
        enc.encrypt(&mut a).unwrap();
        enc.encrypt(&mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_cbc_rejects_partial_blocks() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        let mut cipher = CbcCipher::new(CipherAlgorithm::Aes128Cbc, &key, &iv).unwrap();
        let mut data = vec![0u8; 15];
        assert!(cipher.encrypt(&mut data).is_err());
        assert!(cipher.decrypt(&mut data).is_err());
    }

    #[test]
    fn test_cbc_rejects_bad_key_sizes() {
        assert!(CbcCipher::new(CipherAlgorithm::Aes128Cbc, &[0u8; 32], &[0u8; 16]).is_err());
        assert!(CbcCipher::new(CipherAlgorithm::Aes128Cbc, &[0u8; 16], &[0u8; 8]).is_err());
    }

    #[test]
    fn test_mac_algorithm_names() {
        assert_eq!(
            MacAlgorithm::from_name("hmac-sha1"),
            Some(MacAlgorithm::HmacSha1)
        );
        assert_eq!(
            MacAlgorithm::from_name("hmac-sha2-256"),
            Some(MacAlgorithm::HmacSha256)
        );
        assert_eq!(MacAlgorithm::from_name("hmac-md5"), None);
        assert_eq!(MacAlgorithm::HmacSha1.tag_len(), 20);
        assert_eq!(MacAlgorithm::HmacSha256.tag_len(), 32);
    }

    #[test]
    fn test_mac_verify_round_trip() {
        let key = MacKey::new(MacAlgorithm::HmacSha256, &[0x11u8; 32]).unwrap();
        let tag = key.compute(7, b"packet bytes");
        assert_eq!(tag.len(), 32);
        assert!(key.verify(7, b"packet bytes", &tag).is_ok());
    }

    #[test]
    fn test_mac_sequence_number_matters() {
        let key = MacKey::new(MacAlgorithm::HmacSha1, &[0x11u8; 20]).unwrap();
        let tag = key.compute(7, b"packet bytes");
        let result = key.verify(8, b"packet bytes", &tag);
        assert!(matches!(result, Err(ScribeError::Mac(_))));
    }

    #[test]
    fn test_mac_tampered_packet_fails() {
        let key = MacKey::new(MacAlgorithm::HmacSha256, &[0x11u8; 32]).unwrap();
        let tag = key.compute(0, b"packet bytes");
        assert!(key.verify(0, b"Packet bytes", &tag).is_err());
        assert!(key.verify(0, b"packet bytes", &tag[..31]).is_err());
    }

    #[test]
    fn test_mac_rejects_bad_key_size() {
        assert!(MacKey::new(MacAlgorithm::HmacSha256, &[0u8; 16]).is_err());
    }
}
