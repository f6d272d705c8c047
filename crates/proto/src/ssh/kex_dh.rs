//! Safe-prime Diffie-Hellman key exchange (RFC 4253 Section 8).
//!
//! Two fixed groups are supported, chosen by algorithm negotiation:
//!
//! - `diffie-hellman-group1-sha1`: 1024-bit Oakley Group 2, SHA-1
//! - `diffie-hellman-group14-sha256`: 2048-bit Group 14, SHA-256 (RFC 8268)
//!
//! The client generates a private exponent `x` and sends `e = g^x mod p`
//! (`SSH_MSG_KEXDH_INIT`); the server replies with its host key blob,
//! `f = g^y mod p`, and a signature over the exchange hash
//! (`SSH_MSG_KEXDH_REPLY`). Both sides compute the shared secret
//! `K = f^x mod p = e^y mod p` and the exchange hash
//!
//! ```text
//! H = HASH(V_C ∥ V_S ∥ I_C ∥ I_S ∥ K_S ∥ e ∥ f ∥ K)
//! ```
//!
//! Session keys are derived from `K`, `H`, a direction letter, and the
//! session identifier with [`derive_key`].
//!
//! # Security
//!
//! - Peer public values are validated to lie in (1, p-1); degenerate
//!   values are rejected before any secret is computed.
//! - Private exponents are wiped on drop.

use crate::ssh::codec;
use crate::ssh::message::MessageType;
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use once_cell::sync::Lazy;
use scribe_platform::{ScribeError, ScribeResult};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Parses a hard-coded hex prime, validating the expected bit width.
/// `None` here means the constant itself is corrupt; `prime()` turns
/// that into an error rather than degrading to a bogus modulus.
fn parse_prime(hex: &[u8], bits: u64) -> Option<BigUint> {
    let digits: Vec<u8> = hex
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    BigUint::parse_bytes(&digits, 16).filter(|p| p.bits() == bits)
}

/// 1024-bit safe prime (Oakley Group 2, RFC 2409 Section 6.2).
static GROUP1_P: Lazy<Option<BigUint>> = Lazy::new(|| {
    parse_prime(
        b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
          29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
          EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
          E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
          EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381\
          FFFFFFFFFFFFFFFF",
        1024,
    )
});

/// 2048-bit safe prime (Group 14, RFC 3526 Section 3).
static GROUP14_P: Lazy<Option<BigUint>> = Lazy::new(|| {
    parse_prime(
        b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
          29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
          EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
          E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
          EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
          C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
          83655D23DCA3AD961C62F356208552BB9ED529077096966D\
          670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
          E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
          DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
          15728E5A8AACAA68FFFFFFFFFFFFFFFF",
        2048,
    )
});

/// Generator for both groups.
static G: Lazy<BigUint> = Lazy::new(|| BigUint::from(2u32));

/// A negotiable Diffie-Hellman group with its associated hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhGroup {
    /// diffie-hellman-group1-sha1 (1024-bit, SHA-1)
    Group1Sha1,
    /// diffie-hellman-group14-sha256 (2048-bit, SHA-256)
    Group14Sha256,
}

impl DhGroup {
    /// Returns the group for a negotiated algorithm name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "diffie-hellman-group1-sha1" => Some(Self::Group1Sha1),
            "diffie-hellman-group14-sha256" => Some(Self::Group14Sha256),
            _ => None,
        }
    }

    /// Returns the algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Group1Sha1 => "diffie-hellman-group1-sha1",
            Self::Group14Sha256 => "diffie-hellman-group14-sha256",
        }
    }

    /// Returns the group prime.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::Config`] if the built-in constant failed
    /// validation, which can only mean the binary is corrupt.
    pub fn prime(&self) -> ScribeResult<&'static BigUint> {
        let prime = match self {
            Self::Group1Sha1 => GROUP1_P.as_ref(),
            Self::Group14Sha256 => GROUP14_P.as_ref(),
        };
        prime.ok_or_else(|| {
            ScribeError::Config(format!("{} group prime failed validation", self.name()))
        })
    }

    /// Digest length of the group's hash in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Group1Sha1 => 20,
            Self::Group14Sha256 => 32,
        }
    }

    /// Hashes concatenated chunks with the group's hash function.
    pub fn hash(&self, chunks: &[&[u8]]) -> Vec<u8> {
        match self {
            Self::Group1Sha1 => {
                let mut hasher = Sha1::new();
                for chunk in chunks {
                    hasher.update(chunk);
                }
                hasher.finalize().to_vec()
            }
            Self::Group14Sha256 => {
                let mut hasher = Sha256::new();
                for chunk in chunks {
                    hasher.update(chunk);
                }
                hasher.finalize().to_vec()
            }
        }
    }
}

/// One side of a Diffie-Hellman exchange.
pub struct DhExchange {
    group: DhGroup,
    private: BigUint,
    public: BigUint,
}

impl DhExchange {
    /// Generates a fresh private exponent and the matching public value.
    pub fn new(group: DhGroup) -> ScribeResult<Self> {
        let p = group.prime()?;
        let mut rng = rand::thread_rng();
        // x in [2, p-2]
        let private = rng.gen_biguint_range(&BigUint::from(2u32), &(p - BigUint::from(2u32)));
        let public = G.modpow(&private, p);
        Ok(Self {
            group,
            private,
            public,
        })
    }

    /// Returns the group this exchange runs over.
    pub fn group(&self) -> DhGroup {
        self.group
    }

    /// Returns the public value as a big-endian magnitude.
    pub fn public_value(&self) -> Vec<u8> {
        self.public.to_bytes_be()
    }

    /// Computes the shared secret from the peer's public value.
    ///
    /// # Errors
    ///
    /// Returns [`ScribeError::KeyExchange`] if the peer value is not in
    /// the open interval (1, p-1).
    pub fn compute_shared(&self, peer_public: &[u8]) -> ScribeResult<Vec<u8>> {
        let p = self.group.prime()?;
        let peer = BigUint::from_bytes_be(peer_public);

        let one = BigUint::one();
        if peer <= one || peer >= p - &one {
            return Err(ScribeError::KeyExchange(
                "peer public value out of range".to_string(),
            ));
        }

        Ok(peer.modpow(&self.private, p).to_bytes_be())
    }
}

impl Drop for DhExchange {
    fn drop(&mut self) {
        // Wipe the private exponent.
        self.private = BigUint::zero();
    }
}

impl std::fmt::Debug for DhExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhExchange")
            .field("group", &self.group)
            .field("private", &"<redacted>")
            .finish()
    }
}

/// SSH_MSG_KEXDH_INIT: the client's public value `e`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexDhInit {
    /// Client public value, big-endian magnitude.
    pub public_value: Vec<u8>,
}

impl KexDhInit {
    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::KexDhInit as u8);
        codec::write_mpint(&mut buf, &self.public_value);
        buf
    }

    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 0;
        let msg_type = codec::read_u8(data, &mut offset)?;
        if msg_type != MessageType::KexDhInit as u8 {
            return Err(ScribeError::Protocol(format!(
                "expected SSH_MSG_KEXDH_INIT, got message {}",
                msg_type
            )));
        }
        let public_value = codec::read_mpint(data, &mut offset)?;
        Ok(Self { public_value })
    }
}

/// SSH_MSG_KEXDH_REPLY: host key blob, server public value `f`, and the
/// signature over the exchange hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexDhReply {
    /// Server host key blob (K_S).
    pub host_key: Vec<u8>,
    /// Server public value, big-endian magnitude.
    pub public_value: Vec<u8>,
    /// Signature blob over the exchange hash.
    pub signature: Vec<u8>,
}

impl KexDhReply {
    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::KexDhReply as u8);
        codec::write_string(&mut buf, &self.host_key);
        codec::write_mpint(&mut buf, &self.public_value);
        codec::write_string(&mut buf, &self.signature);
        buf
    }

    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 0;
        let msg_type = codec::read_u8(data, &mut offset)?;
        if msg_type != MessageType::KexDhReply as u8 {
            return Err(ScribeError::Protocol(format!(
                "expected SSH_MSG_KEXDH_REPLY, got message {}",
                msg_type
            )));
        }
        let host_key = codec::read_string(data, &mut offset)?;
        let public_value = codec::read_mpint(data, &mut offset)?;
        let signature = codec::read_string(data, &mut offset)?;
        Ok(Self {
            host_key,
            public_value,
            signature,
        })
    }
}

/// Computes the exchange hash H.
///
/// `H = HASH(V_C ∥ V_S ∥ I_C ∥ I_S ∥ K_S ∥ e ∥ f ∥ K)` where the version
/// strings, KEXINIT payloads, and host key are hashed as `string` fields
/// and `e`, `f`, `K` as `mpint` fields.
#[allow(clippy::too_many_arguments)]
pub fn compute_exchange_hash(
    group: DhGroup,
    client_version: &str,
    server_version: &str,
    client_kexinit: &[u8],
    server_kexinit: &[u8],
    host_key: &[u8],
    client_public: &[u8],
    server_public: &[u8],
    shared_secret: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::new();
    codec::write_string(&mut buf, client_version.as_bytes());
    codec::write_string(&mut buf, server_version.as_bytes());
    codec::write_string(&mut buf, client_kexinit);
    codec::write_string(&mut buf, server_kexinit);
    codec::write_string(&mut buf, host_key);
    codec::write_mpint(&mut buf, client_public);
    codec::write_mpint(&mut buf, server_public);
    codec::write_mpint(&mut buf, shared_secret);
    group.hash(&[&buf])
}

/// Derives one session key (RFC 4253 Section 7.2).
///
/// `K1 = HASH(K ∥ H ∥ letter ∥ session_id)`, then additional rounds
/// `Kn = HASH(K ∥ H ∥ K1 ∥ … ∥ Kn-1)` are concatenated until the material
/// reaches `needed` bytes, and the result is truncated to exactly that
/// length. `K` is hashed in mpint encoding.
pub fn derive_key(
    group: DhGroup,
    shared_secret: &[u8],
    exchange_hash: &[u8],
    letter: u8,
    session_id: &[u8],
    needed: usize,
) -> Vec<u8> {
    let mut k_mpint = Vec::new();
    codec::write_mpint(&mut k_mpint, shared_secret);

    let mut material = group.hash(&[&k_mpint, exchange_hash, &[letter], session_id]);
    while material.len() < needed {
        let round = group.hash(&[&k_mpint, exchange_hash, &material]);
        material.extend_from_slice(&round);
    }
    material.truncate(needed);
    material
}
