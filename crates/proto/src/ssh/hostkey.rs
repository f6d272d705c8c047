//! Host key blobs and signature verification (RFC 4253 Section 6.6).
//!
//! During key exchange the server proves its identity by signing the
//! exchange hash with its host key. The public key travels as a blob:
//!
//! ```text
//! string  algorithm name ("ssh-ed25519" | "ssh-rsa" | "ssh-dss")
//! ...     algorithm-specific fields
//! ```
//!
//! - `ssh-ed25519`: string public key (32 bytes)
//! - `ssh-rsa`: mpint e, mpint n
//! - `ssh-dss`: mpint p, mpint q, mpint g, mpint y
//!
//! Signature blobs carry the algorithm name again, then the raw
//! signature. Verification dispatches on the name embedded in the host
//! key blob; a mismatch between key and signature algorithm fails.
//!
//! [`Ed25519HostKey`] also provides generation and signing, used by
//! in-process peers in the integration tests.

use crate::ssh::codec;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use scribe_platform::{ScribeError, ScribeResult};
use sha1::{Digest, Sha1};
use sha2::Sha256;

/// Supported host key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyAlgorithm {
    /// ssh-ed25519
    SshEd25519,
    /// ssh-rsa (PKCS#1 v1.5 with SHA-1)
    SshRsa,
    /// ssh-dss (DSA with SHA-1)
    SshDss,
}

impl HostKeyAlgorithm {
    /// Returns the algorithm for a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ssh-ed25519" => Some(Self::SshEd25519),
            "ssh-rsa" => Some(Self::SshRsa),
            "ssh-dss" => Some(Self::SshDss),
            _ => None,
        }
    }

    /// Returns the wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SshEd25519 => "ssh-ed25519",
            Self::SshRsa => "ssh-rsa",
            Self::SshDss => "ssh-dss",
        }
    }
}

/// Reads the algorithm name embedded at the front of a key or signature
/// blob.
pub fn algorithm_from_blob(blob: &[u8]) -> ScribeResult<HostKeyAlgorithm> {
    let mut offset = 0;
    let name = codec::read_utf8_string(blob, &mut offset)?;
    HostKeyAlgorithm::from_name(&name)
        .ok_or_else(|| ScribeError::KeyExchange(format!("unsupported host key algorithm: {}", name)))
}

/// Formats a host key fingerprint for display (`SHA256:` + base64).
pub fn fingerprint(host_key_blob: &[u8]) -> String {
    use base64::Engine;
    let mut hasher = Sha256::new();
    hasher.update(host_key_blob);
    format!(
        "SHA256:{}",
        base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
    )
}

/// Verifies `signature_blob` over `data` with the key in `host_key_blob`.
///
/// # Errors
///
/// Returns [`ScribeError::KeyExchange`] on malformed blobs, an algorithm
/// mismatch, or a signature that does not verify.
pub fn verify_signature(
    host_key_blob: &[u8],
    signature_blob: &[u8],
    data: &[u8],
) -> ScribeResult<()> {
    let key_alg = algorithm_from_blob(host_key_blob)?;
    let sig_alg = algorithm_from_blob(signature_blob)?;
    if key_alg != sig_alg {
        return Err(ScribeError::KeyExchange(format!(
            "signature algorithm {} does not match host key algorithm {}",
            sig_alg.name(),
            key_alg.name()
        )));
    }

    // Both blobs start with the algorithm name string.
    let mut key_offset = 0;
    codec::read_string(host_key_blob, &mut key_offset)?;
    let mut sig_offset = 0;
    codec::read_string(signature_blob, &mut sig_offset)?;
    let signature = codec::read_string(signature_blob, &mut sig_offset)?;

    match key_alg {
        HostKeyAlgorithm::SshEd25519 => {
            let key_bytes = codec::read_string(host_key_blob, &mut key_offset)?;
            let key_array: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
                ScribeError::KeyExchange("Ed25519 host key must be 32 bytes".to_string())
            })?;
            let verifying = VerifyingKey::from_bytes(&key_array)
                .map_err(|e| ScribeError::KeyExchange(format!("invalid Ed25519 key: {}", e)))?;
            let signature = Signature::from_slice(&signature)
                .map_err(|e| ScribeError::KeyExchange(format!("invalid Ed25519 signature: {}", e)))?;
            verifying
                .verify(data, &signature)
                .map_err(|_| ScribeError::KeyExchange("Ed25519 signature rejected".to_string()))
        }
        HostKeyAlgorithm::SshRsa => {
            let e = codec::read_mpint(host_key_blob, &mut key_offset)?;
            let n = codec::read_mpint(host_key_blob, &mut key_offset)?;

            // Some servers strip leading zeros from the signature; ring
            // expects it at exactly the modulus length.
            let mut sig = signature;
            if sig.len() < n.len() {
                let mut padded = vec![0u8; n.len() - sig.len()];
                padded.extend_from_slice(&sig);
                sig = padded;
            }

            let key = ring::signature::RsaPublicKeyComponents { n: &n, e: &e };
            key.verify(
                &ring::signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
                data,
                &sig,
            )
            .map_err(|_| ScribeError::KeyExchange("RSA signature rejected".to_string()))
        }
        HostKeyAlgorithm::SshDss => {
            let p = BigUint::from_bytes_be(&codec::read_mpint(host_key_blob, &mut key_offset)?);
            let q = BigUint::from_bytes_be(&codec::read_mpint(host_key_blob, &mut key_offset)?);
            let g = BigUint::from_bytes_be(&codec::read_mpint(host_key_blob, &mut key_offset)?);
            let y = BigUint::from_bytes_be(&codec::read_mpint(host_key_blob, &mut key_offset)?);
            verify_dss(&p, &q, &g, &y, &signature, data)
        }
    }
}

/// DSA verification over the fixed 160-bit subgroup (FIPS 186, SHA-1).
///
/// The wire signature is `r ∥ s`, two 160-bit big-endian integers.
fn verify_dss(
    p: &BigUint,
    q: &BigUint,
    g: &BigUint,
    y: &BigUint,
    signature: &[u8],
    data: &[u8],
) -> ScribeResult<()> {
    if signature.len() != 40 {
        return Err(ScribeError::KeyExchange(format!(
            "DSA signature must be 40 bytes, got {}",
            signature.len()
        )));
    }
    let r = BigUint::from_bytes_be(&signature[..20]);
    let s = BigUint::from_bytes_be(&signature[20..]);

    if r.is_zero() || s.is_zero() || &r >= q || &s >= q {
        return Err(ScribeError::KeyExchange(
            "DSA signature values out of range".to_string(),
        ));
    }

    let w = mod_inverse(&s, q)
        .ok_or_else(|| ScribeError::KeyExchange("DSA signature not invertible".to_string()))?;

    let mut hasher = Sha1::new();
    hasher.update(data);
    let digest = BigUint::from_bytes_be(&hasher.finalize());

    let u1 = (&digest * &w) % q;
    let u2 = (&r * &w) % q;
    let v = (g.modpow(&u1, p) * y.modpow(&u2, p)) % p % q;

    if v == r {
        Ok(())
    } else {
        Err(ScribeError::KeyExchange(
            "DSA signature rejected".to_string(),
        ))
    }
}

/// Modular inverse via the extended Euclidean algorithm.
fn mod_inverse(value: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    let value = BigInt::from_biguint(Sign::Plus, value.clone());
    let modulus_int = BigInt::from_biguint(Sign::Plus, modulus.clone());
    let ext = value.extended_gcd(&modulus_int);
    if !ext.gcd.is_one() {
        return None;
    }
    let mut inv = ext.x % &modulus_int;
    if inv.sign() == Sign::Minus {
        inv += &modulus_int;
    }
    inv.to_biguint()
}

/// An Ed25519 host key pair.
///
/// The client only ever verifies host keys; generation and signing exist
/// for in-process peers (and are exercised heavily by the integration
/// tests).
pub struct Ed25519HostKey {
    signing: SigningKey,
}

impl Ed25519HostKey {
    /// Generates a fresh key pair.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing: SigningKey::generate(&mut rng),
        }
    }

    /// Returns the public key as a wire-format host key blob.
    pub fn public_key_blob(&self) -> Vec<u8> {
        let mut blob = Vec::new();
        codec::write_string(&mut blob, b"ssh-ed25519");
        codec::write_string(&mut blob, self.signing.verifying_key().as_bytes());
        blob
    }

    /// Signs `data`, returning a wire-format signature blob.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signature = self.signing.sign(data);
        let mut blob = Vec::new();
        codec::write_string(&mut blob, b"ssh-ed25519");
        codec::write_string(&mut blob, &signature.to_bytes());
        blob
    }
}

impl std::fmt::Debug for Ed25519HostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519HostKey")
            .field("public", &hex::encode(self.signing.verifying_key().as_bytes()))
            .finish()
    }
}
