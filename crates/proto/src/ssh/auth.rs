//! Authentication protocol messages (RFC 4252) and the
//! keyboard-interactive extension (RFC 4256).
//!
//! These are the wire forms only; method ordering and retry policy live
//! in [`crate::ssh::negotiator`].
//!
//! # Security
//!
//! Password material is zeroed on drop and never logged.

use crate::ssh::codec;
use crate::ssh::message::MessageType;
use scribe_platform::{ScribeError, ScribeResult};
use zeroize::Zeroize;

/// The service authentication grants access to.
pub const CONNECTION_SERVICE: &str = "ssh-connection";

/// A `USERAUTH_REQUEST` in one of its method forms.
#[derive(Clone)]
pub enum AuthRequest {
    /// The probing "none" method.
    None {
        /// Account name.
        username: String,
    },
    /// Password authentication.
    Password {
        /// Account name.
        username: String,
        /// The password, zeroed on drop.
        password: String,
    },
    /// Public key authentication.
    ///
    /// Without a signature this is the query form asking whether the
    /// key is acceptable; with one it is the real attempt.
    PublicKey {
        /// Account name.
        username: String,
        /// Public key algorithm name.
        algorithm: String,
        /// Public key blob.
        key_blob: Vec<u8>,
        /// Signature over the session-bound request, if attempting.
        signature: Option<Vec<u8>>,
    },
    /// Keyboard-interactive authentication.
    KeyboardInteractive {
        /// Account name.
        username: String,
    },
}

impl AuthRequest {
    /// Returns the method name on the wire.
    pub fn method_name(&self) -> &'static str {
        match self {
            AuthRequest::None { .. } => "none",
            AuthRequest::Password { .. } => "password",
            AuthRequest::PublicKey { .. } => "publickey",
            AuthRequest::KeyboardInteractive { .. } => "keyboard-interactive",
        }
    }

    /// Returns the account name.
    pub fn username(&self) -> &str {
        match self {
            AuthRequest::None { username }
            | AuthRequest::Password { username, .. }
            | AuthRequest::PublicKey { username, .. }
            | AuthRequest::KeyboardInteractive { username } => username,
        }
    }

    /// Serializes to a `USERAUTH_REQUEST` payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::UserauthRequest as u8);
        codec::write_string(&mut buf, self.username().as_bytes());
        codec::write_string(&mut buf, CONNECTION_SERVICE.as_bytes());
        codec::write_string(&mut buf, self.method_name().as_bytes());
        match self {
            AuthRequest::None { .. } => {}
            AuthRequest::Password { password, .. } => {
                codec::write_boolean(&mut buf, false);
                codec::write_string(&mut buf, password.as_bytes());
            }
            AuthRequest::PublicKey {
                algorithm,
                key_blob,
                signature,
                ..
            } => {
                codec::write_boolean(&mut buf, signature.is_some());
                codec::write_string(&mut buf, algorithm.as_bytes());
                codec::write_string(&mut buf, key_blob);
                if let Some(signature) = signature {
                    codec::write_string(&mut buf, signature);
                }
            }
            AuthRequest::KeyboardInteractive { .. } => {
                codec::write_string(&mut buf, b""); // language tag
                codec::write_string(&mut buf, b""); // submethods
            }
        }
        buf
    }

    /// Parses a `USERAUTH_REQUEST` payload (for in-process peers).
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 1;
        let username = codec::read_utf8_string(data, &mut offset)?;
        let service = codec::read_utf8_string(data, &mut offset)?;
        if service != CONNECTION_SERVICE {
            return Err(ScribeError::Protocol(format!(
                "unsupported auth service: {}",
                service
            )));
        }
        let method = codec::read_utf8_string(data, &mut offset)?;
        match method.as_str() {
            "none" => Ok(AuthRequest::None { username }),
            "password" => {
                let _change = codec::read_boolean(data, &mut offset)?;
                let password = codec::read_utf8_string(data, &mut offset)?;
                Ok(AuthRequest::Password { username, password })
            }
            "publickey" => {
                let has_signature = codec::read_boolean(data, &mut offset)?;
                let algorithm = codec::read_utf8_string(data, &mut offset)?;
                let key_blob = codec::read_string(data, &mut offset)?;
                let signature = if has_signature {
                    Some(codec::read_string(data, &mut offset)?)
                } else {
                    None
                };
                Ok(AuthRequest::PublicKey {
                    username,
                    algorithm,
                    key_blob,
                    signature,
                })
            }
            "keyboard-interactive" => {
                let _language = codec::read_string(data, &mut offset)?;
                let _submethods = codec::read_string(data, &mut offset)?;
                Ok(AuthRequest::KeyboardInteractive { username })
            }
            other => Err(ScribeError::Protocol(format!(
                "unknown auth method: {}",
                other
            ))),
        }
    }
}

impl Drop for AuthRequest {
    fn drop(&mut self) {
        if let AuthRequest::Password { password, .. } = self {
            password.zeroize();
        }
    }
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("username", &self.username())
            .field("method", &self.method_name())
            .finish()
    }
}

/// A `USERAUTH_FAILURE` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    /// Methods the server will still accept.
    pub methods_can_continue: Vec<String>,
    /// True when the attempted method succeeded but more are required.
    pub partial_success: bool,
}

impl AuthFailure {
    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::UserauthFailure as u8);
        codec::write_name_list(&mut buf, &self.methods_can_continue);
        codec::write_boolean(&mut buf, self.partial_success);
        buf
    }

    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 1;
        let methods_can_continue = codec::read_name_list(data, &mut offset)?;
        let partial_success = codec::read_boolean(data, &mut offset)?;
        Ok(Self {
            methods_can_continue,
            partial_success,
        })
    }
}

/// A `USERAUTH_BANNER` message.
#[derive(Debug, Clone)]
pub struct AuthBanner {
    /// Banner text for display.
    pub message: String,
}

impl AuthBanner {
    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 1;
        let message = codec::read_utf8_string(data, &mut offset)?;
        let _language = codec::read_string(data, &mut offset)?;
        Ok(Self { message })
    }

    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::UserauthBanner as u8);
        codec::write_string(&mut buf, self.message.as_bytes());
        codec::write_string(&mut buf, b"");
        buf
    }
}

/// A `USERAUTH_PK_OK` reply to a public key query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPkOk {
    /// Echoed algorithm name.
    pub algorithm: String,
    /// Echoed key blob.
    pub key_blob: Vec<u8>,
}

impl AuthPkOk {
    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 1;
        let algorithm = codec::read_utf8_string(data, &mut offset)?;
        let key_blob = codec::read_string(data, &mut offset)?;
        Ok(Self { algorithm, key_blob })
    }

    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::UserauthPkOk as u8);
        codec::write_string(&mut buf, self.algorithm.as_bytes());
        codec::write_string(&mut buf, &self.key_blob);
        buf
    }
}

/// One prompt within a keyboard-interactive round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPrompt {
    /// Prompt text.
    pub text: String,
    /// Whether the user's input may be echoed.
    pub echo: bool,
}

/// A `USERAUTH_INFO_REQUEST` (keyboard-interactive round).
///
/// Shares message number 60 with `USERAUTH_PK_OK`; the active method
/// disambiguates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoRequest {
    /// Round title.
    pub name: String,
    /// Round instruction text.
    pub instruction: String,
    /// Prompts, possibly empty.
    pub prompts: Vec<FieldPrompt>,
}

impl InfoRequest {
    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 1;
        let name = codec::read_utf8_string(data, &mut offset)?;
        let instruction = codec::read_utf8_string(data, &mut offset)?;
        let _language = codec::read_string(data, &mut offset)?;
        let count = codec::read_u32(data, &mut offset)? as usize;
        // Each prompt is at least 5 bytes on the wire.
        if count > data.len() / 5 + 1 {
            return Err(ScribeError::Protocol(format!(
                "info request declares {} prompts in {} bytes",
                count,
                data.len()
            )));
        }
        let mut prompts = Vec::with_capacity(count);
        for _ in 0..count {
            let text = codec::read_utf8_string(data, &mut offset)?;
            let echo = codec::read_boolean(data, &mut offset)?;
            prompts.push(FieldPrompt { text, echo });
        }
        Ok(Self {
            name,
            instruction,
            prompts,
        })
    }

    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::UserauthPkOk as u8);
        codec::write_string(&mut buf, self.name.as_bytes());
        codec::write_string(&mut buf, self.instruction.as_bytes());
        codec::write_string(&mut buf, b"");
        codec::write_u32(&mut buf, self.prompts.len() as u32);
        for prompt in &self.prompts {
            codec::write_string(&mut buf, prompt.text.as_bytes());
            codec::write_boolean(&mut buf, prompt.echo);
        }
        buf
    }
}

/// A `USERAUTH_INFO_RESPONSE` with one answer per prompt.
#[derive(Clone)]
pub struct InfoResponse {
    /// Answers, in prompt order. Zeroed on drop.
    pub responses: Vec<String>,
}

impl InfoResponse {
    /// Serializes to a payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_u8(&mut buf, MessageType::UserauthInfoResponse as u8);
        codec::write_u32(&mut buf, self.responses.len() as u32);
        for response in &self.responses {
            codec::write_string(&mut buf, response.as_bytes());
        }
        buf
    }

    /// Parses a payload.
    pub fn from_bytes(data: &[u8]) -> ScribeResult<Self> {
        let mut offset = 1;
        let count = codec::read_u32(data, &mut offset)? as usize;
        if count > data.len() / 4 + 1 {
            return Err(ScribeError::Protocol(format!(
                "info response declares {} answers in {} bytes",
                count,
                data.len()
            )));
        }
        let mut responses = Vec::with_capacity(count);
        for _ in 0..count {
            responses.push(codec::read_utf8_string(data, &mut offset)?);
        }
        Ok(Self { responses })
    }
}

impl Drop for InfoResponse {
    fn drop(&mut self) {
        for response in &mut self.responses {
            response.zeroize();
        }
    }
}

impl std::fmt::Debug for InfoResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfoResponse")
            .field("responses", &format!("<{} redacted>", self.responses.len()))
            .finish()
    }
}

/// Builds the data a public key signature must cover: the session
/// identifier followed by the request fields up to and including the
/// key blob.
pub fn signature_data(
    session_id: &[u8],
    username: &str,
    algorithm: &str,
    key_blob: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::new();
    codec::write_string(&mut buf, session_id);
    codec::write_u8(&mut buf, MessageType::UserauthRequest as u8);
    codec::write_string(&mut buf, username.as_bytes());
    codec::write_string(&mut buf, CONNECTION_SERVICE.as_bytes());
    codec::write_string(&mut buf, b"publickey");
    codec::write_boolean(&mut buf, true);
    codec::write_string(&mut buf, algorithm.as_bytes());
    codec::write_string(&mut buf, key_blob);
    buf
}
