//! Authentication method negotiation.
//!
//! Drives the method ladder in fixed client preference order: the
//! probing "none" attempt first, then public key (one attempt per agent
//! identity), then keyboard-interactive, then password (bounded
//! retries). Only methods the server currently advertises are tried,
//! and a partial success narrows the remaining set without counting as
//! a failure of the ladder.
//!
//! Credential collection goes through [`CredentialPrompt`]; the
//! negotiator itself never reads terminals or files.

use crate::ssh::agent::SigningAgent;
use crate::ssh::auth::{
    signature_data, AuthBanner, AuthFailure, AuthPkOk, AuthRequest, FieldPrompt, InfoRequest,
    InfoResponse,
};
use crate::ssh::hostkey;
use crate::ssh::message::MessageType;
use crate::ssh::transport::Transport;
use async_trait::async_trait;
use scribe_platform::{ScribeError, ScribeResult};
use tracing::{debug, info, warn};

/// Default cap on interactive password attempts.
pub const DEFAULT_PASSWORD_ATTEMPTS: u32 = 3;

/// Collects credentials from the user.
///
/// Returning `None` from [`collect`](CredentialPrompt::collect) means
/// the user cancelled; the negotiator aborts authentication.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// Presents `prompts` under `title`/`instruction` and returns one
    /// answer per prompt, in order.
    async fn collect(
        &self,
        title: &str,
        instruction: &str,
        prompts: &[FieldPrompt],
    ) -> Option<Vec<String>>;

    /// Displays a server banner. Default: ignore.
    async fn banner(&self, _message: &str) {}
}

/// A prompt that always cancels, for non-interactive use.
#[derive(Debug, Default)]
pub struct NoPrompt;

#[async_trait]
impl CredentialPrompt for NoPrompt {
    async fn collect(
        &self,
        _title: &str,
        _instruction: &str,
        _prompts: &[FieldPrompt],
    ) -> Option<Vec<String>> {
        None
    }
}

/// Negotiation parameters.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Account name to authenticate as.
    pub username: String,
    /// Maximum interactive password attempts.
    pub password_attempts: u32,
}

impl AuthConfig {
    /// Configuration for `username` with default limits.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_attempts: DEFAULT_PASSWORD_ATTEMPTS,
        }
    }
}

/// Outcome of one authentication attempt.
enum Attempt {
    Success,
    Failure(AuthFailure),
    Cancelled,
    MethodExhausted,
}

/// Runs the authentication ladder over `transport`.
///
/// `host` names the peer for error reporting only. On success the
/// transport is left in the authenticated state.
pub async fn authenticate(
    transport: &mut Transport,
    host: &str,
    config: &AuthConfig,
    agent: &dyn SigningAgent,
    prompt: &dyn CredentialPrompt,
) -> ScribeResult<()> {
    let mut negotiator = Negotiator {
        transport,
        config,
        agent,
        prompt,
    };
    match negotiator.run().await {
        Ok(()) => {
            info!(user = %config.username, host, "authenticated");
            Ok(())
        }
        Err(ScribeError::Authentication { .. }) => Err(ScribeError::Authentication {
            user: config.username.clone(),
            host: host.to_string(),
            message: "all authentication methods exhausted".to_string(),
        }),
        Err(e) => Err(e),
    }
}

struct Negotiator<'a> {
    transport: &'a mut Transport,
    config: &'a AuthConfig,
    agent: &'a dyn SigningAgent,
    prompt: &'a dyn CredentialPrompt,
}

impl Negotiator<'_> {
    async fn run(&mut self) -> ScribeResult<()> {
        // Probe with "none": cheap, and the failure reply tells us what
        // the server accepts.
        let request = AuthRequest::None {
            username: self.config.username.clone(),
        };
        self.transport.send_payload(&request.to_bytes()).await?;

        let mut allowed = match self.await_simple_outcome().await? {
            Attempt::Success => return self.finish(),
            Attempt::Failure(failure) => failure.methods_can_continue,
            Attempt::Cancelled | Attempt::MethodExhausted => {
                return Err(self.exhausted());
            }
        };
        debug!(methods = ?allowed, "server methods after none probe");

        let mut publickey_done = false;
        let mut interactive_done = false;
        let mut password_attempts_left = self.config.password_attempts;

        loop {
            let method = if !publickey_done && allowed.iter().any(|m| m == "publickey") {
                "publickey"
            } else if !interactive_done && allowed.iter().any(|m| m == "keyboard-interactive") {
                "keyboard-interactive"
            } else if password_attempts_left > 0 && allowed.iter().any(|m| m == "password") {
                "password"
            } else {
                return Err(self.exhausted());
            };

            let outcome = match method {
                "publickey" => {
                    let outcome = self.try_public_keys().await?;
                    publickey_done = true;
                    outcome
                }
                "keyboard-interactive" => {
                    let outcome = self.try_keyboard_interactive().await?;
                    interactive_done = true;
                    outcome
                }
                _ => {
                    password_attempts_left -= 1;
                    self.try_password().await?
                }
            };

            match outcome {
                Attempt::Success => return self.finish(),
                Attempt::Failure(failure) => {
                    if failure.partial_success {
                        info!(method, "partial success, continuing");
                    }
                    allowed = failure.methods_can_continue;
                }
                Attempt::Cancelled => return Err(self.exhausted()),
                Attempt::MethodExhausted => {}
            }
        }
    }

    fn finish(&mut self) -> ScribeResult<()> {
        self.transport.mark_authenticated()
    }

    fn exhausted(&self) -> ScribeError {
        ScribeError::Authentication {
            user: self.config.username.clone(),
            host: String::new(),
            message: "all authentication methods exhausted".to_string(),
        }
    }

    /// Waits for SUCCESS or FAILURE, surfacing banners along the way.
    async fn await_simple_outcome(&mut self) -> ScribeResult<Attempt> {
        loop {
            let (msg_type, payload) = self.transport.recv_message().await?;
            match msg_type {
                MessageType::UserauthSuccess => return Ok(Attempt::Success),
                MessageType::UserauthFailure => {
                    return Ok(Attempt::Failure(AuthFailure::from_bytes(&payload)?));
                }
                MessageType::UserauthBanner => {
                    let banner = AuthBanner::from_bytes(&payload)?;
                    self.prompt.banner(&banner.message).await;
                }
                other => {
                    return Err(ScribeError::Protocol(format!(
                        "unexpected {} during authentication",
                        other
                    )));
                }
            }
        }
    }

    /// One attempt per agent identity: query first, sign only on PK_OK.
    async fn try_public_keys(&mut self) -> ScribeResult<Attempt> {
        let identities = match self.agent.list_identities().await {
            Ok(identities) => identities,
            Err(e) => {
                warn!(error = %e, "agent unavailable, skipping public key method");
                return Ok(Attempt::MethodExhausted);
            }
        };
        if identities.is_empty() {
            debug!("no agent identities");
            return Ok(Attempt::MethodExhausted);
        }

        let session_id = self
            .transport
            .session_id()
            .ok_or_else(|| ScribeError::Protocol("no session identifier".to_string()))?
            .to_vec();

        let mut last_failure = None;
        for identity in identities {
            let algorithm = match hostkey::algorithm_from_blob(&identity.key_blob) {
                Ok(algorithm) => algorithm.name().to_string(),
                Err(_) => {
                    debug!(comment = %identity.comment, "skipping key with unknown algorithm");
                    continue;
                }
            };

            let query = AuthRequest::PublicKey {
                username: self.config.username.clone(),
                algorithm: algorithm.clone(),
                key_blob: identity.key_blob.clone(),
                signature: None,
            };
            self.transport.send_payload(&query.to_bytes()).await?;

            // PK_OK means the key is acceptable; anything else advances
            // to the next identity.
            let accepted = loop {
                let (msg_type, payload) = self.transport.recv_message().await?;
                match msg_type {
                    MessageType::UserauthPkOk => {
                        let ok = AuthPkOk::from_bytes(&payload)?;
                        break ok.key_blob == identity.key_blob;
                    }
                    MessageType::UserauthFailure => {
                        last_failure = Some(AuthFailure::from_bytes(&payload)?);
                        break false;
                    }
                    MessageType::UserauthSuccess => return Ok(Attempt::Success),
                    MessageType::UserauthBanner => {
                        let banner = AuthBanner::from_bytes(&payload)?;
                        self.prompt.banner(&banner.message).await;
                    }
                    other => {
                        return Err(ScribeError::Protocol(format!(
                            "unexpected {} during public key query",
                            other
                        )));
                    }
                }
            };
            if !accepted {
                debug!(comment = %identity.comment, "key not accepted, trying next");
                continue;
            }

            let data = signature_data(
                &session_id,
                &self.config.username,
                &algorithm,
                &identity.key_blob,
            );
            let raw = self.agent.sign(&identity, &data).await?;

            let attempt = AuthRequest::PublicKey {
                username: self.config.username.clone(),
                algorithm,
                key_blob: identity.key_blob.clone(),
                signature: Some(raw),
            };
            self.transport.send_payload(&attempt.to_bytes()).await?;

            match self.await_simple_outcome().await? {
                Attempt::Success => return Ok(Attempt::Success),
                Attempt::Failure(failure) => {
                    debug!(comment = %identity.comment, "signed attempt rejected");
                    last_failure = Some(failure);
                }
                other => return Ok(other),
            }
        }

        Ok(match last_failure {
            Some(failure) => Attempt::Failure(failure),
            None => Attempt::MethodExhausted,
        })
    }

    /// Keyboard-interactive: relay every info-request round until a
    /// terminal outcome.
    async fn try_keyboard_interactive(&mut self) -> ScribeResult<Attempt> {
        let request = AuthRequest::KeyboardInteractive {
            username: self.config.username.clone(),
        };
        self.transport.send_payload(&request.to_bytes()).await?;

        loop {
            let (msg_type, payload) = self.transport.recv_message().await?;
            match msg_type {
                // Message 60 is INFO_REQUEST while this method is active.
                MessageType::UserauthPkOk => {
                    let info = InfoRequest::from_bytes(&payload)?;
                    let answers = self
                        .prompt
                        .collect(&info.name, &info.instruction, &info.prompts)
                        .await;
                    let Some(answers) = answers else {
                        info!("keyboard-interactive cancelled by user");
                        return Ok(Attempt::Cancelled);
                    };
                    if answers.len() != info.prompts.len() {
                        return Err(ScribeError::Protocol(format!(
                            "{} answers for {} prompts",
                            answers.len(),
                            info.prompts.len()
                        )));
                    }
                    let response = InfoResponse { responses: answers };
                    self.transport.send_payload(&response.to_bytes()).await?;
                }
                MessageType::UserauthSuccess => return Ok(Attempt::Success),
                MessageType::UserauthFailure => {
                    return Ok(Attempt::Failure(AuthFailure::from_bytes(&payload)?));
                }
                MessageType::UserauthBanner => {
                    let banner = AuthBanner::from_bytes(&payload)?;
                    self.prompt.banner(&banner.message).await;
                }
                other => {
                    return Err(ScribeError::Protocol(format!(
                        "unexpected {} during keyboard-interactive",
                        other
                    )));
                }
            }
        }
    }

    /// One password attempt; retry counting is the caller's.
    async fn try_password(&mut self) -> ScribeResult<Attempt> {
        let prompts = [FieldPrompt {
            text: format!("Password for {}: ", self.config.username),
            echo: false,
        }];
        let answers = self.prompt.collect("Password", "", &prompts).await;
        let Some(mut answers) = answers else {
            info!("password entry cancelled by user");
            return Ok(Attempt::Cancelled);
        };
        if answers.len() != 1 {
            return Err(ScribeError::Protocol(
                "password prompt returned wrong answer count".to_string(),
            ));
        }

        let request = AuthRequest::Password {
            username: self.config.username.clone(),
            password: answers.remove(0),
        };
        self.transport.send_payload(&request.to_bytes()).await?;
        self.await_simple_outcome().await
    }
}
