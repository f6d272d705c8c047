//! Interactive session channel: pty, shell, exec, subsystem.
//!
//! Wraps a [`Channel`] with the "session" request vocabulary. Requests
//! the session cannot proceed without (pty, shell, exec, subsystem) are
//! sent want-reply; a refusal closes the channel and surfaces an error.

use crate::ssh::channel::Channel;
use crate::ssh::connection::{ChannelRequestKind, EXTENDED_DATA_STDERR};
use crate::ssh::mux::ChannelEvent;
use scribe_platform::{ScribeError, ScribeResult};
use tracing::debug;

/// What an interactive session can observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Bytes from the remote stdout.
    Stdout(Vec<u8>),
    /// Bytes from the remote stderr.
    Stderr(Vec<u8>),
    /// The remote side will send no more output.
    Eof,
    /// The remote process exited.
    ExitStatus(u32),
    /// The channel is gone.
    Closed,
}

/// A channel speaking the "session" vocabulary.
#[derive(Debug)]
pub struct SessionChannel {
    channel: Channel,
}

impl SessionChannel {
    /// Wraps an open session-type channel.
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Sends a request the session cannot proceed without; refusal
    /// closes the channel.
    async fn required_request(
        &mut self,
        what: &str,
        kind: ChannelRequestKind,
    ) -> ScribeResult<()> {
        if self.channel.request(kind, true).await? {
            debug!(request = what, "session request granted");
            return Ok(());
        }
        let _ = self.channel.close().await;
        Err(ScribeError::Protocol(format!(
            "server refused {} request",
            what
        )))
    }

    /// Requests a pseudo-terminal.
    pub async fn request_pty(&mut self, term: &str, columns: u32, rows: u32) -> ScribeResult<()> {
        self.required_request(
            "pty-req",
            ChannelRequestKind::PtyReq {
                term: term.to_string(),
                columns,
                rows,
            },
        )
        .await
    }

    /// Sets an environment variable. Best effort; servers commonly
    /// ignore or refuse these, so no reply is requested.
    pub async fn set_env(&mut self, name: &str, value: &str) -> ScribeResult<()> {
        self.channel
            .request(
                ChannelRequestKind::Env {
                    name: name.to_string(),
                    value: value.to_string(),
                },
                false,
            )
            .await?;
        Ok(())
    }

    /// Starts the user's shell.
    pub async fn shell(&mut self) -> ScribeResult<()> {
        self.required_request("shell", ChannelRequestKind::Shell).await
    }

    /// Runs one command.
    pub async fn exec(&mut self, command: &str) -> ScribeResult<()> {
        self.required_request(
            "exec",
            ChannelRequestKind::Exec {
                command: command.to_string(),
            },
        )
        .await
    }

    /// Starts a named subsystem.
    pub async fn subsystem(&mut self, name: &str) -> ScribeResult<()> {
        self.required_request(
            "subsystem",
            ChannelRequestKind::Subsystem {
                name: name.to_string(),
            },
        )
        .await
    }

    /// Writes to the remote stdin.
    pub async fn write(&mut self, data: &[u8]) -> ScribeResult<()> {
        self.channel.send_data(data).await
    }

    /// Announces end of input.
    pub async fn send_eof(&mut self) -> ScribeResult<()> {
        self.channel.send_eof().await
    }

    /// Returns the next session event, or `None` once closed and
    /// drained.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            match self.channel.next_event().await? {
                ChannelEvent::Data(data) => return Some(SessionEvent::Stdout(data)),
                ChannelEvent::ExtendedData { data_type, data } => {
                    if data_type == EXTENDED_DATA_STDERR {
                        return Some(SessionEvent::Stderr(data));
                    }
                    debug!(data_type, "discarding unknown extended data stream");
                }
                ChannelEvent::Eof => return Some(SessionEvent::Eof),
                ChannelEvent::ExitStatus(status) => {
                    return Some(SessionEvent::ExitStatus(status))
                }
                ChannelEvent::Closed => return Some(SessionEvent::Closed),
                other => {
                    debug!(?other, "discarding event outside session vocabulary");
                }
            }
        }
    }

    /// Closes the session channel.
    pub async fn close(&mut self) -> ScribeResult<()> {
        self.channel.close().await
    }

    /// Returns the underlying channel.
    pub fn into_channel(self) -> Channel {
        self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::connection::ChannelRequest;
    use crate::ssh::message::MessageType;
    use crate::ssh::transport::{State, Transport};
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex};

    async fn harness() -> (
        SessionChannel,
        mpsc::UnboundedSender<ChannelEvent>,
        Transport,
    ) {
        let (client, server) = Transport::test_pair(State::Authenticated).await;
        let (_reader, writer, _) = client.split().unwrap();
        let (sender, events) = mpsc::unbounded_channel();
        let channel = Channel::new(0, 7, Arc::new(Mutex::new(writer)), events, 131072, 32768);
        (SessionChannel::new(channel), sender, server)
    }

    async fn recv_request(server: &mut Transport) -> ChannelRequest {
        let payload = server.recv_payload().await.unwrap();
        assert_eq!(payload[0], MessageType::ChannelRequest as u8);
        ChannelRequest::from_bytes(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_exec_sends_request_and_awaits_grant() {
        let (mut session, sender, mut server) = harness().await;
        sender.send(ChannelEvent::RequestSuccess).unwrap();

        session.exec("ls -l").await.unwrap();

        let request = recv_request(&mut server).await;
        assert!(request.want_reply);
        assert_eq!(
            request.kind,
            ChannelRequestKind::Exec {
                command: "ls -l".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_refused_required_request_closes_channel() {
        let (mut session, sender, mut server) = harness().await;
        sender.send(ChannelEvent::RequestFailure).unwrap();
        sender.send(ChannelEvent::Closed).unwrap();

        let result = session.shell().await;
        assert!(result.is_err());

        // shell request, then close.
        let request = recv_request(&mut server).await;
        assert_eq!(request.kind, ChannelRequestKind::Shell);
        let payload = server.recv_payload().await.unwrap();
        assert_eq!(payload[0], MessageType::ChannelClose as u8);
    }

    #[tokio::test]
    async fn test_env_does_not_wait_for_reply() {
        let (mut session, _sender, mut server) = harness().await;
        session.set_env("LANG", "C.UTF-8").await.unwrap();

        let request = recv_request(&mut server).await;
        assert!(!request.want_reply);
        assert_eq!(
            request.kind,
            ChannelRequestKind::Env {
                name: "LANG".to_string(),
                value: "C.UTF-8".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_stdout_stderr_and_exit_status_mapping() {
        let (mut session, sender, _server) = harness().await;
        sender.send(ChannelEvent::Data(b"out".to_vec())).unwrap();
        sender
            .send(ChannelEvent::ExtendedData {
                data_type: EXTENDED_DATA_STDERR,
                data: b"err".to_vec(),
            })
            .unwrap();
        sender.send(ChannelEvent::ExitStatus(42)).unwrap();
        sender.send(ChannelEvent::Eof).unwrap();
        sender.send(ChannelEvent::Closed).unwrap();

        assert_eq!(
            session.next_event().await.unwrap(),
            SessionEvent::Stdout(b"out".to_vec())
        );
        assert_eq!(
            session.next_event().await.unwrap(),
            SessionEvent::Stderr(b"err".to_vec())
        );
        assert_eq!(
            session.next_event().await.unwrap(),
            SessionEvent::ExitStatus(42)
        );
        assert_eq!(session.next_event().await.unwrap(), SessionEvent::Eof);
        assert_eq!(session.next_event().await.unwrap(), SessionEvent::Closed);
        drop(sender);
        assert!(session.next_event().await.is_none());
    }
}
