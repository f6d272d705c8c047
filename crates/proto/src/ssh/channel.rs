//! A single multiplexed channel: flow control, data transfer, and
//! channel requests.
//!
//! Outbound data is chunked to the peer's maximum packet size and sent
//! only while the peer's window has room; the remainder queues and is
//! flushed when a window adjustment arrives. Inbound data consumes the
//! local window, which is replenished with an adjustment once it falls
//! more than two maximum packets below its high-water mark.

use crate::ssh::connection::{
    reply_payload, ChannelData, ChannelId, ChannelRequest, ChannelRequestKind,
    ChannelWindowAdjust,
};
use crate::ssh::message::MessageType;
use crate::ssh::mux::ChannelEvent;
use crate::ssh::transport::TransportWriter;
use scribe_platform::{ScribeError, ScribeResult};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Initial and high-water receive window granted to the peer.
pub const DEFAULT_WINDOW: u32 = 131072;
/// Largest packet accepted from the peer.
pub const DEFAULT_MAX_PACKET: u32 = 32768;

/// Channel lifecycle: Opening -> Open -> Closing -> Closed.
///
/// The Opening phase has no variant here: it is the await inside
/// [`Multiplexer::open_channel`](crate::ssh::mux::Multiplexer::open_channel),
/// which only constructs a `Channel` once the peer has confirmed, so
/// every live handle starts at `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Open confirmed, data may flow.
    Open,
    /// Close sent, waiting for the peer's close.
    Closing,
    /// Fully closed.
    Closed,
}

/// One open channel on a connection.
pub struct Channel {
    local_id: u32,
    remote_id: u32,
    writer: Arc<Mutex<TransportWriter>>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    /// Events deferred while waiting for a request verdict.
    inbox: VecDeque<ChannelEvent>,
    state: ChannelState,

    local_window: u32,
    local_window_max: u32,
    local_max_packet: u32,
    remote_window: u32,
    remote_max_packet: u32,
    /// Outbound bytes waiting for window room.
    pending: VecDeque<Vec<u8>>,
    eof_sent: bool,
}

impl Channel {
    pub(crate) fn new(
        local_id: u32,
        remote_id: u32,
        writer: Arc<Mutex<TransportWriter>>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        remote_window: u32,
        remote_max_packet: u32,
    ) -> Self {
        Self {
            local_id,
            remote_id,
            writer,
            events,
            inbox: VecDeque::new(),
            state: ChannelState::Open,
            local_window: DEFAULT_WINDOW,
            local_window_max: DEFAULT_WINDOW,
            local_max_packet: DEFAULT_MAX_PACKET,
            remote_window,
            remote_max_packet,
            pending: VecDeque::new(),
            eof_sent: false,
        }
    }

    /// Our channel number.
    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    /// The peer's channel number.
    pub fn remote_id(&self) -> u32 {
        self.remote_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Sends data, chunked to the peer's maximum packet size.
    ///
    /// Bytes beyond the peer's current window queue locally and are
    /// flushed when the peer widens the window.
    pub async fn send_data(&mut self, data: &[u8]) -> ScribeResult<()> {
        if self.state != ChannelState::Open {
            return Err(ScribeError::Protocol(
                "cannot send on a closing channel".to_string(),
            ));
        }
        if self.eof_sent {
            return Err(ScribeError::Protocol(
                "cannot send after EOF".to_string(),
            ));
        }

        let mut remaining = data;
        while !remaining.is_empty() {
            let room = (self.remote_window as usize).min(self.remote_max_packet as usize);
            if room == 0 {
                self.pending.push_back(remaining.to_vec());
                debug!(
                    channel = self.local_id,
                    queued = remaining.len(),
                    "peer window exhausted, queueing"
                );
                return Ok(());
            }
            let take = room.min(remaining.len());
            let (chunk, rest) = remaining.split_at(take);
            let message = ChannelData {
                recipient_channel: self.remote_id,
                data: chunk.to_vec(),
            };
            self.writer
                .lock()
                .await
                .send_payload(&message.to_bytes())
                .await?;
            self.remote_window -= take as u32;
            remaining = rest;
        }
        Ok(())
    }

    /// Flushes queued data into newly granted window room.
    async fn flush_pending(&mut self) -> ScribeResult<()> {
        while let Some(buffered) = self.pending.pop_front() {
            let mut remaining = &buffered[..];
            while !remaining.is_empty() {
                let room = (self.remote_window as usize).min(self.remote_max_packet as usize);
                if room == 0 {
                    self.pending.push_front(remaining.to_vec());
                    return Ok(());
                }
                let take = room.min(remaining.len());
                let (chunk, rest) = remaining.split_at(take);
                let message = ChannelData {
                    recipient_channel: self.remote_id,
                    data: chunk.to_vec(),
                };
                self.writer
                    .lock()
                    .await
                    .send_payload(&message.to_bytes())
                    .await?;
                self.remote_window -= take as u32;
                remaining = rest;
            }
        }
        Ok(())
    }

    /// Returns the next event for this channel, or `None` once closed
    /// and drained.
    ///
    /// Window adjustments are absorbed here: they enlarge the send
    /// window and flush queued data rather than surfacing.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            let event = match self.inbox.pop_front() {
                Some(event) => event,
                None => self.events.recv().await?,
            };
            match event {
                ChannelEvent::WindowAdjust(additional) => {
                    self.remote_window = self.remote_window.saturating_add(additional);
                    if let Err(e) = self.flush_pending().await {
                        warn!(channel = self.local_id, error = %e, "flush failed");
                    }
                }
                ChannelEvent::Data(data) => {
                    self.consume_local_window(data.len()).await;
                    return Some(ChannelEvent::Data(data));
                }
                ChannelEvent::ExtendedData { data_type, data } => {
                    self.consume_local_window(data.len()).await;
                    return Some(ChannelEvent::ExtendedData { data_type, data });
                }
                ChannelEvent::Closed => {
                    // A peer-initiated close must be reciprocated; when
                    // state is Closing our close is already on the wire.
                    if self.state == ChannelState::Open {
                        let close = reply_payload(MessageType::ChannelClose, self.remote_id);
                        if let Err(e) = self.writer.lock().await.send_payload(&close).await {
                            warn!(channel = self.local_id, error = %e, "close reply failed");
                        }
                    }
                    self.state = ChannelState::Closed;
                    return Some(ChannelEvent::Closed);
                }
                other => return Some(other),
            }
        }
    }

    /// Accounts received bytes against the local window, replenishing
    /// it once it falls two maximum packets below the high-water mark.
    async fn consume_local_window(&mut self, len: usize) {
        self.local_window = self.local_window.saturating_sub(len as u32);
        let threshold = self
            .local_window_max
            .saturating_sub(2 * self.local_max_packet);
        if self.local_window < threshold {
            let additional = self.local_window_max - self.local_window;
            let adjust = ChannelWindowAdjust {
                recipient_channel: self.remote_id,
                additional_bytes: additional,
            };
            match self
                .writer
                .lock()
                .await
                .send_payload(&adjust.to_bytes())
                .await
            {
                Ok(()) => self.local_window = self.local_window_max,
                Err(e) => warn!(channel = self.local_id, error = %e, "window adjust failed"),
            }
        }
    }

    /// Sends a channel request and, when `want_reply`, waits for the
    /// verdict. Data events arriving meanwhile are deferred, not lost.
    pub async fn request(&mut self, kind: ChannelRequestKind, want_reply: bool) -> ScribeResult<bool> {
        let request = ChannelRequest {
            recipient_channel: self.remote_id,
            want_reply,
            kind,
        };
        self.writer
            .lock()
            .await
            .send_payload(&request.to_bytes())
            .await?;
        if !want_reply {
            return Ok(true);
        }

        let mut deferred = VecDeque::new();
        let verdict = loop {
            let event = match self.inbox.pop_front() {
                Some(event) => Some(event),
                None => self.events.recv().await,
            };
            match event {
                Some(ChannelEvent::RequestSuccess) => break Ok(true),
                Some(ChannelEvent::RequestFailure) => break Ok(false),
                Some(ChannelEvent::Closed) => {
                    deferred.push_back(ChannelEvent::Closed);
                    break Err(ScribeError::Protocol(
                        "channel closed awaiting request verdict".to_string(),
                    ));
                }
                Some(other) => deferred.push_back(other),
                None => {
                    break Err(ScribeError::Protocol(
                        "connection lost awaiting request verdict".to_string(),
                    ))
                }
            }
        };
        // Preserve arrival order ahead of anything already deferred.
        while let Some(event) = deferred.pop_back() {
            self.inbox.push_front(event);
        }
        verdict
    }

    /// Announces that no more data will be sent.
    pub async fn send_eof(&mut self) -> ScribeResult<()> {
        if self.eof_sent {
            return Ok(());
        }
        let eof = ChannelId {
            recipient_channel: self.remote_id,
        };
        self.writer
            .lock()
            .await
            .send_payload(&eof.to_bytes(MessageType::ChannelEof))
            .await?;
        self.eof_sent = true;
        Ok(())
    }

    /// Closes the channel and waits for the peer's close.
    pub async fn close(&mut self) -> ScribeResult<()> {
        if self.state == ChannelState::Closed {
            return Ok(());
        }
        if self.state == ChannelState::Open {
            let close = reply_payload(MessageType::ChannelClose, self.remote_id);
            self.writer.lock().await.send_payload(&close).await?;
            self.state = ChannelState::Closing;
        }
        while let Some(event) = self.next_event().await {
            if event == ChannelEvent::Closed {
                break;
            }
            debug!(channel = self.local_id, ?event, "discarding event during close");
        }
        self.state = ChannelState::Closed;
        Ok(())
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("local_id", &self.local_id)
            .field("remote_id", &self.remote_id)
            .field("state", &self.state)
            .field("local_window", &self.local_window)
            .field("remote_window", &self.remote_window)
            .finish()
    }
}
