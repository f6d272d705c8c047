//! Channel multiplexer: one dispatcher task per connection routes
//! inbound channel messages to the owning channel by local id.
//!
//! The dispatcher owns the transport's read half; channel handles share
//! the write half behind a lock. Events cross to channels as typed
//! [`ChannelEvent`] values over per-channel queues. A channel is
//! notified of close exactly once: the dispatcher drops its route when
//! `CHANNEL_CLOSE` arrives or the connection dies.

use crate::ssh::channel::{Channel, DEFAULT_MAX_PACKET, DEFAULT_WINDOW};
use crate::ssh::connection::{
    reply_payload, ChannelData, ChannelExtendedData, ChannelId, ChannelOpen,
    ChannelOpenConfirmation, ChannelOpenFailure, ChannelRequest, ChannelRequestKind,
    ChannelWindowAdjust,
};
use crate::ssh::message::MessageType;
use crate::ssh::transport::{Transport, TransportReader, TransportWriter};
use scribe_platform::{ScribeError, ScribeResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// An event delivered to a channel by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The peer confirmed the open.
    Opened {
        /// Peer's channel number.
        remote_id: u32,
        /// Window the peer granted us.
        initial_window: u32,
        /// Largest packet the peer accepts.
        max_packet_size: u32,
    },
    /// The peer refused the open.
    OpenFailed {
        /// Reason code.
        reason: u32,
        /// Human-readable description.
        description: String,
    },
    /// Main data stream bytes.
    Data(Vec<u8>),
    /// Extended data stream bytes (stderr is type 1).
    ExtendedData {
        /// Stream code.
        data_type: u32,
        /// Bytes.
        data: Vec<u8>,
    },
    /// The peer will send no more data.
    Eof,
    /// The channel is closed. Delivered exactly once, last.
    Closed,
    /// A want-reply request succeeded.
    RequestSuccess,
    /// A want-reply request failed.
    RequestFailure,
    /// The peer enlarged our send window.
    WindowAdjust(u32),
    /// The remote process exited.
    ExitStatus(u32),
}

type Routes = Arc<StdMutex<HashMap<u32, mpsc::UnboundedSender<ChannelEvent>>>>;

/// Shared handle to one connection's channel layer.
#[derive(Clone)]
pub struct Multiplexer {
    writer: Arc<Mutex<TransportWriter>>,
    routes: Routes,
    next_id: Arc<AtomicU32>,
}

impl Multiplexer {
    /// Takes over an authenticated transport and starts the dispatcher.
    pub fn start(transport: Transport) -> ScribeResult<Self> {
        let (reader, writer, _session_id) = transport.split()?;
        let writer = Arc::new(Mutex::new(writer));
        let routes: Routes = Arc::new(StdMutex::new(HashMap::new()));

        tokio::spawn(dispatch(reader, writer.clone(), routes.clone()));

        Ok(Self {
            writer,
            routes,
            next_id: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Opens a channel of `channel_type` and waits for the peer's
    /// verdict.
    pub async fn open_channel(&self, channel_type: &str) -> ScribeResult<Channel> {
        let local_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, mut events) = mpsc::unbounded_channel();
        self.routes
            .lock()
            .map_err(|_| ScribeError::Protocol("channel route table poisoned".to_string()))?
            .insert(local_id, sender);

        let open = ChannelOpen {
            channel_type: channel_type.to_string(),
            sender_channel: local_id,
            initial_window: DEFAULT_WINDOW,
            max_packet_size: DEFAULT_MAX_PACKET,
        };
        self.writer.lock().await.send_payload(&open.to_bytes()).await?;

        match events.recv().await {
            Some(ChannelEvent::Opened {
                remote_id,
                initial_window,
                max_packet_size,
            }) => {
                debug!(local_id, remote_id, channel_type, "channel opened");
                Ok(Channel::new(
                    local_id,
                    remote_id,
                    self.writer.clone(),
                    events,
                    initial_window,
                    max_packet_size,
                ))
            }
            Some(ChannelEvent::OpenFailed {
                reason,
                description,
            }) => {
                self.drop_route(local_id);
                Err(ScribeError::ChannelOpen {
                    reason,
                    message: description,
                })
            }
            Some(other) => {
                self.drop_route(local_id);
                Err(ScribeError::Protocol(format!(
                    "unexpected event before open verdict: {:?}",
                    other
                )))
            }
            None => {
                self.drop_route(local_id);
                Err(ScribeError::Protocol(
                    "connection lost while opening channel".to_string(),
                ))
            }
        }
    }

    /// Sends a DISCONNECT and stops the connection.
    pub async fn disconnect(&self, description: &str) -> ScribeResult<()> {
        self.writer.lock().await.send_disconnect(description).await
    }

    fn drop_route(&self, local_id: u32) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.remove(&local_id);
        }
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.routes.lock().map(|r| r.len()).unwrap_or(0);
        f.debug_struct("Multiplexer")
            .field("channels", &channels)
            .finish()
    }
}

/// Reads the connection until it dies, routing channel traffic.
async fn dispatch(
    mut reader: TransportReader,
    writer: Arc<Mutex<TransportWriter>>,
    routes: Routes,
) {
    loop {
        let (msg_type, payload) = match reader.recv_message().await {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "dispatcher stopping");
                break;
            }
        };

        let result = route_message(msg_type, &payload, &writer, &routes).await;
        if let Err(e) = result {
            warn!(error = %e, "dispatcher stopping on protocol error");
            let _ = writer.lock().await.send_disconnect("protocol error").await;
            break;
        }
    }

    // Connection is gone; close every remaining channel exactly once.
    let senders: Vec<_> = match routes.lock() {
        Ok(mut routes) => routes.drain().map(|(_, sender)| sender).collect(),
        Err(_) => Vec::new(),
    };
    for sender in senders {
        let _ = sender.send(ChannelEvent::Closed);
    }
}

async fn route_message(
    msg_type: MessageType,
    payload: &[u8],
    writer: &Arc<Mutex<TransportWriter>>,
    routes: &Routes,
) -> ScribeResult<()> {
    let deliver = |id: u32, event: ChannelEvent| -> ScribeResult<()> {
        let routes = routes
            .lock()
            .map_err(|_| ScribeError::Protocol("channel route table poisoned".to_string()))?;
        match routes.get(&id) {
            Some(sender) => {
                let _ = sender.send(event);
                Ok(())
            }
            None => Err(ScribeError::Protocol(format!(
                "message for unknown channel {}",
                id
            ))),
        }
    };

    match msg_type {
        MessageType::ChannelOpenConfirmation => {
            let confirm = ChannelOpenConfirmation::from_bytes(payload)?;
            deliver(
                confirm.recipient_channel,
                ChannelEvent::Opened {
                    remote_id: confirm.sender_channel,
                    initial_window: confirm.initial_window,
                    max_packet_size: confirm.max_packet_size,
                },
            )
        }
        MessageType::ChannelOpenFailure => {
            let failure = ChannelOpenFailure::from_bytes(payload)?;
            let id = failure.recipient_channel;
            deliver(
                id,
                ChannelEvent::OpenFailed {
                    reason: failure.reason,
                    description: failure.description,
                },
            )?;
            if let Ok(mut routes) = routes.lock() {
                routes.remove(&id);
            }
            Ok(())
        }
        MessageType::ChannelData => {
            let data = ChannelData::from_bytes(payload)?;
            deliver(data.recipient_channel, ChannelEvent::Data(data.data))
        }
        MessageType::ChannelExtendedData => {
            let data = ChannelExtendedData::from_bytes(payload)?;
            deliver(
                data.recipient_channel,
                ChannelEvent::ExtendedData {
                    data_type: data.data_type,
                    data: data.data,
                },
            )
        }
        MessageType::ChannelWindowAdjust => {
            let adjust = ChannelWindowAdjust::from_bytes(payload)?;
            deliver(
                adjust.recipient_channel,
                ChannelEvent::WindowAdjust(adjust.additional_bytes),
            )
        }
        MessageType::ChannelEof => {
            let id = ChannelId::from_bytes(payload)?;
            deliver(id.recipient_channel, ChannelEvent::Eof)
        }
        MessageType::ChannelClose => {
            let id = ChannelId::from_bytes(payload)?;
            deliver(id.recipient_channel, ChannelEvent::Closed)?;
            // Route removed so close is delivered exactly once.
            if let Ok(mut routes) = routes.lock() {
                routes.remove(&id.recipient_channel);
            }
            Ok(())
        }
        MessageType::ChannelSuccess => {
            let id = ChannelId::from_bytes(payload)?;
            deliver(id.recipient_channel, ChannelEvent::RequestSuccess)
        }
        MessageType::ChannelFailure => {
            let id = ChannelId::from_bytes(payload)?;
            deliver(id.recipient_channel, ChannelEvent::RequestFailure)
        }
        MessageType::ChannelRequest => {
            let request = ChannelRequest::from_bytes(payload)?;
            match request.kind {
                ChannelRequestKind::ExitStatus { status } => {
                    deliver(request.recipient_channel, ChannelEvent::ExitStatus(status))
                }
                other => {
                    debug!(?other, "refusing unsolicited channel request");
                    if request.want_reply {
                        // Remote channel id is what the peer knows us by;
                        // we only track our own, so reply on the
                        // recipient id we were addressed with.
                        let reply = reply_payload(
                            MessageType::ChannelFailure,
                            request.recipient_channel,
                        );
                        writer.lock().await.send_payload(&reply).await?;
                    }
                    Ok(())
                }
            }
        }
        MessageType::GlobalRequest => {
            // Nothing global is supported; refuse politely when asked.
            let mut offset = 1;
            let name = crate::ssh::codec::read_utf8_string(payload, &mut offset)?;
            let want_reply = crate::ssh::codec::read_boolean(payload, &mut offset)?;
            debug!(request = %name, "refusing global request");
            if want_reply {
                writer
                    .lock()
                    .await
                    .send_payload(&[MessageType::RequestFailure as u8])
                    .await?;
            }
            Ok(())
        }
        MessageType::RequestSuccess | MessageType::RequestFailure => {
            // No global requests are ever sent, so replies are noise.
            Ok(())
        }
        other => Err(ScribeError::Protocol(format!(
            "{} not valid on an authenticated connection",
            other
        ))),
    }
}
