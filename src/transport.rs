//! Websocket transport with request/acknowledgment correlation.
//!
//! ARCHITECTURE
//! ============
//! `connect` performs the handshake with the bearer credential and spawns one
//! I/O task that owns both socket halves:
//! - outbound frames from any `Transport` clone → binary websocket messages
//! - terminal inbound frames (`Done`, `Error`, `Cancel`) → the request they settle
//! - `Item` progress and broadcasts → the receiver returned by `connect`
//!
//! When the socket closes, the task drops every pending sender, so waiting
//! requests resolve with `SessionError::Closed`, and the broadcast receiver
//! yields `None`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use frames::{Frame, Status};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::error::SessionError;

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one live connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

impl TransportId {
    fn next() -> Self {
        Self(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport-{}", self.0)
    }
}

type PendingAcks = Arc<Mutex<HashMap<String, oneshot::Sender<Frame>>>>;

/// Cloneable handle to one websocket connection.
#[derive(Clone)]
pub struct Transport {
    id: TransportId,
    outbound: mpsc::UnboundedSender<Frame>,
    pending: PendingAcks,
    closed: Arc<Notify>,
    ack_timeout: Duration,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Open a websocket to `url`, authenticated with `credential`.
///
/// # Errors
///
/// [`SessionError::InvalidCredential`] if the token cannot be a header value,
/// [`SessionError::Connect`] if the handshake fails.
pub async fn connect(
    url: &str,
    credential: &Credential,
    ack_timeout: Duration,
) -> Result<(Transport, mpsc::UnboundedReceiver<Frame>), SessionError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| SessionError::Connect(Box::new(e)))?;
    let bearer = HeaderValue::from_str(&credential.bearer()).map_err(|_| SessionError::InvalidCredential)?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (stream, _) = connect_async(request)
        .await
        .map_err(|e| SessionError::Connect(Box::new(e)))?;

    let id = TransportId::next();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let pending = PendingAcks::default();
    let closed = Arc::new(Notify::new());

    tokio::spawn(run_io(id, stream, outbound_rx, inbound_tx, pending.clone(), closed.clone()));
    info!(%id, %url, "transport connected");

    let transport = Transport { id, outbound: outbound_tx, pending, closed, ack_timeout };
    Ok((transport, inbound_rx))
}

impl Transport {
    #[must_use]
    pub fn id(&self) -> TransportId {
        self.id
    }

    /// Write a frame without waiting for an acknowledgment.
    ///
    /// # Errors
    ///
    /// [`SessionError::Closed`] if the I/O task has exited.
    pub fn emit(&self, frame: Frame) -> Result<(), SessionError> {
        self.outbound.send(frame).map_err(|_| SessionError::Closed)
    }

    /// Write a request frame and wait for its acknowledgment.
    ///
    /// # Errors
    ///
    /// [`SessionError::Rejected`] for an error acknowledgment,
    /// [`SessionError::Timeout`] when none arrives in time,
    /// [`SessionError::Closed`] when the connection drops first.
    pub async fn request(&self, frame: Frame) -> Result<Frame, SessionError> {
        let request_id = frame.id.clone();
        let event = frame.event.clone();
        let (tx, rx) = oneshot::channel();
        self.pending_acks().insert(request_id.clone(), tx);

        if self.outbound.send(frame).is_err() {
            self.pending_acks().remove(&request_id);
            return Err(SessionError::Closed);
        }

        let reply = match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(SessionError::Closed),
            Err(_) => {
                self.pending_acks().remove(&request_id);
                warn!(id = %self.id, %event, "acknowledgment timed out");
                return Err(SessionError::Timeout { event });
            }
        };

        if reply.status == Status::Error {
            let message = reply.error_message().unwrap_or("unknown error").to_owned();
            return Err(SessionError::Rejected { event, message });
        }
        Ok(reply)
    }

    /// Close the connection. Pending requests fail with `Closed`.
    pub fn close(&self) {
        self.closed.notify_one();
    }

    fn pending_acks(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Frame>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type Stream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn run_io(
    id: TransportId,
    stream: Stream,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    inbound: mpsc::UnboundedSender<Frame>,
    pending: PendingAcks,
    closed: Arc<Notify>,
) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            () = closed.notified() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                debug!(%id, event = %frame.event, "send frame");
                if let Err(e) = write.send(Message::Binary(frames::encode_frame(&frame).into())).await {
                    warn!(%id, error = %e, "websocket send failed");
                    break;
                }
            }
            msg = read.next() => {
                let Some(msg) = msg else { break };
                match msg {
                    Ok(Message::Binary(bytes)) => match frames::decode_frame(&bytes) {
                        Ok(frame) => route_inbound(id, frame, &pending, &inbound),
                        Err(e) => warn!(%id, error = %e, "dropping undecodable frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%id, error = %e, "websocket recv failed");
                        break;
                    }
                }
            }
        }
    }

    // Dropping the senders wakes every waiting request with `Closed`.
    pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
    info!(%id, "transport disconnected");
}

fn route_inbound(id: TransportId, frame: Frame, pending: &PendingAcks, inbound: &mpsc::UnboundedSender<Frame>) {
    if let Some(parent_id) = frame.settles() {
        let waiter = pending.lock().unwrap_or_else(PoisonError::into_inner).remove(parent_id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(frame);
            }
            None => debug!(%id, event = %frame.event, "late acknowledgment dropped"),
        }
        return;
    }
    let _ = inbound.send(frame);
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;
