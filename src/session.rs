//! Messaging session: connection loop, conversation cache, and actions.
//!
//! ARCHITECTURE
//! ============
//! `SessionHandle::init` spawns one task that owns the connection state
//! machine and the event dispatcher. The handle shares the cache, the live
//! transport, and the UI flags with that task through `Shared`.
//!
//! LIFECYCLE
//! =========
//! 1. Dial with the bearer credential
//! 2. Announce presence (`USER_CONNECT`), fill the cache from the ack
//! 3. Rejoin known conversations (`JOIN_OLD_CONVERSATIIONS`)
//! 4. Pump broadcasts through the dispatcher until the socket drops
//! 5. Back off, redial; `teardown` stops the loop from any state
//!
//! Actions are request/ack pairs on the live transport followed by a
//! `GET /chat` refetch sequenced after the acknowledgment.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use frames::Frame;

use crate::api::ChatApi;
use crate::cache::ConversationCache;
use crate::config::SessionConfig;
use crate::connection::{Backoff, ConnectionEvent, ConnectionState};
use crate::credential::Credential;
use crate::dispatcher::{DispatchContext, Effect, EventDispatcher};
use crate::error::SessionError;
use crate::events::{
    self, INITIALIZE_CONVERSATION, InitializeConversation, JOIN_OLD_CONVERSATIONS, JoinOldConversations,
    MARK_MESSAGE_AS_SEEN, MarkMessageAsSeen, SEND_MESSAGE, SendMessage, ServerEvent, USER_CONNECT, UserConnect,
};
use crate::model::{Conversation, Message, MessageKind};
use crate::notify::Notifier;
use crate::transport::{self, Transport, TransportId};

/// Message the logged-in user wants to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub recipient_id: String,
    pub kind: MessageKind,
    pub content: String,
}

impl OutgoingMessage {
    pub fn text(conversation_id: impl Into<String>, recipient_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            recipient_id: recipient_id.into(),
            kind: MessageKind::Text,
            content: content.into(),
        }
    }
}

struct Shared {
    config: SessionConfig,
    user_id: String,
    credential: Credential,
    api: ChatApi,
    cache: RwLock<ConversationCache>,
    transport: RwLock<Option<Transport>>,
    on_messaging_surface: AtomicBool,
    state: watch::Sender<ConnectionState>,
    notifier: Arc<dyn Notifier>,
}

/// Owned messaging session for one authenticated user.
///
/// Dropping the handle stops the background task; `teardown` does the same
/// and waits for it to finish.
pub struct SessionHandle {
    shared: Arc<Shared>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Start a session for `user_id` and begin connecting in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn init(
        config: SessionConfig,
        credential: Credential,
        user_id: impl Into<String>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let api = ChatApi::new(reqwest::Client::new(), config.chat_list_url(), credential.clone());
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            config,
            user_id: user_id.into(),
            credential,
            api,
            cache: RwLock::new(ConversationCache::new()),
            transport: RwLock::new(None),
            on_messaging_surface: AtomicBool::new(false),
            state,
            notifier,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(shared.clone(), shutdown_rx));
        info!(user_id = %shared.user_id, "session started");

        Self { shared, shutdown: Some(shutdown_tx), task: Some(task) }
    }

    /// Stop the connection loop, detach listeners, and close the transport.
    pub async fn teardown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "session task failed");
        }
        info!(user_id = %self.shared.user_id, "session torn down");
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.shared.user_id
    }

    // =========================================================================
    // STATUS
    // =========================================================================

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the session is connected and announced.
    ///
    /// # Errors
    ///
    /// [`SessionError::Timeout`] if that takes longer than `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<TransportId, SessionError> {
        let mut rx = self.shared.state.subscribe();
        let connected = async {
            let state = rx
                .wait_for(ConnectionState::is_connected)
                .await
                .map_err(|_| SessionError::NotConnected)?;
            match *state {
                ConnectionState::Connected { transport } => Ok(transport),
                _ => Err(SessionError::NotConnected),
            }
        };
        tokio::time::timeout(timeout, connected)
            .await
            .map_err(|_| SessionError::Timeout { event: "connect".to_owned() })?
    }

    /// Tell the session whether the user is viewing the messaging screen.
    pub fn set_messaging_surface(&self, on_surface: bool) {
        self.shared.on_messaging_surface.store(on_surface, Ordering::Relaxed);
    }

    // =========================================================================
    // CACHE
    // =========================================================================

    /// Cached conversations, most recent activity first.
    pub async fn conversations(&self) -> Vec<Conversation> {
        self.shared.cache.read().await.list()
    }

    pub async fn conversation(&self, id: &str) -> Option<Conversation> {
        self.shared.cache.read().await.get(id).cloned()
    }

    /// Focus a cached conversation; unknown ids keep the current focus.
    pub async fn focus(&self, id: &str) -> bool {
        self.shared.cache.write().await.focus(id)
    }

    pub async fn clear_focus(&self) {
        self.shared.cache.write().await.clear_focus();
    }

    pub async fn focused(&self) -> Option<Conversation> {
        self.shared.cache.read().await.focused().cloned()
    }

    /// Replace the cache with a fresh `GET /chat` listing.
    ///
    /// Works without a live transport, so it also serves cold starts.
    pub async fn refresh(&self) -> Result<usize, SessionError> {
        self.shared.refresh().await
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    /// Create or look up the direct conversation with `recipient`.
    pub async fn initialize_conversation(&self, recipient: &str) -> Result<Conversation, SessionError> {
        let transport = self.live_transport().await?;
        let frame = events::request(
            INITIALIZE_CONVERSATION,
            &InitializeConversation { sender_id: self.shared.user_id.clone(), recipient: recipient.to_owned() },
        )?;
        let reply = transport.request(frame).await?;
        let conversation = events::acknowledged_conversation(&reply.data)?;

        info!(conversation_id = %conversation.id, %recipient, "conversation initialized");
        self.shared.cache.write().await.upsert(conversation.clone());
        Ok(conversation)
    }

    /// Send a message and refresh the list once the server acknowledges it.
    ///
    /// The acknowledged message is applied to the cache before the refetch.
    /// A failed refetch is logged; the send itself already succeeded.
    pub async fn send_message(&self, outgoing: OutgoingMessage) -> Result<Message, SessionError> {
        let transport = self.live_transport().await?;
        let OutgoingMessage { conversation_id, recipient_id, kind, content } = outgoing;
        let frame = events::request(
            SEND_MESSAGE,
            &SendMessage {
                sender_id: self.shared.user_id.clone(),
                recipient_id,
                kind,
                content: content.clone(),
                conversation_id: conversation_id.clone(),
            },
        )?
        .with_conversation_id(conversation_id.clone())
        .with_from(self.shared.user_id.clone());

        let reply = transport.request(frame).await?;
        let message = events::acknowledged_message(&reply.data).unwrap_or_else(|| Message {
            content,
            user: self.shared.user_id.clone(),
            seen: None,
            created_at: frames::now_ms(),
            kind,
        });
        self.shared.cache.write().await.push_message(&conversation_id, message.clone());

        if let Err(e) = self.shared.refresh().await {
            warn!(%conversation_id, error = %e, "refresh after send failed");
        }
        Ok(message)
    }

    /// Record that `sender_id` has seen the messages `recipient_id` sent in
    /// `conversation_id`.
    ///
    /// Unread counts change only through the refetch that follows the ack.
    pub async fn mark_as_seen(
        &self,
        conversation_id: &str,
        sender_id: &str,
        recipient_id: &str,
    ) -> Result<(), SessionError> {
        let transport = self.live_transport().await?;
        let frame = events::request(
            MARK_MESSAGE_AS_SEEN,
            &MarkMessageAsSeen {
                conversation_id: conversation_id.to_owned(),
                sender_id: sender_id.to_owned(),
                recipient_id: recipient_id.to_owned(),
                seen: frames::now_ms(),
            },
        )?
        .with_conversation_id(conversation_id);

        transport.request(frame).await?;
        self.shared.refresh().await?;
        Ok(())
    }

    async fn live_transport(&self) -> Result<Transport, SessionError> {
        self.shared.transport.read().await.clone().ok_or(SessionError::NotConnected)
    }
}

impl Shared {
    async fn refresh(&self) -> Result<usize, SessionError> {
        let list = self.api.fetch_conversations().await?;
        let count = list.len();
        self.cache.write().await.replace_all(list);
        Ok(count)
    }

    fn advance(&self, state: ConnectionState, event: ConnectionEvent, backoff: &mut Backoff) -> ConnectionState {
        let next = state.on(event, backoff);
        if next != state {
            debug!(from = %state, to = %next, "connection state");
            self.state.send_replace(next);
        }
        next
    }

    /// Announce presence, load the conversation list, and rejoin its rooms.
    async fn announce(&self, transport: &Transport) -> Result<(), SessionError> {
        let frame = events::request(USER_CONNECT, &UserConnect { user_id: self.user_id.clone() })?;
        let reply = transport.request(frame).await?;

        let list = match events::conversation_list(USER_CONNECT, &reply.data)? {
            Some(list) => list,
            None => self.api.fetch_conversations().await?,
        };
        self.cache.write().await.replace_all(list);

        let conversation_ids = self.cache.read().await.ids();
        if conversation_ids.is_empty() {
            return Ok(());
        }
        let count = conversation_ids.len();
        let frame = events::request(
            JOIN_OLD_CONVERSATIONS,
            &JoinOldConversations { user_id: self.user_id.clone(), conversation_ids },
        )?;
        transport.request(frame).await?;
        info!(id = %transport.id(), count, "rejoined conversations");
        Ok(())
    }

    async fn handle_frame(&self, dispatcher: &EventDispatcher, source: TransportId, frame: &Frame) {
        let event = match ServerEvent::from_frame(frame) {
            Ok(event) => event,
            Err(e) => {
                debug!(%source, event = %frame.event, error = %e, "dropping inbound frame");
                return;
            }
        };

        let effects = {
            let mut cache = self.cache.write().await;
            let ctx = DispatchContext {
                self_id: &self.user_id,
                on_messaging_surface: self.on_messaging_surface.load(Ordering::Relaxed),
                preview_limit: self.config.preview_limit,
            };
            dispatcher.dispatch(source, &event, &mut cache, &ctx)
        };

        for effect in effects {
            match effect {
                Effect::Toast(notification) => self.notifier.notify(notification),
            }
        }
    }
}

// =============================================================================
// CONNECTION LOOP
// =============================================================================

async fn run(shared: Arc<Shared>, mut shutdown: oneshot::Receiver<()>) {
    let mut backoff = Backoff::new(shared.config.backoff);
    let mut dispatcher = EventDispatcher::new();
    let mut state = shared.advance(ConnectionState::Disconnected, ConnectionEvent::Dial, &mut backoff);

    loop {
        let dial = transport::connect(&shared.config.socket_url, &shared.credential, shared.config.ack_timeout);
        let dialed = tokio::select! {
            result = dial => result,
            _ = &mut shutdown => break,
        };

        match dialed {
            Ok((transport, inbound)) => {
                let id = transport.id();
                dispatcher.attach(id);
                *shared.transport.write().await = Some(transport.clone());

                let announced = tokio::select! {
                    result = shared.announce(&transport) => Some(result),
                    _ = &mut shutdown => None,
                };
                let Some(announced) = announced else {
                    break;
                };
                if let Err(e) = announced {
                    warn!(%id, error = %e, "announce failed");
                }
                state = shared.advance(state, ConnectionEvent::Established(id), &mut backoff);

                let stopped = pump(&shared, &dispatcher, id, inbound, &mut shutdown).await;
                dispatcher.detach();
                shared.transport.write().await.take();
                transport.close();
                if stopped {
                    break;
                }
                warn!(%id, "connection lost");
                state = shared.advance(state, ConnectionEvent::Lost, &mut backoff);
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
                state = shared.advance(state, ConnectionEvent::Failed, &mut backoff);
            }
        }

        let delay = match state {
            ConnectionState::Backoff { delay, .. } => delay,
            _ => shared.config.backoff.initial,
        };
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = &mut shutdown => break,
        }
        state = shared.advance(state, ConnectionEvent::RetryElapsed, &mut backoff);
    }

    dispatcher.detach();
    if let Some(transport) = shared.transport.write().await.take() {
        transport.close();
    }
    shared.advance(state, ConnectionEvent::Shutdown, &mut backoff);
}

/// Feed broadcasts to the dispatcher. Returns `true` on shutdown, `false`
/// when the transport closed.
async fn pump(
    shared: &Shared,
    dispatcher: &EventDispatcher,
    source: TransportId,
    mut inbound: tokio::sync::mpsc::UnboundedReceiver<Frame>,
    shutdown: &mut oneshot::Receiver<()>,
) -> bool {
    loop {
        tokio::select! {
            frame = inbound.recv() => {
                let Some(frame) = frame else { return false };
                shared.handle_frame(dispatcher, source, &frame).await;
            }
            _ = &mut *shutdown => return true,
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
