//! Inbound event dispatch.
//!
//! DESIGN
//! ======
//! Handlers are pure transformations of (event, cache) that return side
//! effects instead of performing them; the session loop delivers effects
//! after releasing the cache lock.
//!
//! The dispatcher is attached to at most one transport at a time. Attaching
//! to the same transport again is a no-op, and events tagged with any other
//! transport are dropped, so a listener can never fire twice for one event.

use tracing::debug;

use crate::cache::ConversationCache;
use crate::events::{PopupMessage, ServerEvent, UserStatus};
use crate::model::other_participant;
use crate::notify::Notification;
use crate::transport::TransportId;

const ELLIPSIS: &str = "...";

/// Side effect requested by a handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    Toast(Notification),
}

/// Outcome of [`EventDispatcher::attach`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attach {
    /// First attachment.
    Attached,
    /// Already attached to this transport; nothing changed.
    Unchanged,
    /// Detached from a previous transport and attached to the new one.
    Replaced(TransportId),
}

/// Per-dispatch view of UI state.
#[derive(Clone, Copy, Debug)]
pub struct DispatchContext<'a> {
    pub self_id: &'a str,
    /// The user is looking at the messaging screen.
    pub on_messaging_surface: bool,
    pub preview_limit: usize,
}

#[derive(Debug, Default)]
pub struct EventDispatcher {
    attached: Option<TransportId>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, transport: TransportId) -> Attach {
        match self.attached.replace(transport) {
            None => Attach::Attached,
            Some(prev) if prev == transport => Attach::Unchanged,
            Some(prev) => Attach::Replaced(prev),
        }
    }

    pub fn detach(&mut self) -> Option<TransportId> {
        self.attached.take()
    }

    #[must_use]
    pub fn attached(&self) -> Option<TransportId> {
        self.attached
    }

    /// Apply one event received on `source`.
    pub fn dispatch(
        &self,
        source: TransportId,
        event: &ServerEvent,
        cache: &mut ConversationCache,
        ctx: &DispatchContext<'_>,
    ) -> Vec<Effect> {
        if self.attached != Some(source) {
            debug!(%source, event = event.name(), "dropping event from detached transport");
            return Vec::new();
        }
        match event {
            ServerEvent::UserStatus(status) => {
                apply_user_status(status, cache);
                Vec::new()
            }
            ServerEvent::PopupMessage(popup) => apply_popup_message(popup, cache, ctx).into_iter().collect(),
        }
    }
}

fn apply_user_status(status: &UserStatus, cache: &mut ConversationCache) {
    if !cache.apply_presence(&status.conversation_id, &status.user) {
        debug!(conversation_id = %status.conversation_id, user_id = %status.user.id, "presence ignored");
    }
}

fn apply_popup_message(popup: &PopupMessage, cache: &mut ConversationCache, ctx: &DispatchContext<'_>) -> Option<Effect> {
    cache.push_message(&popup.conversation_id, popup.message.clone());

    if ctx.on_messaging_surface || popup.message.user == ctx.self_id {
        return None;
    }

    let participants = if popup.participants.is_empty() {
        cache
            .get(&popup.conversation_id)
            .map(|c| c.participants.as_slice())
            .unwrap_or_default()
    } else {
        popup.participants.as_slice()
    };
    let sender = other_participant(participants, ctx.self_id);

    Some(Effect::Toast(Notification {
        conversation_id: popup.conversation_id.clone(),
        title: sender.map_or_else(|| popup.message.user.clone(), |p| p.display_name().to_owned()),
        body: truncate_preview(&popup.message.content, ctx.preview_limit),
        avatar: sender.and_then(|p| p.avatar()).map(str::to_owned),
    }))
}

/// Cap `content` at `limit` characters, appending `...` when cut.
#[must_use]
pub fn truncate_preview(content: &str, limit: usize) -> String {
    match content.char_indices().nth(limit) {
        None => content.to_owned(),
        Some((cut, _)) => format!("{}{ELLIPSIS}", &content[..cut]),
    }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod dispatcher_test;
