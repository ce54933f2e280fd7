//! In-memory conversation cache and focused-conversation selector.
//!
//! The cache is keyed by server id, so there is exactly one entry per
//! conversation. It is replaced wholesale by full-list refetches and patched
//! in place by the event dispatcher; whichever write lands last wins.

use std::collections::HashMap;

use crate::model::{Conversation, Message, UserProfile};

#[derive(Debug, Default)]
pub struct ConversationCache {
    conversations: HashMap<String, Conversation>,
    focused: Option<String>,
}

impl ConversationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    /// Conversation ids in no particular order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.conversations.keys().cloned().collect()
    }

    /// Snapshot ordered by most recent activity first.
    #[must_use]
    pub fn list(&self) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self.conversations.values().cloned().collect();
        list.sort_by(|a, b| {
            let a_time = a.last_message_time().unwrap_or(a.created_at);
            let b_time = b.last_message_time().unwrap_or(b.created_at);
            b_time.cmp(&a_time).then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    /// Replace every entry with a freshly fetched list.
    ///
    /// Focus survives only if the focused id is still present.
    pub fn replace_all(&mut self, list: Vec<Conversation>) {
        self.conversations = list.into_iter().map(|c| (c.id.clone(), c)).collect();
        if let Some(focused) = &self.focused
            && !self.conversations.contains_key(focused)
        {
            self.focused = None;
        }
    }

    pub fn upsert(&mut self, conversation: Conversation) {
        self.conversations.insert(conversation.id.clone(), conversation);
    }

    /// Append a message to a cached conversation.
    ///
    /// Returns `false` if the conversation is unknown or already has the message.
    pub fn push_message(&mut self, conversation_id: &str, message: Message) -> bool {
        self.conversations
            .get_mut(conversation_id)
            .is_some_and(|c| c.push_message(message))
    }

    // =========================================================================
    // FOCUS
    // =========================================================================

    /// Focus a cached conversation. Unknown ids leave the prior focus unchanged.
    pub fn focus(&mut self, id: &str) -> bool {
        if !self.conversations.contains_key(id) {
            return false;
        }
        self.focused = Some(id.to_owned());
        true
    }

    pub fn clear_focus(&mut self) {
        self.focused = None;
    }

    #[must_use]
    pub fn focused_id(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    #[must_use]
    pub fn focused(&self) -> Option<&Conversation> {
        self.focused.as_deref().and_then(|id| self.conversations.get(id))
    }

    /// Apply a presence update, scoped to the focused conversation only.
    ///
    /// Returns `true` if a participant was replaced.
    pub fn apply_presence(&mut self, conversation_id: &str, user: &UserProfile) -> bool {
        if self.focused.as_deref() != Some(conversation_id) {
            return false;
        }
        self.conversations
            .get_mut(conversation_id)
            .is_some_and(|c| c.replace_participant(user))
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
