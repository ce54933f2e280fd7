//! Event vocabulary and typed payloads.
//!
//! Inbound frames are decoded into [`ServerEvent`] here, at the transport
//! boundary, so nothing past this module handles untyped JSON.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use frames::Frame;

use crate::error::SessionError;
use crate::model::{self, Conversation, Message, MessageKind, Participant, UserProfile};

/// Announce presence; acknowledged with the user's conversation list.
pub const USER_CONNECT: &str = "USER_CONNECT";
/// Rejoin conversation rooms after (re)connecting. The server spells it this way.
pub const JOIN_OLD_CONVERSATIONS: &str = "JOIN_OLD_CONVERSATIIONS";
pub const INITIALIZE_CONVERSATION: &str = "INITIALIZE_CONVERSATION";
pub const SEND_MESSAGE: &str = "SEND_MESSAGE";
pub const MARK_MESSAGE_AS_SEEN: &str = "MARK_MESSAGE_AS_SEEN";
/// Server broadcast of a new message, for notifications.
pub const POPUP_MESSAGE: &str = "POPUP_MESSAGE";
/// Server broadcast of a presence change.
pub const USER_STATUS: &str = "USER_STATUS";

// =============================================================================
// OUTBOUND PAYLOADS
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConnect {
    pub user_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOldConversations {
    pub user_id: String,
    pub conversation_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeConversation {
    pub sender_id: String,
    pub recipient: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub sender_id: String,
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub conversation_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkMessageAsSeen {
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub seen: i64,
}

/// Build a request frame for `event` with a serialized payload.
pub fn request<T: Serialize>(event: &str, payload: &T) -> Result<Frame, SessionError> {
    let data = serde_json::to_value(payload).map_err(|e| invalid(event, &e))?;
    Ok(Frame::request(event, data))
}

// =============================================================================
// INBOUND EVENTS
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub conversation_id: String,
    /// Updated presence; `user.id` names the participant to replace.
    pub user: UserProfile,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopupMessage {
    pub conversation_id: String,
    #[serde(default, deserialize_with = "model::skip_malformed")]
    pub participants: Vec<Participant>,
    pub message: Message,
}

/// Closed set of events the server pushes without a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    UserStatus(UserStatus),
    PopupMessage(PopupMessage),
}

impl ServerEvent {
    /// Decode a broadcast frame.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidPayload`] for unknown events or payloads that
    /// do not match the event's schema.
    pub fn from_frame(frame: &Frame) -> Result<Self, SessionError> {
        match frame.event.as_str() {
            USER_STATUS => decode(USER_STATUS, &frame.data).map(Self::UserStatus),
            POPUP_MESSAGE => decode(POPUP_MESSAGE, &frame.data).map(Self::PopupMessage),
            other => Err(SessionError::InvalidPayload {
                event: other.to_owned(),
                reason: "unknown event".to_owned(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserStatus(_) => USER_STATUS,
            Self::PopupMessage(_) => POPUP_MESSAGE,
        }
    }
}

// =============================================================================
// ACKNOWLEDGMENT PAYLOADS
// =============================================================================

/// Conversation list carried by a `USER_CONNECT` acknowledgment or `GET /chat`.
///
/// Accepts a bare array or an object with `conversations` or `data`.
/// `None` when the payload carries no list at all. Conversations that fail
/// to decode are skipped with a warning; the rest of the list survives.
pub fn conversation_list(event: &str, data: &Value) -> Result<Option<Vec<Conversation>>, SessionError> {
    let list = match data {
        Value::Array(_) => data,
        Value::Object(map) => match map.get("conversations").or_else(|| map.get("data")) {
            Some(list) => list,
            None => return Ok(None),
        },
        _ => return Ok(None),
    };
    let Value::Array(items) = list else {
        return Err(SessionError::InvalidPayload {
            event: event.to_owned(),
            reason: "conversation list is not an array".to_owned(),
        });
    };
    let conversations = items
        .iter()
        .filter_map(|item| match Conversation::deserialize(item) {
            Ok(conversation) => Some(conversation),
            Err(e) => {
                let id = item.get("_id").or_else(|| item.get("id"));
                warn!(event, error = %e, ?id, "skipping malformed conversation");
                None
            }
        })
        .collect();
    Ok(Some(conversations))
}

/// Conversation carried by an `INITIALIZE_CONVERSATION` acknowledgment,
/// either under `conversation` or as the payload itself.
pub fn acknowledged_conversation(data: &Value) -> Result<Conversation, SessionError> {
    let value = data.get("conversation").unwrap_or(data);
    decode(INITIALIZE_CONVERSATION, value)
}

/// Message echoed by a `SEND_MESSAGE` acknowledgment, if any.
pub fn acknowledged_message(data: &Value) -> Option<Message> {
    data.get("message")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}

fn decode<T: DeserializeOwned>(event: &str, value: &Value) -> Result<T, SessionError> {
    T::deserialize(value).map_err(|e| invalid(event, &e))
}

fn invalid(event: &str, err: &serde_json::Error) -> SessionError {
    SessionError::InvalidPayload { event: event.to_owned(), reason: err.to_string() }
}

#[cfg(test)]
#[path = "events_test.rs"]
mod events_test;
