//! Conversation, message, and participant types.
//!
//! DESIGN
//! ======
//! These mirror the server's JSON (camelCase, `_id` accepted for ids) so the
//! same types decode `GET /chat` responses and transport payloads. Derived
//! values such as the unread count and header are computed on demand and
//! never stored, so they cannot drift from the messages they summarize.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

/// Seen marker for a message the server flagged as seen without a time.
pub const SEEN_AT_UNKNOWN: i64 = 0;

/// Public profile of a marketplace user, as embedded in participant lists.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub profile_image: Option<String>,
    /// Professional headline, shown as the conversation description.
    #[serde(default)]
    pub title: Option<String>,
    /// Presence flag; only meaningful inside the focused conversation.
    #[serde(default)]
    pub online: Option<bool>,
}

/// A participant is either a bare user id or an expanded profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Participant {
    Id(String),
    User(UserProfile),
}

impl Participant {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::User(user) => &user.id,
        }
    }

    /// Display name, falling back to the id for bare references.
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self {
            Self::User(user) if !user.name.is_empty() => &user.name,
            _ => self.id(),
        }
    }

    #[must_use]
    pub fn avatar(&self) -> Option<&str> {
        match self {
            Self::User(user) => user.profile_image.as_deref(),
            Self::Id(_) => None,
        }
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::User(user) => user.title.as_deref(),
            Self::Id(_) => None,
        }
    }
}

/// Locate the first participant that is not `self_id`.
#[must_use]
pub fn other_participant<'a>(participants: &'a [Participant], self_id: &str) -> Option<&'a Participant> {
    participants.iter().find(|p| p.id() != self_id)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConversationKind {
    #[default]
    Direct,
    /// Any non-direct conversation type.
    #[serde(other)]
    Group,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub content: String,
    /// Sender user id.
    pub user: String,
    /// When the recipient saw the message (ms since epoch); absent means unread.
    ///
    /// Any non-null marker counts as seen. `true` and unparseable strings
    /// decode as [`SEEN_AT_UNKNOWN`].
    #[serde(default, deserialize_with = "seen_marker")]
    pub seen: Option<i64>,
    /// Ms since epoch; RFC 3339 strings are accepted on decode.
    #[serde(default, deserialize_with = "timestamp_or_zero")]
    pub created_at: i64,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
}

impl Message {
    #[must_use]
    pub fn is_seen(&self) -> bool {
        self.seen.is_some()
    }

    /// Messages carry no id of their own; sender, time, and content stand in.
    #[must_use]
    pub fn same_as(&self, other: &Message) -> bool {
        self.user == other.user && self.created_at == other.created_at && self.content == other.content
    }
}

/// Group metadata; unused for direct conversations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Title block rendered above a conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub title: String,
    pub description: Option<String>,
    pub image: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: ConversationKind,
    #[serde(default, deserialize_with = "skip_malformed")]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub group: Option<GroupInfo>,
    #[serde(default, deserialize_with = "skip_malformed")]
    pub messages: Vec<Message>,
    #[serde(default, deserialize_with = "timestamp_or_zero")]
    pub created_at: i64,
}

impl Conversation {
    /// Messages with no seen marker.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.is_seen()).count()
    }

    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    #[must_use]
    pub fn last_message_time(&self) -> Option<i64> {
        self.last_message().map(|m| m.created_at)
    }

    /// The party that is not the logged-in user. Never returns `self_id`.
    #[must_use]
    pub fn other_party(&self, self_id: &str) -> Option<&Participant> {
        other_participant(&self.participants, self_id)
    }

    #[must_use]
    pub fn header(&self, self_id: &str) -> Header {
        if self.kind == ConversationKind::Group {
            let group = self.group.clone().unwrap_or_default();
            return Header { title: group.name, description: group.description, image: group.image };
        }
        match self.other_party(self_id) {
            Some(other) => Header {
                title: other.display_name().to_owned(),
                description: other.title().map(str::to_owned),
                image: other.avatar().map(str::to_owned),
            },
            None => Header { title: String::new(), description: None, image: None },
        }
    }

    /// Append unless the same message is already present.
    ///
    /// Returns `false` for duplicates.
    pub fn push_message(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|m| m.same_as(&message)) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Swap the participant whose id matches `user.id` for the expanded profile.
    ///
    /// Returns `true` if a participant was replaced.
    pub fn replace_participant(&mut self, user: &UserProfile) -> bool {
        let Some(slot) = self.participants.iter_mut().find(|p| p.id() == user.id) else {
            return false;
        };
        *slot = Participant::User(user.clone());
        true
    }
}

// =============================================================================
// LENIENT DECODING
// =============================================================================

/// Decode a list element by element, dropping the ones that do not fit `T`.
///
/// A missing, null, or non-array value decodes as an empty list.
pub(crate) fn skip_malformed<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => return Ok(Vec::new()),
        other => {
            debug!(value = %other, "expected a list");
            return Ok(Vec::new());
        }
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                debug!(error = %e, "skipping malformed list element");
                None
            }
        })
        .collect())
}

fn seen_marker<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let marker = match Value::deserialize(deserializer)? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        other => Some(epoch_millis(&other).unwrap_or(SEEN_AT_UNKNOWN)),
    };
    Ok(marker)
}

fn timestamp_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(epoch_millis(&Value::deserialize(deserializer)?).unwrap_or(0))
}

/// Integer or fractional milliseconds, or an RFC 3339 timestamp.
#[allow(clippy::cast_possible_truncation)]
fn epoch_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => {
            let at = OffsetDateTime::parse(s, &Rfc3339).ok()?;
            i64::try_from(at.unix_timestamp_nanos() / 1_000_000).ok()
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod model_test;
