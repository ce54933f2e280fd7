//! Wire envelope for the chat websocket.
//!
//! Each websocket binary message carries one protobuf [`Frame`]. The envelope
//! names the event and the conversation; the event payload rides along as a
//! `google.protobuf.Value` and surfaces here as `serde_json::Value`.
//!
//! EXCHANGES
//! =========
//! - request: fresh id, no parent
//! - acknowledgment: `Done` or `Error`, `parent_id` = request id
//! - progress: `Item` with a parent; never settles the request
//! - broadcast: server push with no parent (`POPUP_MESSAGE`, `USER_STATUS`)

use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message as _;
use prost_types::value::Kind;
use serde_json::{Map, Number, Value};
use uuid::Uuid;

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] prost::DecodeError),
    #[error("unknown frame status {0}")]
    UnknownStatus(i32),
}

/// Position of a frame within a request/acknowledgment exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Request,
    Done,
    Error,
    /// Server abandoned the request.
    Cancel,
    /// Progress for a pending request.
    Item,
}

impl Status {
    /// Whether a frame with this status settles the request it answers.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancel)
    }

    #[must_use]
    pub fn as_i32(self) -> i32 {
        WireStatus::from(self) as i32
    }
}

impl From<Status> for WireStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::Request => WireStatus::Request,
            Status::Done => WireStatus::Done,
            Status::Error => WireStatus::Error,
            Status::Cancel => WireStatus::Cancel,
            Status::Item => WireStatus::Item,
        }
    }
}

impl TryFrom<i32> for Status {
    type Error = CodecError;

    fn try_from(raw: i32) -> Result<Self, CodecError> {
        let status = match WireStatus::try_from(raw).map_err(|_| CodecError::UnknownStatus(raw))? {
            WireStatus::Request => Status::Request,
            WireStatus::Done => Status::Done,
            WireStatus::Error => Status::Error,
            WireStatus::Cancel => Status::Cancel,
            WireStatus::Item => Status::Item,
        };
        Ok(status)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub id: String,
    /// Request this frame answers; `None` for requests and broadcasts.
    pub parent_id: Option<String>,
    /// Creation time, ms since the Unix epoch.
    pub ts: i64,
    pub conversation_id: Option<String>,
    /// Sending user id, when the sender chose to stamp it.
    pub from: Option<String>,
    pub event: String,
    pub status: Status,
    pub data: Value,
}

impl Frame {
    /// New request for `event` with a fresh id.
    #[must_use]
    pub fn request(event: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id: None,
            ts: now_ms(),
            conversation_id: None,
            from: None,
            event: event.into(),
            status: Status::Request,
            data,
        }
    }

    /// Successful acknowledgment of this request.
    #[must_use]
    pub fn done(&self, data: Value) -> Self {
        self.answer(Status::Done, data)
    }

    /// Failed acknowledgment of this request, with `{message}` as payload.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("message".to_owned(), Value::String(message.into()));
        self.answer(Status::Error, Value::Object(data))
    }

    #[must_use]
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Id of the request this frame settles, if it is a terminal answer.
    #[must_use]
    pub fn settles(&self) -> Option<&str> {
        self.parent_id.as_deref().filter(|_| self.status.is_terminal())
    }

    /// Server-initiated frame, not tied to any request.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.parent_id.is_none()
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.data.get("message").and_then(Value::as_str)
    }

    fn answer(&self, status: Status, data: Value) -> Self {
        Self {
            parent_id: Some(self.id.clone()),
            conversation_id: self.conversation_id.clone(),
            status,
            ..Self::request(self.event.clone(), data)
        }
    }
}

/// Current time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|elapsed| i64::try_from(elapsed.as_millis()).ok())
        .unwrap_or(0)
}

#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    <WireFrame as From<&Frame>>::from(frame).encode_to_vec()
}

/// # Errors
///
/// [`CodecError::Malformed`] for bytes that are not a frame,
/// [`CodecError::UnknownStatus`] for a status this client does not know.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    Frame::try_from(WireFrame::decode(bytes)?)
}

impl From<&Frame> for WireFrame {
    fn from(frame: &Frame) -> Self {
        Self {
            id: frame.id.clone(),
            parent_id: frame.parent_id.clone(),
            ts: frame.ts,
            conversation_id: frame.conversation_id.clone(),
            from: frame.from.clone(),
            event: frame.event.clone(),
            status: frame.status.as_i32(),
            data: Some(payload::encode(&frame.data)),
        }
    }
}

impl TryFrom<WireFrame> for Frame {
    type Error = CodecError;

    fn try_from(wire: WireFrame) -> Result<Self, CodecError> {
        let status = Status::try_from(wire.status)?;
        Ok(Self {
            id: wire.id,
            parent_id: wire.parent_id,
            ts: wire.ts,
            conversation_id: wire.conversation_id,
            from: wire.from,
            event: wire.event,
            status,
            data: wire.data.map_or_else(|| Value::Object(Map::new()), payload::decode),
        })
    }
}

/// Payload conversion between JSON and `google.protobuf.Value`.
mod payload {
    use super::*;

    /// Largest integer an `f64` carries exactly.
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

    pub(super) fn encode(value: &Value) -> prost_types::Value {
        let kind = match value {
            Value::Null => Kind::NullValue(prost_types::NullValue::NullValue.into()),
            Value::Bool(b) => Kind::BoolValue(*b),
            Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
            Value::String(s) => Kind::StringValue(s.clone()),
            Value::Array(items) => Kind::ListValue(prost_types::ListValue { values: items.iter().map(encode).collect() }),
            Value::Object(map) => Kind::StructValue(prost_types::Struct {
                fields: map.iter().map(|(key, item)| (key.clone(), encode(item))).collect(),
            }),
        };
        prost_types::Value { kind: Some(kind) }
    }

    /// Whole numbers come back as integers so timestamps decode into `i64`.
    #[allow(clippy::cast_possible_truncation)]
    pub(super) fn decode(value: prost_types::Value) -> Value {
        match value.kind {
            None | Some(Kind::NullValue(_)) => Value::Null,
            Some(Kind::BoolValue(b)) => Value::Bool(b),
            Some(Kind::StringValue(s)) => Value::String(s),
            Some(Kind::NumberValue(n)) if n.fract() == 0.0 && n.abs() < MAX_EXACT => Value::from(n as i64),
            Some(Kind::NumberValue(n)) => Number::from_f64(n).map_or(Value::Null, Value::Number),
            Some(Kind::ListValue(list)) => Value::Array(list.values.into_iter().map(decode).collect()),
            Some(Kind::StructValue(object)) => {
                Value::Object(object.fields.into_iter().map(|(key, item)| (key, decode(item))).collect())
            }
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
struct WireFrame {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, optional, tag = "2")]
    parent_id: Option<String>,
    #[prost(int64, tag = "3")]
    ts: i64,
    #[prost(string, optional, tag = "4")]
    conversation_id: Option<String>,
    #[prost(string, optional, tag = "5")]
    from: Option<String>,
    #[prost(string, tag = "6")]
    event: String,
    #[prost(enumeration = "WireStatus", tag = "7")]
    status: i32,
    #[prost(message, optional, tag = "8")]
    data: Option<prost_types::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WireStatus {
    Request = 0,
    Done = 1,
    Error = 2,
    Cancel = 3,
    Item = 4,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
