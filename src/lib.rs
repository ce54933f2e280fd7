//! Real-time messaging session client for the marketplace chat.
//!
//! A [`SessionHandle`] owns one authenticated websocket connection, keeps a
//! local cache of the user's conversations, and turns server broadcasts into
//! cache updates and toast notifications.

pub mod api;
pub mod cache;
pub mod config;
pub mod connection;
pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod model;
pub mod notify;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::SessionConfig;
pub use connection::ConnectionState;
pub use credential::{CookieJar, Credential};
pub use error::SessionError;
pub use model::{Conversation, Header, Message, MessageKind, Participant, UserProfile};
pub use notify::{ChannelNotifier, LogNotifier, Notification, Notifier};
pub use session::{OutgoingMessage, SessionHandle};
