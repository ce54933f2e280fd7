//! Session configuration parsed from environment variables.

use std::time::Duration;

use crate::error::SessionError;

pub const DEFAULT_TOKEN_COOKIE: &str = "token";
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 10_000;
pub const DEFAULT_PREVIEW_LIMIT: usize = 50;

/// Reconnect delay bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    /// Add up to 20% random delay on top of each step.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(DEFAULT_BACKOFF_INITIAL_MS),
            max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Websocket endpoint of the message server.
    pub socket_url: String,
    /// REST base URL; `GET {api_url}/chat` lists conversations.
    pub api_url: String,
    /// Cookie holding the bearer token.
    pub token_cookie: String,
    pub ack_timeout: Duration,
    pub backoff: BackoffConfig,
    /// Characters kept in a notification preview before `...` is appended.
    pub preview_limit: usize,
}

impl SessionConfig {
    /// Config with defaults for everything but the two endpoints.
    pub fn new(socket_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            socket_url: socket_url.into(),
            api_url: api_url.into().trim_end_matches('/').to_owned(),
            token_cookie: DEFAULT_TOKEN_COOKIE.to_owned(),
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
            backoff: BackoffConfig::default(),
            preview_limit: DEFAULT_PREVIEW_LIMIT,
        }
    }

    /// Build typed session config from environment variables.
    ///
    /// Required:
    /// - `CHAT_SOCKET_URL`
    /// - `CHAT_API_URL`
    ///
    /// Optional:
    /// - `CHAT_TOKEN_COOKIE`: default `token`
    /// - `CHAT_ACK_TIMEOUT_MS`: default 10000
    /// - `CHAT_BACKOFF_INITIAL_MS`: default 1000
    /// - `CHAT_BACKOFF_MAX_MS`: default 10000
    /// - `CHAT_PREVIEW_LIMIT`: default 50
    pub fn from_env() -> Result<Self, SessionError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SessionConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SessionError> {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or(SessionError::MissingConfig { var })
        };

        let mut cfg = Self::new(required("CHAT_SOCKET_URL")?, required("CHAT_API_URL")?);
        if let Some(cookie) = lookup("CHAT_TOKEN_COOKIE").filter(|v| !v.is_empty()) {
            cfg.token_cookie = cookie;
        }
        cfg.ack_timeout = Duration::from_millis(parse_or(&lookup, "CHAT_ACK_TIMEOUT_MS", DEFAULT_ACK_TIMEOUT_MS));
        cfg.backoff.initial =
            Duration::from_millis(parse_or(&lookup, "CHAT_BACKOFF_INITIAL_MS", DEFAULT_BACKOFF_INITIAL_MS));
        cfg.backoff.max = Duration::from_millis(parse_or(&lookup, "CHAT_BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS))
            .max(cfg.backoff.initial);
        cfg.preview_limit = parse_or(&lookup, "CHAT_PREVIEW_LIMIT", DEFAULT_PREVIEW_LIMIT);
        Ok(cfg)
    }

    /// URL of the conversation list endpoint.
    #[must_use]
    pub fn chat_list_url(&self) -> String {
        format!("{}/chat", self.api_url)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
