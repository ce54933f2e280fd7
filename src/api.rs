//! REST client for the conversation list.
//!
//! `GET /chat` is the source of truth the session falls back to: it runs at
//! cold start and after every mutating action.

use reqwest::header::AUTHORIZATION;
use tracing::debug;

use crate::credential::Credential;
use crate::error::SessionError;
use crate::events;
use crate::model::Conversation;

#[derive(Clone, Debug)]
pub struct ChatApi {
    http: reqwest::Client,
    list_url: String,
    credential: Credential,
}

impl ChatApi {
    /// Client for the list endpoint at `list_url`, usually
    /// [`SessionConfig::chat_list_url`](crate::config::SessionConfig::chat_list_url).
    #[must_use]
    pub fn new(http: reqwest::Client, list_url: impl Into<String>, credential: Credential) -> Self {
        Self { http, list_url: list_url.into(), credential }
    }

    /// Fetch every conversation of the authenticated user.
    ///
    /// # Errors
    ///
    /// [`SessionError::Http`] on transport failures, [`SessionError::HttpStatus`]
    /// for non-success responses, [`SessionError::InvalidPayload`] when the body
    /// is not a conversation list.
    pub async fn fetch_conversations(&self) -> Result<Vec<Conversation>, SessionError> {
        let response = self
            .http
            .get(&self.list_url)
            .header(AUTHORIZATION, self.credential.bearer())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::HttpStatus { status: status.as_u16(), url: self.list_url.clone() });
        }

        let body = response.json::<serde_json::Value>().await?;
        let list = events::conversation_list("GET /chat", &body)?.ok_or_else(|| SessionError::InvalidPayload {
            event: "GET /chat".to_owned(),
            reason: "response carries no conversation list".to_owned(),
        })?;
        debug!(count = list.len(), "fetched conversations");
        Ok(list)
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;
