//! REST collaborator: conversation listing, history backfill, and fallback
//! endpoints for reads and reactions when the socket is unavailable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use murmur_shared::ApiError;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::stores::{DeliveryState, Message};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub participant_ids: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// A message as the history endpoint returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub seq: Option<u64>,
    /// Users who have read this message.
    #[serde(default)]
    pub read_by: Vec<String>,
}

impl HistoryMessage {
    /// Convert to a store record as seen by `local_user`.
    pub fn into_message(self, local_user: &str) -> Message {
        let delivery_state = if self.sender_id == local_user {
            if self.read_by.iter().any(|u| u != local_user) {
                DeliveryState::Read
            } else {
                DeliveryState::Sent
            }
        } else if self.read_by.iter().any(|u| u == local_user) {
            DeliveryState::Read
        } else {
            DeliveryState::Delivered
        };
        Message {
            id: Some(self.id),
            pending_id: None,
            sender_id: self.sender_id,
            content: self.content,
            created_at: Some(self.created_at),
            origin_timestamp: None,
            seq: self.seq,
            delivery_state,
            reactions: Vec::new(),
        }
    }
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError>;

    /// Messages older than `before` (a message id), oldest first.
    async fn list_messages(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, ApiError>;

    async fn mark_read(&self, conversation_id: &str, message_ids: &[String]) -> Result<(), ApiError>;

    async fn add_reaction(
        &self,
        conversation_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), ApiError>;
}

/// [`HistorySource`] over HTTP with a bearer token.
#[derive(Debug, Clone)]
pub struct RestHistory {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadRequest<'a> {
    message_ids: &'a [String],
}

#[derive(Serialize)]
struct ReactionRequest<'a> {
    emoji: &'a str,
}

impl RestHistory {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: Client::new(),
            base_url,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Network(format!("cannot use {} as a base url", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn get_json<TRes: DeserializeOwned>(&self, url: Url) -> Result<TRes, ApiError> {
        let resp = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::http(status, text));
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    async fn post_json<TReq: Serialize>(&self, url: Url, body: &TReq) -> Result<(), ApiError> {
        let resp = self
            .authorize(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        if resp.status().is_success() {
            return Ok(());
        }
        let text = resp.text().await.map_err(|e| ApiError::Network(e.to_string()))?;
        Err(ApiError::http(status, text))
    }
}

#[async_trait]
impl HistorySource for RestHistory {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        self.get_json(self.url(&["conversations"])?).await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, ApiError> {
        let mut url = self.url(&["conversations", conversation_id, "messages"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(before) = before {
                query.append_pair("before", before);
            }
        }
        self.get_json(url).await
    }

    async fn mark_read(&self, conversation_id: &str, message_ids: &[String]) -> Result<(), ApiError> {
        let url = self.url(&["conversations", conversation_id, "read"])?;
        self.post_json(url, &ReadRequest { message_ids }).await
    }

    async fn add_reaction(
        &self,
        conversation_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), ApiError> {
        let url = self.url(&[
            "conversations",
            conversation_id,
            "messages",
            message_id,
            "reactions",
        ])?;
        self.post_json(url, &ReactionRequest { emoji }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_escape_segments() {
        let api = RestHistory::new(Url::parse("https://chat.example/api/").unwrap());
        let url = api.url(&["conversations", "a b/c", "messages"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://chat.example/api/conversations/a%20b%2Fc/messages"
        );
    }

    #[test]
    fn test_history_message_delivery_state() {
        let message = |sender: &str, read_by: &[&str]| HistoryMessage {
            id: "m1".into(),
            sender_id: sender.into(),
            content: "hi".into(),
            created_at: Utc::now(),
            seq: Some(1),
            read_by: read_by.iter().map(|s| s.to_string()).collect(),
        };

        assert_eq!(message("u2", &[]).into_message("u1").delivery_state, DeliveryState::Delivered);
        assert_eq!(message("u2", &["u1"]).into_message("u1").delivery_state, DeliveryState::Read);
        assert_eq!(message("u1", &[]).into_message("u1").delivery_state, DeliveryState::Sent);
        assert_eq!(message("u1", &["u2"]).into_message("u1").delivery_state, DeliveryState::Read);
    }

    #[test]
    fn test_history_message_wire_shape() {
        let json = r#"{"id":"m1","senderId":"u2","content":"hi","createdAt":"2024-05-01T10:00:00Z"}"#;
        let message: HistoryMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.seq, None);
        assert!(message.read_by.is_empty());
    }
}
