//! Shared error types: codec failures and the REST collaborator's errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::envelope::Kind;

/// Why an inbound frame could not become an [`Envelope`](crate::Envelope).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown envelope kind `{kind}`")]
    UnknownKind { kind: String, id: String },

    #[error("`{kind}` envelope without conversationId")]
    MissingConversation { kind: Kind, id: String },

    #[error("invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: Kind,
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("encoded envelope is not valid UTF-8: {0}")]
    Utf8(String),
}

/// RFC7807 Problem Details, as returned by the history service on failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_url: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Attempt to parse an RFC7807 JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

/// Errors from the REST collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {}", problem.as_deref().unwrap_or(body))]
    Http {
        status: u16,
        body: String,
        problem: Option<String>,
    },

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    pub fn http(status: u16, body: String) -> Self {
        let problem = try_problem_detail(&body);
        ApiError::Http {
            status,
            body,
            problem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_detail_prefers_detail() {
        let body = r#"{"type":"about:blank","title":"Not Found","status":404,"detail":"no such conversation"}"#;
        assert_eq!(try_problem_detail(body).as_deref(), Some("no such conversation"));

        let err = ApiError::http(404, body.to_string());
        assert_eq!(err.to_string(), "HTTP 404: no such conversation");
    }

    #[test]
    fn test_plain_body_falls_back() {
        let err = ApiError::http(502, "bad gateway".to_string());
        assert_eq!(err.to_string(), "HTTP 502: bad gateway");
    }
}
