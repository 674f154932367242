use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A publishing identity. One per evaluator persona, each with its own
/// credentials and cooldown clock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    Thread,
    Reply,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishKind {
    /// Start a new thread.
    Thread { title: String },
    /// Reply on an existing thread, optionally under another reply.
    Reply {
        thread_id: String,
        parent_id: Option<String>,
    },
}

impl PublishKind {
    pub fn class(&self) -> ActionClass {
        match self {
            PublishKind::Thread { .. } => ActionClass::Thread,
            PublishKind::Reply { .. } => ActionClass::Reply,
        }
    }
}

/// Arithmetic challenge attached to a fresh submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub code: String,
    pub text: String,
}

/// What the board returned for a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishResponse {
    pub content_id: Option<String>,
    /// Thread the content lives in. Set for new threads.
    pub thread_id: Option<String>,
    pub challenge: Option<Challenge>,
    pub raw: Value,
}

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl PublishResponse {
    /// Interpret a raw submission response. `{ post: { id } }` carries a
    /// thread, `{ comment: { id } }` a reply; a challenge is present when
    /// `verification_required` is set with `verification { code, challenge }`.
    pub fn from_value(raw: Value) -> Self {
        let thread_id = string_at(&raw, "/post/id");
        let content_id = string_at(&raw, "/content_id")
            .or_else(|| string_at(&raw, "/comment/id"))
            .or_else(|| thread_id.clone())
            .or_else(|| string_at(&raw, "/id"));

        let required = raw
            .get("verification_required")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let challenge = if required {
            let code = string_at(&raw, "/verification/code");
            let text = string_at(&raw, "/verification/challenge")
                .or_else(|| string_at(&raw, "/verification/challenge_text"));
            code.zip(text).map(|(code, text)| Challenge { code, text })
        } else {
            None
        };

        Self {
            content_id,
            thread_id,
            challenge,
            raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Unverified,
    Verified,
    Failed,
}

impl VerificationState {
    /// Settle a pending verification. Only `Unverified` can move; a settled
    /// state is returned unchanged.
    pub fn settle(self, passed: bool) -> Self {
        match self {
            VerificationState::Unverified if passed => VerificationState::Verified,
            VerificationState::Unverified => VerificationState::Failed,
            settled => settled,
        }
    }
}

/// A submitted thread or reply.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedContent {
    pub identity: Identity,
    pub thread_id: Option<String>,
    pub body: String,
    pub content_id: Option<String>,
    pub verification: VerificationState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published(PublishedContent),
    /// New thread inside the identity's cooldown. No remote call was made.
    Skipped { retry_in: Duration },
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("no credentials configured for identity {0}")]
    MissingCredentials(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("board API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("response decode failed: {0}")]
    Decode(String),
}

/// Remote discussion board.
#[async_trait]
pub trait PublishingProvider: Send + Sync {
    async fn create_thread(
        &self,
        identity: &Identity,
        title: &str,
        body: &str,
    ) -> Result<PublishResponse, PublishError>;

    async fn create_reply(
        &self,
        identity: &Identity,
        thread_id: &str,
        body: &str,
        parent_id: Option<&str>,
    ) -> Result<PublishResponse, PublishError>;

    async fn verify(
        &self,
        identity: &Identity,
        code: &str,
        answer: &str,
    ) -> Result<Value, PublishError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_with_challenge() {
        let response = PublishResponse::from_value(json!({
            "post": { "id": "p-1" },
            "verification_required": true,
            "verification": { "code": "abc", "challenge": "two plus two" }
        }));
        assert_eq!(response.thread_id.as_deref(), Some("p-1"));
        assert_eq!(response.content_id.as_deref(), Some("p-1"));
        assert_eq!(
            response.challenge,
            Some(Challenge {
                code: "abc".into(),
                text: "two plus two".into()
            })
        );
    }

    #[test]
    fn test_challenge_ignored_without_flag() {
        let response = PublishResponse::from_value(json!({
            "comment": { "id": "c-9" },
            "verification": { "code": "abc", "challenge": "two plus two" }
        }));
        assert_eq!(response.challenge, None);
        assert_eq!(response.thread_id, None);
        assert_eq!(response.content_id.as_deref(), Some("c-9"));
    }

    #[test]
    fn test_verification_settles_once() {
        let verified = VerificationState::Unverified.settle(true);
        assert_eq!(verified, VerificationState::Verified);
        assert_eq!(verified.settle(false), VerificationState::Verified);
        let failed = VerificationState::Unverified.settle(false);
        assert_eq!(failed.settle(true), VerificationState::Failed);
    }
}
