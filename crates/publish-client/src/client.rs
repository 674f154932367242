//! HTTP client for the discussion board.
//!
//! Each identity authenticates with its own bearer key. Raw requests share a
//! `governor` quota so a burst of replies cannot trip the board's per-IP
//! limits.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::types::{Identity, PublishError, PublishResponse, PublishingProvider};

pub const DEFAULT_BASE_URL: &str = "https://www.moltbook.com/api/v1";
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 30;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn format_reqwest_error(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !cause_msg.is_empty() && !message.contains(&cause_msg) {
            message.push_str(": ");
            message.push_str(&cause_msg);
        }
        source = cause.source();
    }
    message
}

fn summarize_body(raw: &str) -> String {
    const MAX_CHARS: usize = 400;
    let compact = raw.replace(['\n', '\r'], " ");
    match compact.char_indices().nth(MAX_CHARS) {
        Some((idx, _)) => format!("{}…", &compact[..idx]),
        None => compact,
    }
}

#[derive(Clone)]
pub struct MoltbookClient {
    client: reqwest::Client,
    base_url: String,
    community: String,
    keys: HashMap<Identity, String>,
    limiter: Arc<DirectLimiter>,
}

impl MoltbookClient {
    /// `keys` maps each identity to its bearer key. Identities without a key
    /// fail with `MissingCredentials`.
    pub fn new(
        base_url: &str,
        community: &str,
        keys: HashMap<Identity, String>,
        requests_per_minute: u32,
    ) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| PublishError::Http(format_reqwest_error(&e)))?;
        let per_minute = NonZeroU32::new(requests_per_minute)
            .or(NonZeroU32::new(DEFAULT_REQUESTS_PER_MINUTE))
            .unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            community: community.to_string(),
            keys,
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn key(&self, identity: &Identity) -> Result<&str, PublishError> {
        self.keys
            .get(identity)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PublishError::MissingCredentials(identity.to_string()))
    }

    async fn post_json(
        &self,
        identity: &Identity,
        path: &str,
        payload: &Value,
    ) -> Result<Value, PublishError> {
        let key = self.key(identity)?;
        self.limiter.until_ready().await;

        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(key)
            .json(payload)
            .send()
            .await
            .map_err(|e| PublishError::Http(format_reqwest_error(&e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| PublishError::Http(format_reqwest_error(&e)))?;
        if !status.is_success() {
            return Err(PublishError::Api {
                status: status.as_u16(),
                body: summarize_body(&text),
            });
        }

        debug!("{} {} -> {}", identity, path, summarize_body(&text));
        serde_json::from_str(&text).map_err(|e| PublishError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PublishingProvider for MoltbookClient {
    #[instrument(skip(self, identity, body), fields(identity = %identity))]
    async fn create_thread(
        &self,
        identity: &Identity,
        title: &str,
        body: &str,
    ) -> Result<PublishResponse, PublishError> {
        let payload = json!({
            "submolt": self.community,
            "title": title,
            "content": body,
        });
        let raw = self.post_json(identity, "/posts", &payload).await?;
        Ok(PublishResponse::from_value(raw))
    }

    #[instrument(skip(self, identity, body), fields(identity = %identity))]
    async fn create_reply(
        &self,
        identity: &Identity,
        thread_id: &str,
        body: &str,
        parent_id: Option<&str>,
    ) -> Result<PublishResponse, PublishError> {
        let mut payload = json!({ "content": body });
        if let Some(parent) = parent_id {
            payload["parent_id"] = json!(parent);
        }
        let path = format!("/posts/{}/comments", thread_id);
        let raw = self.post_json(identity, &path, &payload).await?;
        Ok(PublishResponse::from_value(raw))
    }

    #[instrument(skip(self, identity), fields(identity = %identity))]
    async fn verify(
        &self,
        identity: &Identity,
        code: &str,
        answer: &str,
    ) -> Result<Value, PublishError> {
        let payload = json!({
            "verification_code": code,
            "answer": answer,
        });
        self.post_json(identity, "/verify", &payload).await
    }
}
