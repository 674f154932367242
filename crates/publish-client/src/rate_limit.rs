//! Per-identity publish cooldowns and the challenge verification flow.
//!
//! New threads inside the cooldown are skipped without touching the board.
//! Replies inside the cooldown wait out the remainder and then go through.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{info, instrument, warn};

use crate::types::{
    ActionClass, Identity, PublishError, PublishKind, PublishOutcome, PublishResponse,
    PublishedContent, PublishingProvider, VerificationState,
};

pub const DEFAULT_THREAD_COOLDOWN: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_REPLY_COOLDOWN: Duration = Duration::from_secs(65);

pub struct IdentityRateLimiter {
    provider: Arc<dyn PublishingProvider>,
    thread_cooldown: Duration,
    reply_cooldown: Duration,
    last_action: Mutex<HashMap<(Identity, ActionClass), Instant>>,
}

impl IdentityRateLimiter {
    pub fn new(provider: Arc<dyn PublishingProvider>) -> Self {
        Self::with_cooldowns(provider, DEFAULT_THREAD_COOLDOWN, DEFAULT_REPLY_COOLDOWN)
    }

    pub fn with_cooldowns(
        provider: Arc<dyn PublishingProvider>,
        thread_cooldown: Duration,
        reply_cooldown: Duration,
    ) -> Self {
        Self {
            provider,
            thread_cooldown,
            reply_cooldown,
            last_action: Mutex::new(HashMap::new()),
        }
    }

    fn cooldown(&self, class: ActionClass) -> Duration {
        match class {
            ActionClass::Thread => self.thread_cooldown,
            ActionClass::Reply => self.reply_cooldown,
        }
    }

    /// Time left before `identity` may act in `class` again.
    pub fn remaining(&self, identity: &Identity, class: ActionClass) -> Option<Duration> {
        let guard = self.last_action.lock().unwrap_or_else(|e| e.into_inner());
        let last = guard.get(&(identity.clone(), class))?;
        let elapsed = last.elapsed();
        let cooldown = self.cooldown(class);
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }

    /// Take the slot for `identity` in `class` under one lock, or return the
    /// time left. On success the previous mark is handed back so a failed
    /// publish can restore it.
    fn try_claim(
        &self,
        identity: &Identity,
        class: ActionClass,
    ) -> Result<Option<Instant>, Duration> {
        let mut guard = self.last_action.lock().unwrap_or_else(|e| e.into_inner());
        let key = (identity.clone(), class);
        let now = Instant::now();
        if let Some(last) = guard.get(&key) {
            let elapsed = now.saturating_duration_since(*last);
            let cooldown = self.cooldown(class);
            if elapsed < cooldown {
                return Err(cooldown - elapsed);
            }
        }
        Ok(guard.insert(key, now))
    }

    fn release(&self, identity: &Identity, class: ActionClass, previous: Option<Instant>) {
        let mut guard = self.last_action.lock().unwrap_or_else(|e| e.into_inner());
        let key = (identity.clone(), class);
        match previous {
            Some(last) => {
                guard.insert(key, last);
            }
            None => {
                guard.remove(&key);
            }
        }
    }

    #[instrument(skip(self, identity, kind, body), fields(identity = %identity, class = ?kind.class()))]
    pub async fn publish(
        &self,
        identity: &Identity,
        kind: PublishKind,
        body: &str,
    ) -> Result<PublishOutcome, PublishError> {
        let class = kind.class();
        let previous = loop {
            match self.try_claim(identity, class) {
                Ok(previous) => break previous,
                Err(remaining) => match class {
                    ActionClass::Thread => {
                        info!(
                            "{} thread cooldown active, {}s left; skipping",
                            identity,
                            remaining.as_secs()
                        );
                        return Ok(PublishOutcome::Skipped {
                            retry_in: remaining,
                        });
                    }
                    ActionClass::Reply => {
                        info!(
                            "{} reply cooldown active, waiting {}s",
                            identity,
                            remaining.as_secs()
                        );
                        sleep(remaining).await;
                    }
                },
            }
        };

        let sent = match &kind {
            PublishKind::Thread { title } => {
                self.provider.create_thread(identity, title, body).await
            }
            PublishKind::Reply {
                thread_id,
                parent_id,
            } => {
                self.provider
                    .create_reply(identity, thread_id, body, parent_id.as_deref())
                    .await
            }
        };
        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                self.release(identity, class, previous);
                return Err(e);
            }
        };

        let thread_id = match &kind {
            PublishKind::Thread { .. } => response.thread_id.clone(),
            PublishKind::Reply { thread_id, .. } => Some(thread_id.clone()),
        };
        let (verification, content_id) = self.settle_challenge(identity, &response).await;

        Ok(PublishOutcome::Published(PublishedContent {
            identity: identity.clone(),
            thread_id,
            body: body.to_string(),
            content_id,
            verification,
        }))
    }

    /// Solve and answer the challenge attached to `response`, if any. A failed
    /// answer leaves the content published but unverified.
    async fn settle_challenge(
        &self,
        identity: &Identity,
        response: &PublishResponse,
    ) -> (VerificationState, Option<String>) {
        let Some(challenge) = &response.challenge else {
            return (VerificationState::Verified, response.content_id.clone());
        };

        let answer = challenge_solver::solve(&challenge.text);
        info!("{} answering challenge {} with {}", identity, challenge.code, answer);

        match self.provider.verify(identity, &challenge.code, &answer).await {
            Ok(reply) => {
                let content_id = reply
                    .get("content_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .or_else(|| response.content_id.clone());
                (VerificationState::Unverified.settle(true), content_id)
            }
            Err(e) => {
                warn!("verification failed for {}: {}", identity, e);
                (
                    VerificationState::Unverified.settle(false),
                    response.content_id.clone(),
                )
            }
        }
    }
}
