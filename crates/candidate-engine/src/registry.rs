//! Seen-set of candidate tokens and discovery through the activity graph.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use common::Candidate;
use tracing::{debug, info, warn};

use crate::provider::{ProviderError, TokenDataProvider};

/// Maximum number of seed participants whose holdings are expanded per crawl.
pub const CRAWL_FAN_OUT: usize = 5;

pub struct CandidateRegistry {
    provider: Arc<dyn TokenDataProvider>,
    seen: Mutex<HashSet<String>>,
}

impl CandidateRegistry {
    pub fn new(provider: Arc<dyn TokenDataProvider>) -> Self {
        Self {
            provider,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Registry pre-loaded with ids that must never be analyzed again.
    pub fn with_seen(
        provider: Arc<dyn TokenDataProvider>,
        ids: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            provider,
            seen: Mutex::new(ids.into_iter().collect()),
        }
    }

    fn seen(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked.
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.seen().contains(id)
    }

    pub fn seen_count(&self) -> usize {
        self.seen().len()
    }

    /// Fetches metadata for every unseen id and returns the eligible ones.
    ///
    /// Returned and graduated ids are marked seen. An id whose metadata
    /// cannot be fetched stays unseen so a later call can retry it.
    pub async fn discover(&self, ids: &[String]) -> Vec<Candidate> {
        let mut found = Vec::new();
        for id in ids {
            if self.has_seen(id) {
                continue;
            }

            let info = match self.provider.info(id).await {
                Ok(info) => info,
                Err(e) => {
                    warn!("Metadata fetch failed for {}: {}", id, e);
                    continue;
                }
            };

            // Claim under the lock; a concurrent caller may have won meanwhile.
            if !self.seen().insert(id.clone()) {
                continue;
            }

            if info.graduated {
                debug!("Skipping graduated token {}", id);
                continue;
            }

            let mut candidate = Candidate::from_info(&info, Utc::now());
            candidate.id = id.clone();
            info!("Discovered {} (${}) {}", candidate.name, candidate.symbol, id);
            found.push(candidate);
        }
        found
    }

    /// Ids reachable from `seed` through recent traders' holdings that are
    /// eligible and not yet seen. Does not mark anything seen.
    pub async fn crawl(&self, seed: &str) -> Result<Vec<String>, ProviderError> {
        let activity = self.provider.recent_activity(seed).await?;

        let mut participants: Vec<String> = Vec::new();
        for entry in activity {
            if participants.len() >= CRAWL_FAN_OUT {
                break;
            }
            if !participants.contains(&entry.account) {
                participants.push(entry.account);
            }
        }

        let mut emitted = HashSet::new();
        let mut ids = Vec::new();
        for account in &participants {
            let holdings = match self.provider.holdings_of(account).await {
                Ok(holdings) => holdings,
                Err(e) => {
                    debug!("Holdings lookup failed for {}: {}", account, e);
                    continue;
                }
            };
            for holding in holdings {
                if holding.graduated || self.has_seen(&holding.token_id) {
                    continue;
                }
                if emitted.insert(holding.token_id.clone()) {
                    ids.push(holding.token_id);
                }
            }
        }

        info!(
            "Crawl from {} visited {} participants, found {} new tokens",
            seed,
            participants.len(),
            ids.len()
        );
        Ok(ids)
    }
}
