//! Staleness-aware summary cache.
//!
//! One record per conversation and one global record per user. A record is
//! served as-is while it is fresh; otherwise it is rebuilt under the store's
//! soft lock (`in_progress`), either inline or through a [`RebuildScheduler`].
//!
//! Rebuild protocol:
//! 1. claim the record (`try_claim_summary`); a lost claim is a no-op
//! 2. build the transcript and call the summarization model
//! 3. `complete_summary` on success, `release_summary` on every failure path

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::digest::{
    clip_digest, clip_transcript, extract_structured, serialize_transcript, summarizer_messages,
};
use super::types::{Scope, SummaryKey, SummaryRecord, SummaryUpdate};
use crate::config::SummaryConfig;
use crate::error::Result;
use crate::providers::{ChatOptions, LLMProvider};
use crate::session::{ConversationId, Turn, UserId};
use crate::store::{ConversationStore, Store, SummaryStore};
use crate::utils::backoff::backoff_delay;
use crate::utils::normalize::remove_repeated;

/// How a read reacts to a record that needs rebuilding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Return the last-known record and schedule a rebuild
    Background,
    /// Rebuild before returning
    Blocking,
}

/// Result of [`SummaryCache::rebuild`].
#[derive(Debug, Clone, PartialEq)]
pub enum RebuildOutcome {
    Rebuilt(SummaryRecord),
    /// Another rebuild holds the claim
    AlreadyRunning,
}

/// Fire-and-forget rebuild scheduling.
///
/// Implementations must never fail the caller; scheduling problems are logged.
pub trait RebuildScheduler: Send + Sync {
    fn schedule(&self, cache: SummaryCache, key: SummaryKey, delay: Duration);
}

// ============================================================================
// Summary Cache
// ============================================================================

#[derive(Clone)]
pub struct SummaryCache {
    summaries: Arc<dyn SummaryStore>,
    conversations: Arc<dyn ConversationStore>,
    provider: Arc<dyn LLMProvider>,
    config: Arc<SummaryConfig>,
    scheduler: Arc<dyn RebuildScheduler>,
}

impl SummaryCache {
    /// Create a cache that schedules rebuilds on the tokio runtime.
    pub fn new(
        summaries: Arc<dyn SummaryStore>,
        conversations: Arc<dyn ConversationStore>,
        provider: Arc<dyn LLMProvider>,
        config: SummaryConfig,
    ) -> Self {
        let scheduler = Arc::new(TokioScheduler::new(&config));
        Self {
            summaries,
            conversations,
            provider,
            config: Arc::new(config),
            scheduler,
        }
    }

    /// Create a cache backed by a single store implementing every collaborator.
    pub fn from_store<S: Store + 'static>(
        store: Arc<S>,
        provider: Arc<dyn LLMProvider>,
        config: SummaryConfig,
    ) -> Self {
        Self::new(store.clone(), store, provider, config)
    }

    /// Replace the rebuild scheduler.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn RebuildScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn config(&self) -> &SummaryConfig {
        &self.config
    }

    /// Time-to-live of a record in `scope`.
    pub fn ttl(&self, scope: Scope) -> chrono::Duration {
        match scope {
            Scope::Global => chrono::Duration::minutes(self.config.global_ttl_mins),
            Scope::Conversation(_) => chrono::Duration::minutes(self.config.conversation_ttl_mins),
        }
    }

    /// Read a summary, refreshing it if it is stale or expired.
    ///
    /// A fresh record is returned without touching the model. A record that
    /// is already being rebuilt is returned as-is in both modes.
    ///
    /// # Arguments
    /// * `user_id` - Owner of the summary
    /// * `scope` - One conversation, or the user's whole history
    /// * `mode` - Whether a needed rebuild runs inline or in the background
    pub async fn get_or_update(
        &self,
        user_id: UserId,
        scope: Scope,
        mode: RefreshMode,
    ) -> Result<SummaryRecord> {
        let key = SummaryKey::new(user_id, scope);
        let record = self.summaries.ensure_summary(key).await?;

        if record.is_fresh(self.ttl(scope), Utc::now()) {
            debug!(summary = %key, "Summary cache hit");
            return Ok(record);
        }
        if record.in_progress {
            debug!(summary = %key, "Summary rebuild already in progress");
            return Ok(record);
        }

        match mode {
            RefreshMode::Background => {
                self.scheduler.schedule(self.clone(), key, Duration::ZERO);
                Ok(record)
            }
            RefreshMode::Blocking => match self.rebuild(key).await? {
                RebuildOutcome::Rebuilt(rebuilt) => Ok(rebuilt),
                RebuildOutcome::AlreadyRunning => {
                    Ok(self.summaries.find_summary(key).await?.unwrap_or(record))
                }
            },
        }
    }

    /// Rebuild one record under the soft lock.
    ///
    /// The claim is always given back: on failure the record is left
    /// `in_progress = false, is_stale = true` and the error is returned.
    pub async fn rebuild(&self, key: SummaryKey) -> Result<RebuildOutcome> {
        if self.summaries.try_claim_summary(key).await?.is_none() {
            debug!(summary = %key, "Summary claim lost, skipping rebuild");
            return Ok(RebuildOutcome::AlreadyRunning);
        }

        let start = Instant::now();
        let result = match self.build_update(key).await {
            Ok(update) => self.summaries.complete_summary(key, update).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(record) => {
                info!(
                    summary = %key,
                    last_turn_id = ?record.last_turn_id,
                    stale = record.is_stale,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Summary rebuilt"
                );
                Ok(RebuildOutcome::Rebuilt(record))
            }
            Err(e) => {
                warn!(summary = %key, error = %e, "Summary rebuild failed");
                if let Err(release_err) = self.summaries.release_summary(key).await {
                    error!(summary = %key, error = %release_err, "Failed to release summary claim");
                }
                Err(e)
            }
        }
    }

    /// Hook for a freshly persisted exchange.
    ///
    /// Marks the conversation and global summaries stale and schedules both
    /// rebuilds with their configured delays. Never fails.
    pub async fn on_new_turns(&self, user_id: UserId, conversation_id: ConversationId) {
        let targets = [
            (
                SummaryKey::new(user_id, Scope::Conversation(conversation_id)),
                Duration::from_secs(self.config.conversation_rebuild_delay_secs),
            ),
            (
                SummaryKey::new(user_id, Scope::Global),
                Duration::from_secs(self.config.global_rebuild_delay_secs),
            ),
        ];
        for (key, delay) in targets {
            if let Err(e) = self.summaries.mark_summary_stale(key).await {
                warn!(summary = %key, error = %e, "Failed to mark summary stale");
            }
            self.scheduler.schedule(self.clone(), key, delay);
        }
    }

    /// Rebuild every open conversation summary of a user, then the global one.
    pub async fn rebuild_user(&self, user_id: UserId) -> Result<Vec<(SummaryKey, RebuildOutcome)>> {
        let mut outcomes = Vec::new();
        for conversation in self.conversations.conversations_for_user(user_id, None).await? {
            if !conversation.is_open {
                continue;
            }
            let key = SummaryKey::new(user_id, Scope::Conversation(conversation.id));
            outcomes.push((key, self.rebuild(key).await?));
        }
        let key = SummaryKey::new(user_id, Scope::Global);
        outcomes.push((key, self.rebuild(key).await?));
        Ok(outcomes)
    }

    /// [`Self::rebuild_user`] for every known user.
    ///
    /// A failing user is logged and skipped; the count of rebuilt records is returned.
    pub async fn rebuild_all(&self) -> Result<usize> {
        let mut rebuilt = 0;
        for user_id in self.conversations.users().await? {
            match self.rebuild_user(user_id).await {
                Ok(outcomes) => {
                    rebuilt += outcomes
                        .iter()
                        .filter(|(_, o)| matches!(o, RebuildOutcome::Rebuilt(_)))
                        .count();
                }
                Err(e) => warn!(user_id, error = %e, "Rebuild failed for user"),
            }
        }
        Ok(rebuilt)
    }

    /// Remove duplicate records, keeping the latest per key.
    pub async fn dedup(&self) -> Result<usize> {
        let removed = self.summaries.dedup_summaries().await?;
        if removed > 0 {
            info!(removed, "Removed duplicate summaries");
        }
        Ok(removed)
    }

    async fn build_update(&self, key: SummaryKey) -> Result<SummaryUpdate> {
        let turns = self.turns_in_scope(key).await?;
        let last_turn_id = turns.iter().map(|t| t.id).max();
        let transcript = clip_transcript(
            &serialize_transcript(&turns),
            self.config.max_transcript_chars,
        );

        if transcript.trim().is_empty() {
            debug!(summary = %key, "Nothing to summarize");
            return Ok(SummaryUpdate {
                last_turn_id,
                ..Default::default()
            });
        }

        let options = ChatOptions::new()
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature);
        let response = self
            .provider
            .chat(
                summarizer_messages(&transcript),
                vec![],
                Some(self.config.model.as_str()),
                options,
            )
            .await?;

        let rewritten = clip_digest(
            &remove_repeated(&response.content),
            self.config.max_transcript_chars,
        );
        let structured = if rewritten.is_empty() {
            extract_structured(&transcript)
        } else {
            extract_structured(&rewritten)
        };

        debug!(summary = %key, turns = turns.len(), chars = transcript.chars().count(), "Summary built");
        Ok(SummaryUpdate {
            raw_text: transcript,
            rewritten_text: rewritten,
            structured,
            last_turn_id,
        })
    }

    async fn turns_in_scope(&self, key: SummaryKey) -> Result<Vec<Turn>> {
        let limit = match (key.scope, self.config.global_conversation_limit) {
            (Scope::Global, Some(limit)) => limit,
            _ => return self.conversations.scope_turns(key.user_id, key.scope).await,
        };

        let mut conversations = self
            .conversations
            .conversations_for_user(key.user_id, Some(limit))
            .await?;
        conversations.reverse();

        let mut turns = Vec::new();
        for conversation in conversations {
            turns.extend(
                self.conversations
                    .scope_turns(key.user_id, Scope::Conversation(conversation.id))
                    .await?,
            );
        }
        Ok(turns)
    }
}

// ============================================================================
// Tokio Scheduler
// ============================================================================

/// Runs rebuilds as tokio tasks with exponential-backoff retries.
///
/// A key that is already waiting to run is not scheduled twice.
pub struct TokioScheduler {
    pending: Arc<Mutex<HashSet<SummaryKey>>>,
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl TokioScheduler {
    pub fn new(config: &SummaryConfig) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashSet::new())),
            max_retries: config.max_retries,
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
        }
    }

    /// Number of keys waiting for their delay to elapse.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl RebuildScheduler for TokioScheduler {
    fn schedule(&self, cache: SummaryCache, key: SummaryKey, delay: Duration) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(summary = %key, error = %e, "No runtime, summary rebuild not scheduled");
                return;
            }
        };

        if !self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key)
        {
            debug!(summary = %key, "Summary rebuild already scheduled");
            return;
        }

        let pending = Arc::clone(&self.pending);
        let max_retries = self.max_retries;
        let base_delay_ms = self.base_delay_ms;
        let max_delay_ms = self.max_delay_ms;

        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);

            let mut attempt = 0;
            loop {
                match cache.rebuild(key).await {
                    Ok(_) => return,
                    Err(e) if attempt < max_retries => {
                        let wait = backoff_delay(attempt, base_delay_ms, max_delay_ms);
                        warn!(
                            summary = %key,
                            attempt = attempt + 1,
                            wait_ms = wait.as_millis() as u64,
                            error = %e,
                            "Retrying summary rebuild"
                        );
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        error!(
                            component = "summary",
                            user_id = key.user_id,
                            scope = %key.scope,
                            error = %e,
                            "Summary rebuild gave up"
                        );
                        return;
                    }
                }
            }
        });
    }
}
