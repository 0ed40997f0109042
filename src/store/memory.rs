//! In-memory store with optional JSON snapshot persistence.
//!
//! All state sits behind one async mutex, so every trait method is a single
//! critical section. When a snapshot path is configured, each write is
//! applied to a copy, written to disk, and only then swapped in; a failed
//! write leaves the in-memory state untouched.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::traits::{
    BookingOutcome, ClinicStore, ConversationStore, SummaryStore, ToolLog, Visit, VisitRequest,
};
use crate::error::{MedchatError, Result};
use crate::session::{Content, Conversation, ConversationId, Role, Turn, TurnId, UserId};
use crate::summary::{Scope, SummaryKey, SummaryRecord, SummaryUpdate};
use crate::tools::ToolInvocation;

/// Oldest tool invocations are dropped past this many entries.
const TOOL_LOG_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct State {
    next_id: u64,
    conversations: BTreeMap<ConversationId, Conversation>,
    turns: Vec<Turn>,
    summaries: Vec<SummaryRecord>,
    tool_log: Vec<ToolInvocation>,
    wallets: BTreeMap<UserId, i64>,
    visits: Vec<Visit>,
    profiles: BTreeMap<UserId, Value>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn in_scope(turn: &Turn, user_id: UserId, scope: Scope) -> bool {
        turn.user_id == user_id
            && match scope {
                Scope::Global => true,
                Scope::Conversation(id) => turn.conversation_id == id,
            }
    }

    fn latest_turn_id(&self, key: SummaryKey) -> Option<TurnId> {
        self.turns
            .iter()
            .filter(|t| Self::in_scope(t, key.user_id, key.scope))
            .map(|t| t.id)
            .max()
    }

    /// Remove all but the most recently updated record of `key`.
    fn dedup_key(&mut self, key: SummaryKey) -> usize {
        let keep = self
            .summaries
            .iter()
            .filter(|s| s.key() == key)
            .max_by_key(|s| (s.updated_at, s.id))
            .map(|s| s.id);
        let Some(keep) = keep else {
            return 0;
        };
        let before = self.summaries.len();
        self.summaries.retain(|s| s.key() != key || s.id == keep);
        before - self.summaries.len()
    }

    fn summary_mut(&mut self, key: SummaryKey) -> Option<&mut SummaryRecord> {
        self.dedup_key(key);
        self.summaries.iter_mut().find(|s| s.key() == key)
    }

    fn ensure_summary(&mut self, key: SummaryKey) -> &mut SummaryRecord {
        self.dedup_key(key);
        match self.summaries.iter().position(|s| s.key() == key) {
            Some(index) => &mut self.summaries[index],
            None => {
                let id = self.next_id();
                self.summaries.push(SummaryRecord::placeholder(id, key));
                let last = self.summaries.len() - 1;
                &mut self.summaries[last]
            }
        }
    }

    fn push_turn(
        &mut self,
        conversation: &Conversation,
        role: Role,
        content: Content,
    ) -> Turn {
        let turn = Turn {
            id: self.next_id(),
            conversation_id: conversation.id,
            user_id: conversation.user_id,
            role,
            content,
            created_at: Utc::now(),
        };
        self.turns.push(turn.clone());
        turn
    }
}

/// Store backed by process memory, optionally mirrored to a JSON file.
pub struct MemoryStore {
    state: Mutex<State>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create a store that never touches the disk.
    pub fn new_memory() -> Self {
        Self {
            state: Mutex::new(State::default()),
            path: None,
        }
    }

    /// Open a store mirrored to `path`, loading the snapshot if it exists.
    ///
    /// Rebuild claims cannot outlive the process that held them, so any
    /// `in_progress` flag in the snapshot is released on load.
    pub async fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut state = if tokio::fs::try_exists(&path).await? {
            let content = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str::<State>(&content)?
        } else {
            State::default()
        };

        let mut released = 0;
        for record in state.summaries.iter_mut().filter(|s| s.in_progress) {
            record.in_progress = false;
            record.is_stale = true;
            released += 1;
        }
        info!(
            path = %path.display(),
            conversations = state.conversations.len(),
            turns = state.turns.len(),
            released_claims = released,
            "Store snapshot loaded"
        );

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply `f` atomically and persist the result.
    async fn commit<T: Send>(&self, f: impl FnOnce(&mut State) -> Result<T> + Send) -> Result<T> {
        let mut guard = self.state.lock().await;
        match &self.path {
            None => f(&mut guard),
            Some(path) => {
                let mut next = guard.clone();
                let out = f(&mut next)?;
                write_snapshot(path, &next).await?;
                *guard = next;
                Ok(out)
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new_memory()
    }
}

async fn write_snapshot(path: &Path, state: &State) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let content = serde_json::to_string(state)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), "Store snapshot written");
    Ok(())
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn open_conversation(&self, user_id: UserId, force_new: bool) -> Result<Conversation> {
        self.commit(move |state| {
            if force_new {
                for conv in state
                    .conversations
                    .values_mut()
                    .filter(|c| c.user_id == user_id && c.is_open)
                {
                    conv.close();
                }
            } else if let Some(open) = state
                .conversations
                .values()
                .filter(|c| c.user_id == user_id && c.is_open)
                .max_by_key(|c| c.id)
            {
                return Ok(open.clone());
            }

            let conv = Conversation::new(state.next_id(), user_id);
            state.conversations.insert(conv.id, conv.clone());
            Ok(conv)
        })
        .await
    }

    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        Ok(self.state.lock().await.conversations.get(&id).cloned())
    }

    async fn recent_turns(&self, conversation_id: ConversationId, limit: usize) -> Result<Vec<Turn>> {
        let state = self.state.lock().await;
        let turns: Vec<&Turn> = state
            .turns
            .iter()
            .filter(|t| t.conversation_id == conversation_id)
            .collect();
        let skip = turns.len().saturating_sub(limit);
        Ok(turns.into_iter().skip(skip).cloned().collect())
    }

    async fn scope_turns(&self, user_id: UserId, scope: Scope) -> Result<Vec<Turn>> {
        let state = self.state.lock().await;
        Ok(state
            .turns
            .iter()
            .filter(|t| State::in_scope(t, user_id, scope))
            .cloned()
            .collect())
    }

    async fn append_exchange(
        &self,
        conversation_id: ConversationId,
        user_content: Content,
        assistant_text: &str,
    ) -> Result<(Turn, Turn)> {
        let assistant_text = assistant_text.to_string();
        self.commit(move |state| {
            let conv = state
                .conversations
                .get(&conversation_id)
                .cloned()
                .ok_or_else(|| MedchatError::NotFound(format!("conversation {}", conversation_id)))?;
            let user = state.push_turn(&conv, Role::User, user_content);
            let assistant = state.push_turn(&conv, Role::Assistant, Content::Text(assistant_text));
            Ok((user, assistant))
        })
        .await
    }

    async fn conversations_for_user(
        &self,
        user_id: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<Conversation>> {
        let state = self.state.lock().await;
        Ok(state
            .conversations
            .values()
            .rev()
            .filter(|c| c.user_id == user_id)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn close_idle(
        &self,
        idle_for: Duration,
        dry_run: bool,
        user_id: Option<UserId>,
    ) -> Result<Vec<ConversationId>> {
        let cutoff = Utc::now() - idle_for;
        self.commit(move |state| {
            let idle: Vec<ConversationId> = state
                .conversations
                .values()
                .filter(|c| c.is_open && user_id.map_or(true, |u| c.user_id == u))
                .filter(|c| {
                    let last_activity = state
                        .turns
                        .iter()
                        .filter(|t| t.conversation_id == c.id)
                        .map(|t| t.created_at)
                        .max()
                        .unwrap_or(c.started_at);
                    last_activity < cutoff
                })
                .map(|c| c.id)
                .collect();

            if !dry_run {
                for id in &idle {
                    if let Some(conv) = state.conversations.get_mut(id) {
                        conv.close();
                    }
                }
            }
            Ok(idle)
        })
        .await
    }

    async fn users(&self) -> Result<Vec<UserId>> {
        let state = self.state.lock().await;
        let users: BTreeSet<UserId> = state.conversations.values().map(|c| c.user_id).collect();
        Ok(users.into_iter().collect())
    }
}

#[async_trait]
impl SummaryStore for MemoryStore {
    async fn find_summary(&self, key: SummaryKey) -> Result<Option<SummaryRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .summaries
            .iter()
            .filter(|s| s.key() == key)
            .max_by_key(|s| (s.updated_at, s.id))
            .cloned())
    }

    async fn ensure_summary(&self, key: SummaryKey) -> Result<SummaryRecord> {
        {
            let state = self.state.lock().await;
            let mut matching = state.summaries.iter().filter(|s| s.key() == key);
            if let (Some(record), None) = (matching.next(), matching.next()) {
                return Ok(record.clone());
            }
        }
        self.commit(move |state| Ok(state.ensure_summary(key).clone()))
            .await
    }

    async fn try_claim_summary(&self, key: SummaryKey) -> Result<Option<SummaryRecord>> {
        self.commit(move |state| {
            let record = state.ensure_summary(key);
            if record.in_progress {
                return Ok(None);
            }
            record.in_progress = true;
            Ok(Some(record.clone()))
        })
        .await
    }

    async fn complete_summary(&self, key: SummaryKey, update: SummaryUpdate) -> Result<SummaryRecord> {
        self.commit(move |state| {
            let latest = state.latest_turn_id(key);
            let record = state
                .summary_mut(key)
                .ok_or_else(|| MedchatError::NotFound(format!("summary {}", key)))?;
            record.raw_text = update.raw_text;
            record.rewritten_text = update.rewritten_text;
            record.structured = update.structured;
            record.last_turn_id = update.last_turn_id;
            record.is_stale = latest > update.last_turn_id;
            record.in_progress = false;
            record.updated_at = Utc::now();
            Ok(record.clone())
        })
        .await
    }

    async fn release_summary(&self, key: SummaryKey) -> Result<()> {
        self.commit(move |state| {
            if let Some(record) = state.summary_mut(key) {
                record.in_progress = false;
                record.is_stale = true;
            }
            Ok(())
        })
        .await
    }

    async fn mark_summary_stale(&self, key: SummaryKey) -> Result<()> {
        self.commit(move |state| {
            state.ensure_summary(key).is_stale = true;
            Ok(())
        })
        .await
    }

    async fn insert_summary(&self, mut record: SummaryRecord) -> Result<()> {
        self.commit(move |state| {
            record.id = state.next_id();
            state.summaries.push(record);
            Ok(())
        })
        .await
    }

    async fn summaries_for(&self, key: SummaryKey) -> Result<Vec<SummaryRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .summaries
            .iter()
            .filter(|s| s.key() == key)
            .cloned()
            .collect())
    }

    async fn dedup_summaries(&self) -> Result<usize> {
        self.commit(|state| {
            let mut seen = HashSet::new();
            let keys: Vec<SummaryKey> = state
                .summaries
                .iter()
                .map(SummaryRecord::key)
                .filter(|k| seen.insert(*k))
                .collect();
            Ok(keys.into_iter().map(|key| state.dedup_key(key)).sum())
        })
        .await
    }
}

#[async_trait]
impl ToolLog for MemoryStore {
    async fn record_tool_invocation(&self, invocation: ToolInvocation) -> Result<()> {
        self.commit(move |state| {
            state.tool_log.push(invocation);
            if state.tool_log.len() > TOOL_LOG_CAPACITY {
                let excess = state.tool_log.len() - TOOL_LOG_CAPACITY;
                state.tool_log.drain(..excess);
            }
            Ok(())
        })
        .await
    }

    async fn tool_invocations(&self, user_id: UserId) -> Result<Vec<ToolInvocation>> {
        let state = self.state.lock().await;
        Ok(state
            .tool_log
            .iter()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ClinicStore for MemoryStore {
    async fn balance(&self, user_id: UserId) -> Result<i64> {
        Ok(self
            .state
            .lock()
            .await
            .wallets
            .get(&user_id)
            .copied()
            .unwrap_or(0))
    }

    async fn credit(&self, user_id: UserId, amount: i64) -> Result<i64> {
        self.commit(move |state| {
            let balance = state.wallets.entry(user_id).or_insert(0);
            *balance += amount;
            Ok(*balance)
        })
        .await
    }

    async fn book_visit(&self, user_id: UserId, request: VisitRequest) -> Result<BookingOutcome> {
        self.commit(move |state| {
            let balance = state.wallets.get(&user_id).copied().unwrap_or(0);
            if balance < request.cost {
                return Ok(BookingOutcome::InsufficientFunds { balance });
            }

            let visit = Visit {
                id: state.next_id(),
                user_id,
                name: request.name,
                cost: request.cost,
                symptoms: request.symptoms,
                created_at: Utc::now(),
            };
            let remaining = balance - request.cost;
            state.wallets.insert(user_id, remaining);
            state.visits.push(visit.clone());
            Ok(BookingOutcome::Booked {
                visit,
                balance: remaining,
            })
        })
        .await
    }

    async fn visits(&self, user_id: UserId) -> Result<Vec<Visit>> {
        let state = self.state.lock().await;
        Ok(state
            .visits
            .iter()
            .filter(|v| v.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn patient_profile(&self, user_id: UserId) -> Result<Option<Value>> {
        Ok(self.state.lock().await.profiles.get(&user_id).cloned())
    }

    async fn update_patient_profile(&self, user_id: UserId, fields: Value) -> Result<Value> {
        self.commit(move |state| {
            let Value::Object(fields) = fields else {
                return Err(MedchatError::Storage(
                    "patient profile update must be a JSON object".to_string(),
                ));
            };
            let profile = state
                .profiles
                .entry(user_id)
                .or_insert_with(|| Value::Object(Default::default()));
            if let Value::Object(existing) = profile {
                existing.extend(fields);
            }
            Ok(profile.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolContext;
    use serde_json::json;

    fn key(user: UserId, scope: Scope) -> SummaryKey {
        SummaryKey::new(user, scope)
    }

    // ====================================================================
    // Conversations
    // ====================================================================

    #[tokio::test]
    async fn test_open_conversation_reuses_open_one() {
        let store = MemoryStore::new_memory();
        let a = store.open_conversation(1, false).await.unwrap();
        let b = store.open_conversation(1, false).await.unwrap();
        assert_eq!(a.id, b.id);

        let other_user = store.open_conversation(2, false).await.unwrap();
        assert_ne!(other_user.id, a.id);
    }

    #[tokio::test]
    async fn test_force_new_closes_previous() {
        let store = MemoryStore::new_memory();
        let first = store.open_conversation(1, false).await.unwrap();
        let second = store.open_conversation(1, true).await.unwrap();
        assert_ne!(first.id, second.id);

        let first = store.conversation(first.id).await.unwrap().unwrap();
        assert!(!first.is_open);
        assert!(first.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_append_exchange_keeps_order() {
        let store = MemoryStore::new_memory();
        let conv = store.open_conversation(1, false).await.unwrap();
        for i in 0..4 {
            store
                .append_exchange(conv.id, Content::from(format!("q{}", i).as_str()), &format!("a{}", i))
                .await
                .unwrap();
        }

        let recent = store.recent_turns(conv.id, 3).await.unwrap();
        let texts: Vec<String> = recent.iter().map(|t| t.content.text()).collect();
        assert_eq!(texts, vec!["a2", "q3", "a3"]);
        assert_eq!(recent[1].role, Role::User);
        assert!(recent.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn test_append_exchange_unknown_conversation() {
        let store = MemoryStore::new_memory();
        let err = store
            .append_exchange(99, Content::from("q"), "a")
            .await
            .unwrap_err();
        assert!(matches!(err, MedchatError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_scope_turns_global_spans_conversations() {
        let store = MemoryStore::new_memory();
        let c1 = store.open_conversation(1, false).await.unwrap();
        store.append_exchange(c1.id, Content::from("q1"), "a1").await.unwrap();
        let c2 = store.open_conversation(1, true).await.unwrap();
        store.append_exchange(c2.id, Content::from("q2"), "a2").await.unwrap();

        assert_eq!(store.scope_turns(1, Scope::Global).await.unwrap().len(), 4);
        assert_eq!(
            store.scope_turns(1, Scope::Conversation(c2.id)).await.unwrap().len(),
            2
        );
        assert!(store.scope_turns(2, Scope::Global).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_idle_dry_run() {
        let store = MemoryStore::new_memory();
        let conv = store.open_conversation(1, false).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let idle = store.close_idle(Duration::zero(), true, None).await.unwrap();
        assert_eq!(idle, vec![conv.id]);
        assert!(store.conversation(conv.id).await.unwrap().unwrap().is_open);

        let idle = store.close_idle(Duration::hours(12), false, None).await.unwrap();
        assert!(idle.is_empty());

        store.close_idle(Duration::zero(), false, Some(1)).await.unwrap();
        assert!(!store.conversation(conv.id).await.unwrap().unwrap().is_open);
    }

    // ====================================================================
    // Summaries
    // ====================================================================

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryStore::new_memory();
        let k = key(1, Scope::Global);
        assert!(store.try_claim_summary(k).await.unwrap().is_some());
        assert!(store.try_claim_summary(k).await.unwrap().is_none());

        store.release_summary(k).await.unwrap();
        let record = store.find_summary(k).await.unwrap().unwrap();
        assert!(!record.in_progress);
        assert!(record.is_stale);
        assert!(store.try_claim_summary(k).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_complete_stays_stale_when_turns_arrived() {
        let store = MemoryStore::new_memory();
        let conv = store.open_conversation(1, false).await.unwrap();
        let (_, first_reply) = store.append_exchange(conv.id, Content::from("q"), "a").await.unwrap();
        let k = key(1, Scope::Conversation(conv.id));

        store.try_claim_summary(k).await.unwrap();
        store.append_exchange(conv.id, Content::from("q2"), "a2").await.unwrap();
        let record = store
            .complete_summary(
                k,
                SummaryUpdate {
                    last_turn_id: Some(first_reply.id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(record.is_stale);
        assert!(!record.in_progress);
    }

    #[tokio::test]
    async fn test_dedup_keeps_latest() {
        let store = MemoryStore::new_memory();
        let k = key(3, Scope::Conversation(8));
        let mut older = SummaryRecord::placeholder(0, k);
        older.updated_at = Utc::now() - Duration::hours(1);
        older.raw_text = "old".into();
        let mut newer = SummaryRecord::placeholder(0, k);
        newer.raw_text = "new".into();
        store.insert_summary(newer).await.unwrap();
        store.insert_summary(older).await.unwrap();
        assert_eq!(store.summaries_for(k).await.unwrap().len(), 2);

        assert_eq!(store.dedup_summaries().await.unwrap(), 1);
        let left = store.summaries_for(k).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].raw_text, "new");
    }

    // ====================================================================
    // Clinic
    // ====================================================================

    #[tokio::test]
    async fn test_book_visit_debits_once() {
        let store = MemoryStore::new_memory();
        store.credit(1, 500_000).await.unwrap();
        let request = VisitRequest {
            name: "ویزیت آنلاین".into(),
            cost: 398_000,
            symptoms: BTreeMap::from([("general".to_string(), "fever".to_string())]),
        };

        let first = store.book_visit(1, request.clone()).await.unwrap();
        assert!(matches!(first, BookingOutcome::Booked { balance: 102_000, .. }));

        let second = store.book_visit(1, request).await.unwrap();
        assert_eq!(second, BookingOutcome::InsufficientFunds { balance: 102_000 });
        assert_eq!(store.visits(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_profile_merge() {
        let store = MemoryStore::new_memory();
        store.update_patient_profile(1, json!({"age": 40})).await.unwrap();
        let profile = store
            .update_patient_profile(1, json!({"allergies": ["penicillin"]}))
            .await
            .unwrap();
        assert_eq!(profile, json!({"age": 40, "allergies": ["penicillin"]}));
        assert!(store.update_patient_profile(1, json!(5)).await.is_err());
    }

    // ====================================================================
    // Persistence
    // ====================================================================

    #[tokio::test]
    async fn test_snapshot_round_trip_releases_claims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let k = key(1, Scope::Global);
        {
            let store = MemoryStore::with_path(&path).await.unwrap();
            let conv = store.open_conversation(1, false).await.unwrap();
            store.append_exchange(conv.id, Content::from("q"), "a").await.unwrap();
            store.credit(1, 10).await.unwrap();
            store.try_claim_summary(k).await.unwrap();
        }

        let store = MemoryStore::with_path(&path).await.unwrap();
        assert_eq!(store.scope_turns(1, Scope::Global).await.unwrap().len(), 2);
        assert_eq!(store.balance(1).await.unwrap(), 10);
        let record = store.find_summary(k).await.unwrap().unwrap();
        assert!(!record.in_progress);
        assert!(record.is_stale);
    }

    #[tokio::test]
    async fn test_ensure_existing_summary_skips_snapshot_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = MemoryStore::with_path(&path).await.unwrap();
        let k = key(1, Scope::Global);

        let created = store.ensure_summary(k).await.unwrap();
        assert!(path.exists());
        std::fs::remove_file(&path).unwrap();

        let again = store.ensure_summary(k).await.unwrap();
        assert_eq!(again.id, created.id);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_tool_log_drops_oldest_past_capacity() {
        let store = MemoryStore::new_memory();
        let ctx = ToolContext::new(1);
        for i in 0..TOOL_LOG_CAPACITY + 5 {
            store
                .record_tool_invocation(ToolInvocation::new(&ctx, "triage_level", json!({ "n": i }), json!({})))
                .await
                .unwrap();
        }

        let log = store.tool_invocations(1).await.unwrap();
        assert_eq!(log.len(), TOOL_LOG_CAPACITY);
        assert_eq!(log[0].arguments["n"], 5);
    }
}
