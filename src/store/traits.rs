//! Storage collaborator traits.
//!
//! The assistant core never talks to a database directly. Conversations,
//! summaries, the tool audit log and the clinic ledger are reached through
//! these traits, and each method is one transactional unit.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::session::{Content, Conversation, ConversationId, Turn, UserId};
use crate::summary::{Scope, SummaryKey, SummaryRecord, SummaryUpdate};
use crate::tools::ToolInvocation;

/// Conversations and their turns.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Return the user's open conversation, or open one.
    ///
    /// With `force_new`, every open conversation of the user is closed first.
    async fn open_conversation(&self, user_id: UserId, force_new: bool) -> Result<Conversation>;

    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>>;

    /// Last `limit` turns of a conversation, oldest first.
    async fn recent_turns(&self, conversation_id: ConversationId, limit: usize) -> Result<Vec<Turn>>;

    /// Every turn in `scope` for `user_id`, oldest first.
    async fn scope_turns(&self, user_id: UserId, scope: Scope) -> Result<Vec<Turn>>;

    /// Append a user turn and its reply as one unit.
    ///
    /// Readers either see both turns or neither.
    async fn append_exchange(
        &self,
        conversation_id: ConversationId,
        user_content: Content,
        assistant_text: &str,
    ) -> Result<(Turn, Turn)>;

    /// A user's conversations, newest first.
    async fn conversations_for_user(
        &self,
        user_id: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<Conversation>>;

    /// Close open conversations whose last activity is older than `idle_for`.
    ///
    /// Returns the affected ids; with `dry_run` nothing is changed.
    async fn close_idle(
        &self,
        idle_for: Duration,
        dry_run: bool,
        user_id: Option<UserId>,
    ) -> Result<Vec<ConversationId>>;

    /// Users that own at least one conversation.
    async fn users(&self) -> Result<Vec<UserId>>;
}

/// Summary records, unique per (user, scope).
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Look up the record for `key` without creating it.
    async fn find_summary(&self, key: SummaryKey) -> Result<Option<SummaryRecord>>;

    /// Look up the record for `key`, creating a stale placeholder if missing.
    ///
    /// Duplicates found on the way are removed first.
    async fn ensure_summary(&self, key: SummaryKey) -> Result<SummaryRecord>;

    /// Atomically set `in_progress` unless it is already set.
    ///
    /// Returns the claimed record, or `None` when another rebuild holds it.
    async fn try_claim_summary(&self, key: SummaryKey) -> Result<Option<SummaryRecord>>;

    /// Store a finished rebuild and drop the claim.
    ///
    /// The record stays stale when turns newer than `update.last_turn_id`
    /// arrived while the rebuild ran.
    async fn complete_summary(&self, key: SummaryKey, update: SummaryUpdate) -> Result<SummaryRecord>;

    /// Drop the claim after a failed rebuild, leaving the record stale.
    async fn release_summary(&self, key: SummaryKey) -> Result<()>;

    /// Flag a record stale, creating a stale placeholder if none exists.
    async fn mark_summary_stale(&self, key: SummaryKey) -> Result<()>;

    /// Insert a record as-is, without the uniqueness check.
    async fn insert_summary(&self, record: SummaryRecord) -> Result<()>;

    /// All records stored for `key` (more than one only after a race).
    async fn summaries_for(&self, key: SummaryKey) -> Result<Vec<SummaryRecord>>;

    /// Keep only the most recently updated record of every key.
    ///
    /// Returns the number of records removed.
    async fn dedup_summaries(&self) -> Result<usize>;
}

/// Append-only audit log of tool dispatches.
#[async_trait]
pub trait ToolLog: Send + Sync {
    async fn record_tool_invocation(&self, invocation: ToolInvocation) -> Result<()>;

    async fn tool_invocations(&self, user_id: UserId) -> Result<Vec<ToolInvocation>>;
}

/// A booked visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub id: u64,
    pub user_id: UserId,
    pub name: String,
    pub cost: i64,
    /// Symptom category (`general`, `respiratory`, ...) to symptom code
    pub symptoms: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Request to book a visit and pay for it.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitRequest {
    pub name: String,
    pub cost: i64,
    pub symptoms: BTreeMap<String, String>,
}

/// Outcome of [`ClinicStore::book_visit`].
#[derive(Debug, Clone, PartialEq)]
pub enum BookingOutcome {
    Booked { visit: Visit, balance: i64 },
    InsufficientFunds { balance: i64 },
}

/// Wallet balances, visits and patient profiles.
#[async_trait]
pub trait ClinicStore: Send + Sync {
    async fn balance(&self, user_id: UserId) -> Result<i64>;

    /// Add `amount` to the wallet and return the new balance.
    async fn credit(&self, user_id: UserId, amount: i64) -> Result<i64>;

    /// Debit the visit cost and create the visit in one step.
    ///
    /// Nothing changes when the balance does not cover the cost.
    async fn book_visit(&self, user_id: UserId, request: VisitRequest) -> Result<BookingOutcome>;

    async fn visits(&self, user_id: UserId) -> Result<Vec<Visit>>;

    async fn patient_profile(&self, user_id: UserId) -> Result<Option<Value>>;

    /// Merge `fields` into the stored profile and return the result.
    async fn update_patient_profile(&self, user_id: UserId, fields: Value) -> Result<Value>;
}

/// Every collaborator the assistant needs, behind one object.
pub trait Store: ConversationStore + SummaryStore + ToolLog + ClinicStore {}

impl<T> Store for T where T: ConversationStore + SummaryStore + ToolLog + ClinicStore {}
