//! Summary records and their scope keys.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{ConversationId, TurnId, UserId};

/// What a summary covers: one conversation, or every conversation of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Scope {
    Global,
    Conversation(ConversationId),
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Conversation(id) => write!(f, "conversation:{}", id),
        }
    }
}

/// Unique key of a summary record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SummaryKey {
    pub user_id: UserId,
    pub scope: Scope,
}

impl SummaryKey {
    pub fn new(user_id: UserId, scope: Scope) -> Self {
        Self { user_id, scope }
    }
}

impl std::fmt::Display for SummaryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}/{}", self.user_id, self.scope)
    }
}

/// Structured extraction of a medical conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredDigest {
    pub history: String,
    pub symptoms: String,
    pub medications: String,
    pub recommendations: String,
}

impl StructuredDigest {
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
            && self.symptoms.is_empty()
            && self.medications.is_empty()
            && self.recommendations.is_empty()
    }
}

/// A cached digest of one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub id: u64,
    pub user_id: UserId,
    pub scope: Scope,
    /// Transcript the digest was built from
    pub raw_text: String,
    /// Model-rewritten digest
    pub rewritten_text: String,
    pub structured: StructuredDigest,
    /// Newest turn folded into this digest
    pub last_turn_id: Option<TurnId>,
    pub is_stale: bool,
    /// Soft lock held by the rebuild in flight
    pub in_progress: bool,
    pub updated_at: DateTime<Utc>,
}

impl SummaryRecord {
    /// A stale, empty record; the first read schedules its build.
    pub fn placeholder(id: u64, key: SummaryKey) -> Self {
        Self {
            id,
            user_id: key.user_id,
            scope: key.scope,
            raw_text: String::new(),
            rewritten_text: String::new(),
            structured: StructuredDigest::default(),
            last_turn_id: None,
            is_stale: true,
            in_progress: false,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> SummaryKey {
        SummaryKey::new(self.user_id, self.scope)
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.updated_at > ttl
    }

    /// Neither stale nor past `ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        !self.is_stale && !self.is_expired(ttl, now)
    }

    /// Best text for prompting: the rewritten digest, else the raw transcript.
    pub fn text(&self) -> &str {
        if self.rewritten_text.trim().is_empty() {
            &self.raw_text
        } else {
            &self.rewritten_text
        }
    }

    /// [`Self::text`] when it holds at least `min_chars` characters.
    pub fn note_text(&self, min_chars: usize) -> Option<&str> {
        let text = self.text().trim();
        (text.chars().count() >= min_chars && !text.is_empty()).then_some(text)
    }
}

/// Result of a rebuild, applied atomically by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryUpdate {
    pub raw_text: String,
    pub rewritten_text: String,
    pub structured: StructuredDigest,
    pub last_turn_id: Option<TurnId>,
}
