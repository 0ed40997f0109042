//! Visit booking from the conversation summary.
//!
//! `create_visit_from_summary` reads what is known about the conversation,
//! maps symptom keywords to intake categories, then debits the wallet and
//! creates the visit. Calls for the same user are serialized so two
//! concurrent bookings cannot both pass the balance check.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::info;

use super::{Tool, ToolContext};
use crate::config::ToolsConfig;
use crate::error::{MedchatError, Result};
use crate::session::{Role, UserId};
use crate::store::{BookingOutcome, ClinicStore, ConversationStore, SummaryStore, VisitRequest};
use crate::summary::{Scope, SummaryKey};

/// Intake categories and their `(keyword, code)` pairs, most specific first.
const SYMPTOM_CATEGORIES: &[(&str, &[(&str, &str)])] = &[
    (
        "general",
        &[
            ("تب", "fever"),
            ("خستگی", "fatigue"),
            ("ضعف", "fatigue"),
            ("کاهش وزن", "weight_loss"),
            ("درد", "general_pain"),
        ],
    ),
    (
        "neurological",
        &[("سردرد", "headache"), ("سرگیجه", "dizziness"), ("تشنج", "seizures")],
    ),
    (
        "cardiovascular",
        &[("درد قفسه سینه", "chest_pain"), ("تپش قلب", "palpitations")],
    ),
    (
        "gastrointestinal",
        &[("تهوع", "nausea"), ("استفراغ", "vomiting"), ("اسهال", "diarrhea")],
    ),
    (
        "respiratory",
        &[
            ("سرفه", "cough"),
            ("گلودرد", "sore_throat"),
            ("گلو درد", "sore_throat"),
            ("تنگی نفس", "shortness_of_breath"),
        ],
    ),
];

/// Pain phrases owned by a specific category; removed before matching bare "درد".
const SPECIFIC_PAIN: &[&str] = &["درد قفسه سینه", "سردرد", "گلودرد", "گلو درد"];

/// Map free text to one symptom code per category.
///
/// # Example
/// ```
/// use medchat::tools::visit::map_symptoms;
///
/// let symptoms = map_symptoms("شرح حال: تب و سرفه و گلودرد");
/// assert_eq!(symptoms["general"], "fever");
/// assert_eq!(symptoms["respiratory"], "cough");
/// ```
pub fn map_symptoms(text: &str) -> BTreeMap<String, String> {
    let generic = SPECIFIC_PAIN
        .iter()
        .fold(text.to_string(), |acc, phrase| acc.replace(phrase, " "));

    SYMPTOM_CATEGORIES
        .iter()
        .filter_map(|(category, keywords)| {
            keywords
                .iter()
                .find(|(keyword, code)| {
                    if *code == "general_pain" {
                        generic.contains(keyword)
                    } else {
                        text.contains(keyword)
                    }
                })
                .map(|(_, code)| (category.to_string(), code.to_string()))
        })
        .collect()
}

/// `create_visit_from_summary(name?, max_cost?)`.
pub struct CreateVisitTool {
    clinic: Arc<dyn ClinicStore>,
    conversations: Arc<dyn ConversationStore>,
    summaries: Arc<dyn SummaryStore>,
    cost: i64,
    default_name: String,
    user_locks: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl CreateVisitTool {
    pub fn new(
        clinic: Arc<dyn ClinicStore>,
        conversations: Arc<dyn ConversationStore>,
        summaries: Arc<dyn SummaryStore>,
        config: &ToolsConfig,
    ) -> Self {
        Self {
            clinic,
            conversations,
            summaries,
            cost: config.visit_cost,
            default_name: config.default_visit_name.clone(),
            user_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the user's lock entry once no request holds or awaits it.
    async fn release_user_lock(&self, user_id: UserId) {
        let mut locks = self.user_locks.lock().await;
        if locks.get(&user_id).map_or(false, |l| Arc::strong_count(l) == 1) {
            locks.remove(&user_id);
        }
    }

    async fn book(&self, name: String, max_cost: i64, ctx: &ToolContext) -> Result<Value> {
        let balance = self.clinic.balance(ctx.user_id).await?;
        if balance < max_cost {
            return Ok(json!({
                "ok": false,
                "error": "insufficient_funds",
                "balance": balance,
                "needed": max_cost
            }));
        }

        let symptoms = map_symptoms(&self.symptom_text(ctx).await?);
        let request = VisitRequest {
            name,
            cost: self.cost,
            symptoms,
        };

        match self.clinic.book_visit(ctx.user_id, request).await? {
            BookingOutcome::Booked { visit, balance } => {
                info!(user_id = ctx.user_id, visit_id = visit.id, balance, "Visit booked");
                Ok(json!({
                    "ok": true,
                    "visit_id": visit.id,
                    "cost_deducted": visit.cost
                }))
            }
            BookingOutcome::InsufficientFunds { balance } => Ok(json!({
                "ok": false,
                "error": "insufficient_funds",
                "balance": balance,
                "needed": self.cost
            })),
        }
    }

    /// Summary text, else the user's own turns, plus the triggering message.
    async fn symptom_text(&self, ctx: &ToolContext) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(conversation_id) = ctx.conversation_id {
            let key = SummaryKey::new(ctx.user_id, Scope::Conversation(conversation_id));
            let summary = self
                .summaries
                .find_summary(key)
                .await?
                .map(|s| s.text().trim().to_string())
                .filter(|t| !t.is_empty());

            match summary {
                Some(text) => parts.push(text),
                None => {
                    let turns = self
                        .conversations
                        .scope_turns(ctx.user_id, Scope::Conversation(conversation_id))
                        .await?;
                    parts.extend(
                        turns
                            .iter()
                            .filter(|t| t.role == Role::User)
                            .map(|t| t.content.text()),
                    );
                }
            }
        }
        parts.push(ctx.user_message.clone());
        Ok(parts.join("\n"))
    }
}

#[async_trait]
impl Tool for CreateVisitTool {
    fn name(&self) -> &str {
        "create_visit_from_summary"
    }

    fn description(&self) -> &str {
        "ایجاد ویزیت بر اساس خلاصهٔ گفتگو و کسر هزینه از کیف پول."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "max_cost": {"type": "integer"}
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.default_name.as_str())
            .to_string();
        let max_cost = match args.get("max_cost") {
            None | Some(Value::Null) => self.cost,
            Some(v) => v
                .as_i64()
                .ok_or_else(|| MedchatError::Tool(format!("invalid max_cost: {}", v)))?,
        };

        let lock = self.user_lock(ctx.user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.book(name, max_cost, ctx).await
        };
        drop(lock);
        self.release_user_lock(ctx.user_id).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Content;
    use crate::store::MemoryStore;
    use crate::summary::SummaryUpdate;

    fn tool(store: &Arc<MemoryStore>) -> CreateVisitTool {
        CreateVisitTool::new(
            store.clone(),
            store.clone(),
            store.clone(),
            &ToolsConfig::default(),
        )
    }

    #[test]
    fn test_map_symptoms_categories() {
        let symptoms = map_symptoms("سردرد و تهوع و درد قفسه سینه");
        assert_eq!(symptoms["neurological"], "headache");
        assert_eq!(symptoms["gastrointestinal"], "nausea");
        assert_eq!(symptoms["cardiovascular"], "chest_pain");
        assert!(!symptoms.contains_key("general"));
        assert!(!symptoms.contains_key("respiratory"));
    }

    #[test]
    fn test_generic_pain_only_when_unowned() {
        assert_eq!(map_symptoms("درد زانو")["general"], "general_pain");
        assert!(map_symptoms("گلو درد").get("general").is_none());
        assert_eq!(map_symptoms("گلو درد")["respiratory"], "sore_throat");
    }

    #[tokio::test]
    async fn test_books_from_summary() {
        let store = Arc::new(MemoryStore::new_memory());
        store.credit(5, 500_000).await.unwrap();
        let conversation = store.open_conversation(5, false).await.unwrap();
        store
            .append_exchange(conversation.id, Content::from("بیمار 30 ساله با تب، سرفه و گلودرد"), "...")
            .await
            .unwrap();

        let key = SummaryKey::new(5, Scope::Conversation(conversation.id));
        store.try_claim_summary(key).await.unwrap();
        store
            .complete_summary(
                key,
                SummaryUpdate {
                    rewritten_text: "شرح حال: تب و سرفه و گلودرد".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let ctx = ToolContext::new(5).with_conversation(conversation.id);
        let result = tool(&store)
            .execute(json!({"name": "ویزیت تستی", "max_cost": 398000}), &ctx)
            .await
            .unwrap();

        assert_eq!(result["ok"], true);
        assert_eq!(result["cost_deducted"], 398_000);
        let visits = store.visits(5).await.unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].id, result["visit_id"].as_u64().unwrap());
        assert_eq!(visits[0].name, "ویزیت تستی");
        assert_eq!(visits[0].symptoms["general"], "fever");
        assert_eq!(visits[0].symptoms["respiratory"], "cough");
        assert_eq!(store.balance(5).await.unwrap(), 500_000 - 398_000);
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_balance() {
        let store = Arc::new(MemoryStore::new_memory());
        store.credit(6, 100_000).await.unwrap();

        let result = tool(&store)
            .execute(json!({"name": "ویزیت"}), &ToolContext::new(6).with_user_message("تهوع و اسهال"))
            .await
            .unwrap();

        assert_eq!(
            result,
            json!({"ok": false, "error": "insufficient_funds", "balance": 100_000, "needed": 398_000})
        );
        assert_eq!(store.balance(6).await.unwrap(), 100_000);
        assert!(store.visits(6).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_bookings_debit_once() {
        let store = Arc::new(MemoryStore::new_memory());
        store.credit(8, 500_000).await.unwrap();
        let tool = tool(&store);
        let ctx = ToolContext::new(8).with_user_message("تب");

        let (a, b) = tokio::join!(tool.execute(json!({}), &ctx), tool.execute(json!({}), &ctx));
        let oks = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|r| r["ok"] == true)
            .count();
        assert_eq!(oks, 1);
        assert_eq!(store.balance(8).await.unwrap(), 102_000);
        assert!(tool.user_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_max_cost_is_error() {
        let store = Arc::new(MemoryStore::new_memory());
        let err = tool(&store)
            .execute(json!({"max_cost": "زیاد"}), &ToolContext::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MedchatError::Tool(_)));
    }
}
