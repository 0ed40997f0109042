//! Symptom urgency triage.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolContext};
use crate::error::Result;

/// Phrases that make a report urgent.
const HIGH_URGENCY: &[&str] = &[
    "درد قفسه سینه",
    "تنگی نفس",
    "بی‌حسی نیمه بدن",
    "کاهش هوشیاری",
    "خونریزی شدید",
];

const MEDIUM_URGENCY: &[&str] = &["تب بالا", "تهوع مداوم", "سردرد شدید", "درد مداوم"];

/// Urgency level of a free-text symptom report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Urgency {
    /// Classify by keyword; high-urgency phrases win over medium ones.
    pub fn assess(symptoms: &str) -> Self {
        let text = symptoms.to_lowercase();
        if HIGH_URGENCY.iter().any(|k| text.contains(k)) {
            Urgency::High
        } else if MEDIUM_URGENCY.iter().any(|k| text.contains(k)) {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    }

    /// Persian label sent back to the model.
    pub fn label(&self) -> &'static str {
        match self {
            Urgency::Low => "کم",
            Urgency::Medium => "متوسط",
            Urgency::High => "زیاد",
        }
    }
}

/// `triage_level`: returns `{"triage": "کم" | "متوسط" | "زیاد"}`.
pub struct TriageTool;

#[async_trait]
impl Tool for TriageTool {
    fn name(&self) -> &str {
        "triage_level"
    }

    fn description(&self) -> &str {
        "ارزیابی سطح فوریت علائم بیمار (کم/متوسط/زیاد)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"symptoms": {"type": "string"}},
            "required": ["symptoms"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
        let symptoms = args.get("symptoms").and_then(Value::as_str).unwrap_or("");
        Ok(json!({ "triage": Urgency::assess(symptoms).label() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assess_levels() {
        assert_eq!(Urgency::assess("درد قفسه سینه از صبح"), Urgency::High);
        assert_eq!(Urgency::assess("تب بالا و لرز"), Urgency::Medium);
        assert_eq!(Urgency::assess("آبریزش بینی"), Urgency::Low);
        assert_eq!(Urgency::assess("سردرد شدید و تنگی نفس"), Urgency::High);
    }

    #[tokio::test]
    async fn test_missing_symptoms_is_low() {
        let result = TriageTool.execute(json!({}), &ToolContext::new(1)).await.unwrap();
        assert_eq!(result, json!({"triage": "کم"}));
    }
}
