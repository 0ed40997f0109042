//! Patient profile tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{Tool, ToolContext};
use crate::error::{MedchatError, Result};
use crate::store::ClinicStore;

/// Fields a profile may carry.
const PROFILE_FIELDS: &[&str] = &["age", "sex", "allergies", "conditions"];

fn empty_profile() -> Map<String, Value> {
    let mut profile = Map::new();
    profile.insert("age".into(), Value::Null);
    profile.insert("sex".into(), Value::Null);
    profile.insert("allergies".into(), json!([]));
    profile.insert("conditions".into(), json!([]));
    profile
}

/// `get_patient_profile`: the stored profile over empty defaults.
pub struct GetPatientProfileTool {
    clinic: Arc<dyn ClinicStore>,
}

impl GetPatientProfileTool {
    pub fn new(clinic: Arc<dyn ClinicStore>) -> Self {
        Self { clinic }
    }
}

#[async_trait]
impl Tool for GetPatientProfileTool {
    fn name(&self) -> &str {
        "get_patient_profile"
    }

    fn description(&self) -> &str {
        "دریافت پروفایل مختصر بیمار (سن/جنس/حساسیت/بیماری‌ها)."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<Value> {
        let mut profile = empty_profile();
        if let Some(Value::Object(stored)) = self.clinic.patient_profile(ctx.user_id).await? {
            profile.extend(stored);
        }
        Ok(Value::Object(profile))
    }
}

/// `update_patient_profile`: merges the known fields into the stored profile.
pub struct UpdatePatientProfileTool {
    clinic: Arc<dyn ClinicStore>,
}

impl UpdatePatientProfileTool {
    pub fn new(clinic: Arc<dyn ClinicStore>) -> Self {
        Self { clinic }
    }
}

#[async_trait]
impl Tool for UpdatePatientProfileTool {
    fn name(&self) -> &str {
        "update_patient_profile"
    }

    fn description(&self) -> &str {
        "به‌روزرسانی پروفایل بیمار."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "age": {"type": "integer"},
                "sex": {"type": "string"},
                "allergies": {"type": "array", "items": {"type": "string"}},
                "conditions": {"type": "array", "items": {"type": "string"}}
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value> {
        let Value::Object(fields) = args else {
            return Err(MedchatError::Tool("arguments must be an object".into()));
        };
        let saved: Map<String, Value> = fields
            .into_iter()
            .filter(|(key, _)| PROFILE_FIELDS.contains(&key.as_str()))
            .collect();

        self.clinic
            .update_patient_profile(ctx.user_id, Value::Object(saved.clone()))
            .await?;
        Ok(json!({ "ok": true, "saved": saved }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_profile_defaults() {
        let store = Arc::new(MemoryStore::new_memory());
        let tool = GetPatientProfileTool::new(store);
        let profile = tool.execute(json!({}), &ToolContext::new(3)).await.unwrap();
        assert_eq!(
            profile,
            json!({"age": null, "sex": null, "allergies": [], "conditions": []})
        );
    }

    #[tokio::test]
    async fn test_update_then_get() {
        let store = Arc::new(MemoryStore::new_memory());
        let update = UpdatePatientProfileTool::new(store.clone());
        let get = GetPatientProfileTool::new(store);
        let ctx = ToolContext::new(3);

        let result = update
            .execute(json!({"age": 34, "allergies": ["پنی‌سیلین"], "mood": "خوب"}), &ctx)
            .await
            .unwrap();
        assert_eq!(
            result,
            json!({"ok": true, "saved": {"age": 34, "allergies": ["پنی‌سیلین"]}})
        );

        let profile = get.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(profile["age"], 34);
        assert_eq!(profile["allergies"], json!(["پنی‌سیلین"]));
        assert_eq!(profile["sex"], Value::Null);
        assert!(profile.get("mood").is_none());
    }
}
