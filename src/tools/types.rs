//! Tool types for MedChat
//!
//! This module defines the `Tool` trait every model-callable capability
//! implements, the `ToolContext` handed to it, and the `ToolInvocation`
//! audit record written after every dispatch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::session::{ConversationId, UserId};

/// Trait that all tools must implement.
///
/// Tools are named, schema-described functions the model may call mid
/// conversation. They return a JSON value that is fed back to the model
/// verbatim as the tool result.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
/// use medchat::tools::{Tool, ToolContext};
/// use medchat::error::Result;
///
/// struct Echo;
///
/// #[async_trait]
/// impl Tool for Echo {
///     fn name(&self) -> &str { "echo" }
///     fn description(&self) -> &str { "Returns its arguments" }
///     fn parameters(&self) -> Value {
///         json!({"type": "object", "properties": {}})
///     }
///     async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
///         Ok(args)
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to call the tool.
    fn name(&self) -> &str;

    /// Description sent to the model alongside the schema.
    fn description(&self) -> &str;

    /// JSON schema of the accepted arguments.
    fn parameters(&self) -> Value;

    /// Execute the tool.
    ///
    /// # Arguments
    /// * `args` - Parsed arguments supplied by the model (an object, possibly empty)
    /// * `ctx` - The acting user and active conversation
    ///
    /// # Returns
    /// A JSON-serializable result. Errors are converted by the registry into
    /// an `{"error": "tool_failed", "detail": ...}` result.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Context provided to tools during execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolContext {
    /// The acting user
    pub user_id: UserId,
    /// The active conversation, if one is open
    pub conversation_id: Option<ConversationId>,
    /// Text of the user message that led to the call
    pub user_message: String,
}

impl ToolContext {
    /// Create a context for `user_id`.
    ///
    /// # Example
    /// ```
    /// use medchat::tools::ToolContext;
    ///
    /// let ctx = ToolContext::new(7).with_conversation(3);
    /// assert_eq!(ctx.user_id, 7);
    /// assert_eq!(ctx.conversation_id, Some(3));
    /// ```
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }

    pub fn with_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn with_user_message(mut self, message: &str) -> Self {
        self.user_message = message.to_string();
        self
    }
}

/// Audit record of one tool dispatch. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub user_id: UserId,
    pub conversation_id: Option<ConversationId>,
    pub tool: String,
    pub arguments: Value,
    pub result: Value,
    pub created_at: DateTime<Utc>,
}

impl ToolInvocation {
    pub fn new(ctx: &ToolContext, tool: &str, arguments: Value, result: Value) -> Self {
        Self {
            user_id: ctx.user_id,
            conversation_id: ctx.conversation_id,
            tool: tool.to_string(),
            arguments,
            result,
            created_at: Utc::now(),
        }
    }

    /// `true` when the result carries an `error` key.
    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_context_builder_chain() {
        let ctx = ToolContext::new(42)
            .with_conversation(9)
            .with_user_message("سرفه دارم");
        assert_eq!(ctx.user_id, 42);
        assert_eq!(ctx.conversation_id, Some(9));
        assert_eq!(ctx.user_message, "سرفه دارم");
    }

    #[test]
    fn test_invocation_error_detection() {
        let ctx = ToolContext::new(1);
        let ok = ToolInvocation::new(&ctx, "triage_level", json!({}), json!({"triage": "کم"}));
        let failed = ToolInvocation::new(&ctx, "nope", json!({}), json!({"error": "unknown_tool:nope"}));
        assert!(!ok.is_error());
        assert!(failed.is_error());
        assert_eq!(failed.conversation_id, None);
    }
}
