//! Tool registry for MedChat
//!
//! This module provides the `ToolRegistry` struct for registering tools,
//! exposing their schemas to the model and dispatching calls. Dispatch never
//! fails: unknown tools, handler errors and panics all become JSON error
//! results, and every call is written to the [`ToolLog`] before returning.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::providers::ToolDefinition;
use crate::store::ToolLog;

use super::{Tool, ToolContext, ToolInvocation};

/// A registry that holds tools in registration order.
///
/// Build it once at startup and share it read-only.
///
/// # Example
///
/// ```rust
/// use medchat::tools::ToolRegistry;
/// use medchat::tools::triage::TriageTool;
/// use medchat::tools::ToolContext;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let mut registry = ToolRegistry::new();
/// registry.register(Box::new(TriageTool));
/// assert!(registry.has("triage_level"));
///
/// let result = registry
///     .invoke("triage_level", json!({"symptoms": "تب بالا از دیشب"}), &ToolContext::new(1))
///     .await;
/// assert_eq!(result["triage"], "متوسط");
///
/// let missing = registry.invoke("nope", json!({}), &ToolContext::new(1)).await;
/// assert_eq!(missing["error"], "unknown_tool:nope");
/// # });
/// ```
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    order: Vec<String>,
    log: Option<Arc<dyn ToolLog>>,
}

impl ToolRegistry {
    /// Create a new empty registry without an audit log.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            log: None,
        }
    }

    /// Record every invocation in `log`.
    pub fn with_log(mut self, log: Arc<dyn ToolLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Register a tool. A tool with the same name is replaced in place.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        info!(tool = %name, "Registering tool");
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas exposed to the model.
    ///
    /// # Arguments
    /// * `whitelist` - `None` exposes every tool; `Some` exposes only the
    ///   named tools (an empty list exposes none). Unknown names are skipped.
    ///
    /// # Returns
    /// Definitions in registration order.
    pub fn definitions(&self, whitelist: Option<&[String]>) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter(|name| whitelist.map_or(true, |allowed| allowed.contains(name)))
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.parameters()))
            .collect()
    }

    /// Dispatch a call and return its JSON result.
    ///
    /// # Arguments
    /// * `name` - Tool name requested by the model
    /// * `args` - Parsed arguments
    /// * `ctx` - The acting user and active conversation
    ///
    /// # Returns
    /// The handler's result, `{"error": "unknown_tool:<name>"}` for an
    /// unregistered name, or `{"error": "tool_failed", "detail": ...}` when
    /// the handler fails or panics.
    pub async fn invoke(&self, name: &str, args: Value, ctx: &ToolContext) -> Value {
        let start = Instant::now();

        let result = match self.tools.get(name) {
            None => {
                warn!(tool = name, "Unknown tool requested");
                json!({ "error": format!("unknown_tool:{}", name) })
            }
            Some(tool) => {
                match AssertUnwindSafe(tool.execute(args.clone(), ctx))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(value)) => {
                        info!(
                            tool = name,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Tool executed successfully"
                        );
                        value
                    }
                    Ok(Err(e)) => {
                        error!(
                            tool = name,
                            error = %e,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Tool execution failed"
                        );
                        json!({ "error": "tool_failed", "detail": e.to_string() })
                    }
                    Err(panic) => {
                        let detail = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "panic".to_string());
                        error!(tool = name, detail = %detail, "Tool panicked");
                        json!({ "error": "tool_failed", "detail": detail })
                    }
                }
            }
        };

        if let Some(log) = &self.log {
            let invocation = ToolInvocation::new(ctx, name, args, result.clone());
            if let Err(e) = log.record_tool_invocation(invocation).await {
                warn!(tool = name, error = %e, "Failed to record tool invocation");
            }
        }

        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
