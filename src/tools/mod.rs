//! Tools module - model-callable capabilities
//!
//! This module provides the infrastructure for defining and dispatching the
//! tools the model may call while answering, plus the built-in medical tools.
//!
//! # Overview
//!
//! - `Tool` trait: The interface that all tools must implement
//! - `ToolContext`: The acting user, active conversation and triggering message
//! - `ToolRegistry`: Registration, whitelisted schema listing and dispatch
//! - `ToolInvocation`: Audit record written after every dispatch
//!
//! # Built-in Tools
//!
//! - `triage_level`: keyword urgency assessment
//! - `get_patient_profile` / `update_patient_profile`: patient profile access
//! - `create_visit_from_summary`: books a paid visit from the conversation

pub mod profile;
mod registry;
pub mod triage;
mod types;
pub mod visit;

pub use registry::ToolRegistry;
pub use types::{Tool, ToolContext, ToolInvocation};

use std::sync::Arc;

use crate::config::ToolsConfig;
use crate::store::Store;

/// Tools available on the starter plan.
pub const STARTER_TOOLS: [&str; 3] = [
    "triage_level",
    "get_patient_profile",
    "update_patient_profile",
];

/// Build the registry of built-in tools, logging every call to `store`.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use medchat::config::ToolsConfig;
/// use medchat::store::MemoryStore;
/// use medchat::tools::builtin_registry;
///
/// let registry = builtin_registry(Arc::new(MemoryStore::new_memory()), &ToolsConfig::default());
/// assert_eq!(
///     registry.names(),
///     vec!["triage_level", "get_patient_profile", "update_patient_profile", "create_visit_from_summary"]
/// );
/// ```
pub fn builtin_registry<S: Store + 'static>(store: Arc<S>, config: &ToolsConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new().with_log(store.clone());
    registry.register(Box::new(triage::TriageTool));
    registry.register(Box::new(profile::GetPatientProfileTool::new(store.clone())));
    registry.register(Box::new(profile::UpdatePatientProfileTool::new(store.clone())));
    registry.register(Box::new(visit::CreateVisitTool::new(
        store.clone(),
        store.clone(),
        store,
        config,
    )));
    registry
}

/// Whitelist for the starter plan.
pub fn starter_whitelist() -> Vec<String> {
    STARTER_TOOLS.iter().map(|s| s.to_string()).collect()
}
