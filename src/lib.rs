//! MedChat - Medical chat assistant core
//!
//! A tool-calling agent loop over an OpenAI-compatible backend, with image
//! budgeting for user photos, Persian reply normalization and a
//! staleness-aware conversation summary cache.

pub mod agent;
pub mod config;
pub mod error;
pub mod media;
pub mod providers;
pub mod session;
pub mod store;
pub mod summary;
pub mod tools;
pub mod utils;

pub use agent::{Caps, Orchestrator, Reply, RespondRequest};
pub use config::Config;
pub use error::{MedchatError, ProviderError, Result};
pub use providers::{
    ChatCompletionsProvider, ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition,
    Usage,
};
pub use session::{Content, Message, Role, ToolCall};
pub use store::MemoryStore;
