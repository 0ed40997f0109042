//! Session module - conversations, turns and prompt messages
//!
//! Persistence of these types lives behind the traits in [`crate::store`];
//! this module only defines the data model shared by the orchestrator, the
//! summary cache and the tools.

pub mod types;

pub use types::{
    Content, ContentPart, Conversation, ConversationId, ImageUrl, Message, Role, ToolCall, Turn,
    TurnId, UserId,
};
