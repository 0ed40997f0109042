//! Agent module - Request orchestration for the medical assistant
//!
//! This module turns one user message into one reply. The orchestrator is
//! responsible for:
//!
//! - Opening or reusing the user's conversation
//! - Building the prompt from history, summary notes and the specialty note
//! - Budgeting attached images and downgrading them when a send fails
//! - Running the bounded tool-calling loop against the model backend
//! - Normalizing, persisting and returning the answer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │   Request   │────>│ Orchestrator │────>│ LLMProvider │
//! │ (+ images)  │     │              │     │ (transport) │
//! └─────────────┘     └──────────────┘     └─────────────┘
//!                        │        │               │
//!                        ▼        ▼               ▼
//!               ┌──────────┐ ┌──────────┐  ┌─────────────┐
//!               │  Store   │ │ Summary  │  │    Tools    │
//!               │          │ │  Cache   │  │  Registry   │
//!               └──────────┘ └──────────┘  └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use medchat::agent::{Orchestrator, RespondRequest};
//! use medchat::config::Config;
//! use medchat::providers::ChatCompletionsProvider;
//! use medchat::store::MemoryStore;
//!
//! async fn answer(config: Config) {
//!     let provider = Arc::new(ChatCompletionsProvider::from_config(&config.backend));
//!     let store = Arc::new(MemoryStore::new_memory());
//!     let orchestrator = Orchestrator::from_store(store, provider, &config);
//!
//!     let reply = orchestrator
//!         .respond(RespondRequest::new(42).with_message("دو روز است تب دارم"))
//!         .await;
//!     println!("{}", reply.answer);
//! }
//! ```

pub mod caps;
mod context;
pub mod orchestrator;
pub mod replies;

pub use caps::{Caps, Plan};
pub use context::ContextBuilder;
pub use orchestrator::{Orchestrator, Reply, RespondRequest};
