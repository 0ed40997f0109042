//! Providers module - chat-completions backends
//!
//! This module defines the `LLMProvider` trait and its OpenAI-compatible
//! implementation, which sends every request through the two-attempt
//! [`ResilientTransport`].
//!
//! # Example
//!
//! ```rust,ignore
//! use medchat::config::Config;
//! use medchat::providers::{ChatCompletionsProvider, ChatOptions, LLMProvider};
//! use medchat::session::Message;
//!
//! async fn example(config: &Config) {
//!     let provider = ChatCompletionsProvider::from_config(&config.backend);
//!     let messages = vec![Message::user("سردرد دارم")];
//!     let options = ChatOptions::new().with_max_tokens(1500);
//!
//!     let response = provider.chat(messages, vec![], None, options).await.unwrap();
//!     println!("Response: {}", response.content);
//! }
//! ```

pub mod openai;
pub mod transport;
mod types;

pub use openai::ChatCompletionsProvider;
pub use transport::{ResilientTransport, TransportConfig};
pub use types::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage};
