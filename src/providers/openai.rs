//! Chat-completions provider
//!
//! Implements `LLMProvider` for OpenAI-compatible `/chat/completions`
//! endpoints on top of [`ResilientTransport`]: message and tool conversion
//! to the wire format, and lenient extraction of the assistant reply.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use medchat::providers::{ChatCompletionsProvider, ChatOptions, LLMProvider, ResilientTransport};
//! use medchat::session::Message;
//!
//! async fn example(transport: Arc<ResilientTransport>) {
//!     let provider = ChatCompletionsProvider::new("sk-xxx", transport);
//!     let response = provider
//!         .chat(vec![Message::user("سلام")], vec![], None, ChatOptions::default())
//!         .await
//!         .unwrap();
//!     println!("{}", response.content);
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{BackendConfig, DEFAULT_API_BASE};
use crate::error::{MedchatError, ProviderError, Result};
use crate::session::{Content, Message};

use super::transport::{ResilientTransport, TransportConfig};
use super::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage};

/// The default chat model.
const DEFAULT_MODEL: &str = "gpt-4o";

// ============================================================================
// Request Types
// ============================================================================

/// Chat-completions request body.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    /// `"auto"` when tools are offered, omitted otherwise
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    /// Null for an assistant message that only carries tool calls
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCallRequest {
    id: String,
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: String,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

/// Assistant message. `content` is a string or a list of parts; some
/// compatible backends answer in `text` or `answer` instead.
#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallResponse>>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    answer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolCallResponse {
    #[serde(default)]
    id: String,
    function: WireFunctionCall,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// ============================================================================
// Provider
// ============================================================================

/// OpenAI-compatible chat-completions provider.
pub struct ChatCompletionsProvider {
    api_key: Option<String>,
    api_base: String,
    model: String,
    transport: Arc<ResilientTransport>,
}

impl ChatCompletionsProvider {
    /// Create a provider for the default endpoint and model.
    ///
    /// # Example
    /// ```
    /// use std::sync::Arc;
    /// use medchat::providers::{ChatCompletionsProvider, LLMProvider, ResilientTransport};
    ///
    /// let transport = Arc::new(ResilientTransport::new(Default::default()));
    /// let provider = ChatCompletionsProvider::new("sk-xxx", transport);
    /// assert_eq!(provider.name(), "openai");
    /// assert!(provider.is_configured());
    /// ```
    pub fn new(api_key: &str, transport: Arc<ResilientTransport>) -> Self {
        Self {
            api_key: Some(api_key.to_string()),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            transport,
        }
    }

    /// Build a provider and its transport from backend configuration.
    pub fn from_config(config: &BackendConfig) -> Self {
        let transport = Arc::new(ResilientTransport::new(TransportConfig::from(config)));
        Self::from_config_with_transport(config, transport)
    }

    /// Build a provider that shares an existing transport.
    pub fn from_config_with_transport(config: &BackendConfig, transport: Arc<ResilientTransport>) -> Self {
        Self {
            api_key: config
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            transport,
        }
    }

    /// Point the provider at an OpenAI-compatible base URL.
    pub fn with_base_url(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

fn convert_messages(messages: Vec<Message>) -> Vec<WireMessage> {
    messages
        .into_iter()
        .map(|msg| {
            let tool_calls = msg.tool_calls.filter(|tcs| !tcs.is_empty()).map(|tcs| {
                tcs.into_iter()
                    .map(|tc| WireToolCallRequest {
                        id: tc.id,
                        r#type: "function".to_string(),
                        function: WireFunctionCall {
                            name: tc.name,
                            arguments: tc.arguments,
                        },
                    })
                    .collect()
            });

            WireMessage {
                role: msg.role.to_string(),
                content: if msg.content.is_empty() && tool_calls.is_some() {
                    None
                } else {
                    Some(msg.content)
                },
                tool_calls,
                tool_call_id: msg.tool_call_id,
            }
        })
        .collect()
}

fn convert_tools(tools: Vec<ToolDefinition>) -> Vec<WireTool> {
    tools
        .into_iter()
        .map(|t| WireTool {
            r#type: "function".to_string(),
            function: WireFunctionDef {
                name: t.name,
                description: t.description,
                parameters: t.parameters,
            },
        })
        .collect()
}

/// Assistant text from a string, a list of text parts, or an alternate key.
fn extract_text(message: &ResponseMessage) -> String {
    let from_content = match &message.content {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.trim()),
                Value::Object(obj) => obj.get("text").and_then(Value::as_str).map(str::trim),
                _ => None,
            })
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };
    if !from_content.is_empty() {
        return from_content;
    }

    [&message.text, &message.answer]
        .into_iter()
        .flatten()
        .map(|text| text.trim())
        .find(|text| !text.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn convert_response(body: Value) -> std::result::Result<LLMResponse, ProviderError> {
    let response: ChatResponse = serde_json::from_value(body)
        .map_err(|e| ProviderError::MalformedResponse(format!("unexpected response shape: {}", e)))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse("response has no choices".to_string()))?;

    let content = extract_text(&choice.message);
    let tool_calls: Vec<LLMToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, tc)| {
            let id = if tc.id.is_empty() {
                format!("call_{}", i)
            } else {
                tc.id
            };
            LLMToolCall::new(&id, &tc.function.name, &tc.function.arguments)
        })
        .collect();

    if content.is_empty() && tool_calls.is_empty() {
        return Err(ProviderError::MalformedResponse(
            "assistant message has neither text nor tool calls".to_string(),
        ));
    }

    let mut llm_response = LLMResponse::with_tools(&content, tool_calls);
    if let Some(usage) = response.usage {
        llm_response = llm_response.with_usage(Usage::new(usage.prompt_tokens, usage.completion_tokens));
    }
    Ok(llm_response)
}

// ============================================================================
// LLMProvider Implementation
// ============================================================================

#[async_trait]
impl LLMProvider for ChatCompletionsProvider {
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(MedchatError::Config("backend API key is not set".to_string()));
        };

        let model = model.unwrap_or(self.model.as_str());
        let (tool_choice, tools) = if tools.is_empty() {
            (None, None)
        } else {
            (Some("auto"), Some(convert_tools(tools)))
        };

        let request = ChatRequest {
            model: model.to_string(),
            messages: convert_messages(messages),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            tool_choice,
            tools,
        };
        let payload = serde_json::to_value(&request)?;

        debug!(model, fresh = options.fresh_connection, "Chat completion request");

        let body = if options.fresh_connection {
            self.transport.post_fresh(&self.endpoint(), api_key, &payload).await
        } else {
            self.transport.post(&self.endpoint(), api_key, &payload).await
        }?;

        convert_response(body).map_err(|e| {
            warn!(model, error = %e, "Unusable chat completion");
            MedchatError::from(e)
        })
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}
