//! The request orchestrator.
//!
//! One call to [`Orchestrator::respond`] handles one user message end to end:
//!
//! ```text
//! assemble ──> call model ──> tool calls? ──yes──> dispatch ──┐
//!    ▲                            │                           │
//!    │                            no                          │
//!    │                            ▼                           │
//!    │                     normalize, persist, reply          │
//!    └────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop is bounded by `agent.max_steps`. Oversized image payloads are
//! re-budgeted with the fallback preset before sending; a send that still
//! fails with a size or network error is retried once with the ultra-compact
//! preset on a fresh connection. Every failure maps to a fixed reply.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::caps::Caps;
use super::context::ContextBuilder;
use super::replies;
use crate::config::{AgentConfig, Config, ImagesConfig};
use crate::error::{MedchatError, ProviderError};
use crate::media::{build_user_content, ImageBudget, ImageBudgeter, ImageInput};
use crate::providers::{ChatOptions, LLMProvider, ToolDefinition};
use crate::session::{Content, Conversation, ConversationId, Message, ToolCall, UserId};
use crate::store::{ConversationStore, Store};
use crate::summary::{RefreshMode, Scope, SummaryCache};
use crate::tools::{builtin_registry, ToolContext, ToolRegistry};
use crate::utils::normalize::{clean_bot_message, remove_repeated};

// ============================================================================
// Request / Reply
// ============================================================================

/// One inbound user message.
#[derive(Debug, Clone, Default)]
pub struct RespondRequest {
    pub user_id: UserId,
    pub message: Option<String>,
    pub images: Vec<ImageInput>,
    /// Close open conversations and start a new one
    pub new_conversation: bool,
    pub model_override: Option<String>,
    pub caps: Caps,
}

impl RespondRequest {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn with_image(mut self, image: ImageInput) -> Self {
        self.images.push(image);
        self
    }

    pub fn with_images(mut self, images: Vec<ImageInput>) -> Self {
        self.images = images;
        self
    }

    pub fn with_new_conversation(mut self) -> Self {
        self.new_conversation = true;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model_override = Some(model.to_string());
        self
    }

    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.caps = caps;
        self
    }
}

/// The answer shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub answer: String,
    /// `None` when the request failed before a conversation was opened
    pub conversation_id: Option<ConversationId>,
}

impl Reply {
    fn new(answer: &str, conversation_id: Option<ConversationId>) -> Self {
        Self {
            answer: answer.to_string(),
            conversation_id,
        }
    }
}

/// How the step loop ended without an error.
#[derive(Debug)]
enum LoopOutcome {
    Answer(String),
    StepsExhausted,
}

/// A step-loop error, remembering whether any tool already ran.
#[derive(Debug)]
struct LoopFailure {
    error: MedchatError,
    tools_dispatched: bool,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    provider: Arc<dyn LLMProvider>,
    conversations: Arc<dyn ConversationStore>,
    summaries: SummaryCache,
    tools: Arc<ToolRegistry>,
    budgeter: ImageBudgeter,
    images: ImagesConfig,
    agent: AgentConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        conversations: Arc<dyn ConversationStore>,
        summaries: SummaryCache,
        tools: Arc<ToolRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            provider,
            conversations,
            summaries,
            tools,
            budgeter: ImageBudgeter::from_config(&config.images),
            images: config.images.clone(),
            agent: config.agent.clone(),
        }
    }

    /// Wire an orchestrator with the built-in tools and a summary cache over `store`.
    pub fn from_store<S: Store + 'static>(
        store: Arc<S>,
        provider: Arc<dyn LLMProvider>,
        config: &Config,
    ) -> Self {
        let summaries = SummaryCache::from_store(store.clone(), provider.clone(), config.summary.clone());
        let tools = Arc::new(builtin_registry(store.clone(), &config.tools));
        Self::new(provider, store, summaries, tools, config)
    }

    /// Answer one user message.
    ///
    /// Never fails: every error is logged and mapped to a fixed reply.
    pub async fn respond(&self, request: RespondRequest) -> Reply {
        let span = info_span!(
            "request",
            request_id = %Uuid::new_v4(),
            user_id = request.user_id
        );
        self.respond_inner(request).instrument(span).await
    }

    async fn respond_inner(&self, request: RespondRequest) -> Reply {
        if !self.provider.is_configured() {
            error!(provider = self.provider.name(), "Backend API key is missing");
            return Reply::new(replies::MISSING_CREDENTIALS, None);
        }

        let text = request.message.as_deref().unwrap_or("").trim().to_string();
        if text.is_empty() && request.images.is_empty() {
            return Reply::new(replies::EMPTY_INPUT, None);
        }

        let conversation = match self
            .conversations
            .open_conversation(request.user_id, request.new_conversation)
            .await
        {
            Ok(conversation) => conversation,
            Err(e) => {
                error!(error = %e, "Failed to open conversation");
                return Reply::new(replies::UNEXPECTED, None);
            }
        };
        let conversation_id = Some(conversation.id);

        let context = self.context_for(&conversation, &request.caps).await;
        let tools = self.tools.definitions(request.caps.tool_whitelist.as_deref());
        let model = request.model_override.as_deref();
        let options = ChatOptions::new()
            .with_max_tokens(
                request
                    .caps
                    .max_tokens
                    .map_or(self.agent.max_tokens, |cap| cap.min(self.agent.max_tokens)),
            )
            .with_temperature(self.agent.temperature);
        let tool_ctx = ToolContext::new(request.user_id)
            .with_conversation(conversation.id)
            .with_user_message(&text);

        let images = Arc::new(request.images);
        let mut messages = context.build(
            self.user_content(&text, &images, self.images.primary, &request.caps)
                .await,
        );
        if !images.is_empty() {
            let size = payload_size(&messages);
            if size > self.agent.max_payload_bytes {
                warn!(
                    size,
                    limit = self.agent.max_payload_bytes,
                    "Payload over limit, switching to fallback image budget"
                );
                messages = context.build(
                    self.user_content(&text, &images, self.images.fallback, &request.caps)
                        .await,
                );
            }
        }

        let mut outcome = self
            .run_steps(messages, &tools, model, &options, &tool_ctx)
            .await;

        if let Err(ref failure) = outcome {
            let downgrade = !images.is_empty()
                && !failure.tools_dispatched
                && failure
                    .error
                    .as_provider()
                    .map_or(false, ProviderError::triggers_downgrade);
            if downgrade {
                warn!(error = %failure.error, "Retrying with ultra-compact images on a fresh connection");
                let messages = context.build(
                    self.user_content(&text, &images, self.images.ultra_compact, &request.caps)
                        .await,
                );
                outcome = self
                    .run_steps(
                        messages,
                        &tools,
                        model,
                        &options.clone().with_fresh_connection(),
                        &tool_ctx,
                    )
                    .await;
            }
        }

        let answer = match outcome {
            Ok(LoopOutcome::Answer(answer)) => answer,
            Ok(LoopOutcome::StepsExhausted) => {
                warn!(max_steps = self.agent.max_steps, "Tool loop did not produce an answer");
                return Reply::new(replies::DID_NOT_COMPLETE, conversation_id);
            }
            Err(failure) => {
                return Reply::new(failure_reply(&failure.error), conversation_id);
            }
        };

        let stored = remove_repeated(&answer);
        match self
            .conversations
            .append_exchange(conversation.id, Content::from(text.as_str()), &stored)
            .await
        {
            Ok(_) => {
                self.summaries
                    .on_new_turns(request.user_id, conversation.id)
                    .await
            }
            Err(e) => error!(error = %e, "Failed to persist exchange"),
        }

        info!(conversation_id = conversation.id, chars = stored.chars().count(), "Reply ready");
        Reply {
            answer: clean_bot_message(&stored),
            conversation_id,
        }
    }

    /// System prompt, history and summary notes for `conversation`.
    ///
    /// Summary and history lookups are best effort; a failure only drops
    /// that part of the context.
    async fn context_for(&self, conversation: &Conversation, caps: &Caps) -> ContextBuilder {
        let mut context = ContextBuilder::new(&self.agent.system_prompt);

        match self
            .conversations
            .recent_turns(conversation.id, self.agent.history_turns)
            .await
        {
            Ok(turns) => context = context.with_history(&turns),
            Err(e) => warn!(error = %e, "Failed to load history"),
        }

        let scopes = [Scope::Global, Scope::Conversation(conversation.id)];
        for scope in scopes {
            let record = match self
                .summaries
                .get_or_update(conversation.user_id, scope, RefreshMode::Background)
                .await
            {
                Ok(record) => record,
                Err(e) => {
                    warn!(scope = %scope, error = %e, "Failed to read summary");
                    continue;
                }
            };
            if let Some(note) = record.note_text(self.agent.min_summary_len) {
                context = match scope {
                    Scope::Global => context.with_global_summary(note),
                    Scope::Conversation(_) => context.with_session_summary(note),
                };
            }
        }

        if let Some(prompt) = caps
            .specialty_code
            .as_ref()
            .and_then(|code| self.agent.specialty_prompts.get(code))
        {
            context = context.with_specialty(prompt);
        }
        context
    }

    /// Build the user turn with `preset`, capped by the request's entitlement.
    ///
    /// Image re-encoding runs on the blocking pool.
    async fn user_content(
        &self,
        text: &str,
        images: &Arc<Vec<ImageInput>>,
        preset: ImageBudget,
        caps: &Caps,
    ) -> Content {
        let budget = preset.with_max_images(caps.max_images);
        if images.is_empty() || budget.max_images == 0 {
            return Content::from(text);
        }

        let owned_text = text.to_string();
        let images = Arc::clone(images);
        let budgeter = self.budgeter;
        match tokio::task::spawn_blocking(move || {
            build_user_content(&owned_text, &images, &budget, &budgeter)
        })
        .await
        {
            Ok(content) => content,
            Err(e) => {
                error!(error = %e, "Image budgeting task failed, sending text only");
                Content::from(text)
            }
        }
    }

    async fn run_steps(
        &self,
        mut messages: Vec<Message>,
        tools: &[ToolDefinition],
        model: Option<&str>,
        options: &ChatOptions,
        ctx: &ToolContext,
    ) -> Result<LoopOutcome, LoopFailure> {
        let mut tools_dispatched = false;

        for step in 0..self.agent.max_steps {
            let response = self
                .provider
                .chat(messages.clone(), tools.to_vec(), model, options.clone())
                .await
                .map_err(|error| {
                    warn!(step, error = %error, "Model call failed");
                    LoopFailure {
                        error,
                        tools_dispatched,
                    }
                })?;

            if response.has_tool_calls() {
                debug!(step, calls = response.tool_calls.len(), "Dispatching tool calls");
                let calls = response
                    .tool_calls
                    .iter()
                    .map(|tc| ToolCall::new(&tc.id, &tc.name, &tc.arguments))
                    .collect();
                messages.push(Message::assistant_with_tools(&response.content, calls));

                for call in &response.tool_calls {
                    let args = call.parse_arguments().unwrap_or_else(|e| {
                        warn!(tool = %call.name, error = %e, "Malformed tool arguments, using {{}}");
                        json!({})
                    });
                    let result = self.tools.invoke(&call.name, args, ctx).await;
                    messages.push(Message::tool_result(&call.id, &result.to_string()));
                }
                tools_dispatched = true;
                continue;
            }

            let text = response.content.trim();
            if text.is_empty() {
                return Err(LoopFailure {
                    error: ProviderError::MalformedResponse("empty assistant content".into()).into(),
                    tools_dispatched,
                });
            }
            return Ok(LoopOutcome::Answer(text.to_string()));
        }

        Ok(LoopOutcome::StepsExhausted)
    }
}

/// Serialized size of the message list, as sent on the wire.
fn payload_size(messages: &[Message]) -> usize {
    serde_json::to_vec(messages).map(|v| v.len()).unwrap_or(0)
}

/// Fixed reply for a failed request.
fn failure_reply(error: &MedchatError) -> &'static str {
    match error {
        MedchatError::Config(_) => replies::MISSING_CREDENTIALS,
        MedchatError::Provider(ProviderError::MalformedResponse(_)) => replies::INVALID_RESPONSE,
        MedchatError::Provider(_) => replies::SERVICE_UNAVAILABLE,
        _ => replies::UNEXPECTED,
    }
}
