//! Configuration type definitions for MedChat
//!
//! This module defines all configuration structs used throughout the crate.
//! All types implement serde traits for JSON serialization and have sensible defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::media::ImageBudget;

/// Main configuration struct for MedChat
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Chat-completions backend (credentials, endpoint, timeouts)
    pub backend: BackendConfig,
    /// Orchestrator defaults (prompt, step bound, history, payload ceiling)
    pub agent: AgentConfig,
    /// Image budget presets, largest first
    pub images: ImagesConfig,
    /// Summary cache TTLs, model and background rebuild policy
    pub summary: SummaryConfig,
    /// Built-in tool settings
    pub tools: ToolsConfig,
    /// Store snapshot location
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

// ============================================================================
// Backend Configuration
// ============================================================================

/// Default chat-completions base URL.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Model backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Bearer token. An empty key means the backend is not configured.
    pub api_key: Option<String>,
    /// Base URL; `/chat/completions` is appended.
    pub api_base: String,
    /// Default chat model.
    pub model: String,
    /// TCP/TLS connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Per-read socket timeout in seconds.
    pub read_timeout_secs: u64,
    /// Pause between the keep-alive attempt and the fresh-connection attempt.
    pub retry_delay_ms: u64,
    /// Idle keep-alive connections kept per host by the pooled client.
    pub pool_max_idle_per_host: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: "gpt-4o".to_string(),
            connect_timeout_secs: 4,
            read_timeout_secs: 20,
            retry_delay_ms: 100,
            pool_max_idle_per_host: 64,
        }
    }
}

// ============================================================================
// Agent Configuration
// ============================================================================

/// Default doctor persona used as the first system message.
pub const DEFAULT_SYSTEM_PROMPT: &str = "شما یک پزشک با تجربه هستید. علائم بیمار را بررسی و تشخیص و درمان مناسب ارائه کنید. \
همیشه پاسخ نهایی را به زبان فارسی و به‌صورت دقیق و مختصر ارائه کن. \
اگر بیمار به ویزیت پزشک نیاز دارد، پیشنهاد بده ویزیت خود را از بخش ویزیت اپلیکیشن ثبت کند \
تا پزشک با شرح حال کامل بهترین نتیجه را بگیرد.";

/// Orchestrator defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// First system message of every prompt
    pub system_prompt: String,
    /// Model calls allowed per request before giving up
    pub max_steps: u32,
    /// Most recent turns of the conversation replayed as history
    pub history_turns: usize,
    /// Default output token ceiling when caps do not set one
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Serialized message bytes allowed before images are re-budgeted
    pub max_payload_bytes: usize,
    /// Summaries shorter than this are not injected into the prompt
    pub min_summary_len: usize,
    /// Specialty code to extra system prompt
    pub specialty_prompts: HashMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_steps: 3,
            history_turns: 5,
            max_tokens: 1500,
            temperature: 0.2,
            max_payload_bytes: 2_400_000,
            min_summary_len: 30,
            specialty_prompts: HashMap::new(),
        }
    }
}

// ============================================================================
// Image Configuration
// ============================================================================

/// Image budget presets applied in order when a request is too large.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub primary: ImageBudget,
    pub fallback: ImageBudget,
    pub ultra_compact: ImageBudget,
    /// First-attempt JPEG quality and the top of the search range
    pub high_quality: u8,
    /// Bottom of the quality search range
    pub min_quality: u8,
    /// Binary search iterations
    pub search_iterations: u32,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            primary: ImageBudget::new(4, 3.0, 1_200_000),
            fallback: ImageBudget::new(1, 2.0, 900_000),
            ultra_compact: ImageBudget::new(1, 1.0, 600_000),
            high_quality: 88,
            min_quality: 45,
            search_iterations: 6,
        }
    }
}

// ============================================================================
// Summary Configuration
// ============================================================================

/// Summary cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Model used for summarization calls
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Freshness window of a conversation summary
    pub conversation_ttl_mins: i64,
    /// Freshness window of the global per-user summary
    pub global_ttl_mins: i64,
    /// Transcript characters sent to the model (most recent kept)
    pub max_transcript_chars: usize,
    /// Delay before a conversation rebuild scheduled by a new turn
    pub conversation_rebuild_delay_secs: u64,
    /// Delay before a global rebuild scheduled by a new turn
    pub global_rebuild_delay_secs: u64,
    /// Background retries after the first failed rebuild
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Most recent conversations folded into the global summary (None = all)
    pub global_conversation_limit: Option<usize>,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            model: "o3-mini".to_string(),
            max_tokens: 800,
            temperature: 0.2,
            conversation_ttl_mins: 30,
            global_ttl_mins: 60 * 6,
            max_transcript_chars: 20_000,
            conversation_rebuild_delay_secs: 60,
            global_rebuild_delay_secs: 120,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 60_000,
            global_conversation_limit: None,
        }
    }
}

// ============================================================================
// Tools Configuration
// ============================================================================

/// Built-in tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Price of one visit, deducted from the wallet
    pub visit_cost: i64,
    /// Visit title used when the model does not supply one
    pub default_visit_name: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            visit_cost: 398_000,
            default_visit_name: "ویزیت آنلاین".to_string(),
        }
    }
}

// ============================================================================
// Storage Configuration
// ============================================================================

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON snapshot file. `None` keeps everything in memory.
    pub path: Option<String>,
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human readable output
    Pretty,
    /// Single-line `[LEVEL] target message {fields}` output
    #[default]
    Component,
    /// JSON lines for log aggregators
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Append logs to this file instead of stderr
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
        }
    }
}
