//! Shared CLI helpers used across multiple command handlers.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use medchat::config::Config;
use medchat::providers::{ChatCompletionsProvider, LLMProvider};
use medchat::store::MemoryStore;

/// Load configuration from `path`, or the default location.
pub(crate) fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Config::load().with_context(|| "Failed to load configuration"),
    }
}

/// Open the store: snapshot-backed when `storage.path` is set, memory-only otherwise.
pub(crate) async fn open_store(config: &Config) -> Result<Arc<MemoryStore>> {
    match config.storage_path() {
        Some(path) => {
            let store = MemoryStore::with_path(&path)
                .await
                .with_context(|| format!("Failed to open store at {}", path.display()))?;
            info!(path = %path.display(), "Using store snapshot");
            Ok(Arc::new(store))
        }
        None => {
            warn!("storage.path is not set; state is kept in memory only");
            Ok(Arc::new(MemoryStore::new_memory()))
        }
    }
}

/// Chat-completions provider for the configured backend.
pub(crate) fn create_provider(config: &Config) -> Arc<dyn LLMProvider> {
    if config.api_key().is_none() {
        eprintln!("Warning: No API key configured. Set MEDCHAT_BACKEND_API_KEY");
        eprintln!("or add backend.api_key to {:?}", Config::path());
        eprintln!();
    }
    Arc::new(ChatCompletionsProvider::from_config(&config.backend))
}
