//! Summary maintenance commands: `summarize` and `cleanup-summaries`.

use anyhow::{bail, Context, Result};

use medchat::config::Config;
use medchat::store::ConversationStore;
use medchat::summary::{RebuildOutcome, Scope, SummaryCache, SummaryKey};

use super::common::{create_provider, open_store};

/// Rebuild summaries immediately, bypassing the TTL.
pub(crate) async fn cmd_summarize(
    mut config: Config,
    user: Option<u64>,
    conversation: Option<u64>,
    all: bool,
    limit: Option<u64>,
) -> Result<()> {
    if user.is_none() && conversation.is_none() && !all {
        bail!("Pass --user, --conversation or --all");
    }
    if let Some(limit) = limit {
        config.summary.global_conversation_limit = Some(limit as usize);
    }

    let store = open_store(&config).await?;
    let cache = SummaryCache::from_store(store.clone(), create_provider(&config), config.summary.clone());

    if all {
        let rebuilt = cache.rebuild_all().await.context("Summary rebuild failed")?;
        println!("Rebuilt {} summaries", rebuilt);
        return Ok(());
    }

    if let Some(conversation_id) = conversation {
        let Some(conversation) = store.conversation(conversation_id).await? else {
            bail!("Conversation {} not found", conversation_id);
        };
        let key = SummaryKey::new(conversation.user_id, Scope::Conversation(conversation_id));
        let outcome = cache.rebuild(key).await.context("Summary rebuild failed")?;
        print_outcome(key, &outcome);
        return Ok(());
    }

    if let Some(user_id) = user {
        let outcomes = cache
            .rebuild_user(user_id)
            .await
            .with_context(|| format!("Summary rebuild failed for user {}", user_id))?;
        for (key, outcome) in &outcomes {
            print_outcome(*key, outcome);
        }
    }

    Ok(())
}

/// Drop duplicate summary records.
pub(crate) async fn cmd_cleanup(config: Config) -> Result<()> {
    let store = open_store(&config).await?;
    let cache = SummaryCache::from_store(store, create_provider(&config), config.summary.clone());
    let removed = cache.dedup().await.context("Summary cleanup failed")?;
    println!("Removed {} duplicate summaries", removed);
    Ok(())
}

fn print_outcome(key: SummaryKey, outcome: &RebuildOutcome) {
    match outcome {
        RebuildOutcome::Rebuilt(record) => {
            println!(
                "[OK] {} ({} chars)",
                key,
                record.text().chars().count()
            );
        }
        RebuildOutcome::AlreadyRunning => {
            println!("[SKIP] {} is already being rebuilt", key);
        }
    }
}
