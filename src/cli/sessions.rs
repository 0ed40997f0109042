//! `close-sessions` command handler.

use anyhow::{Context, Result};
use chrono::Duration;

use medchat::config::Config;
use medchat::store::ConversationStore;

use super::common::open_store;

/// Close conversations with no activity for `hours`.
pub(crate) async fn cmd_close_sessions(
    config: Config,
    hours: i64,
    dry_run: bool,
    user: Option<u64>,
) -> Result<()> {
    let store = open_store(&config).await?;
    let closed = store
        .close_idle(Duration::hours(hours), dry_run, user)
        .await
        .context("Failed to close idle conversations")?;

    if closed.is_empty() {
        println!("No idle conversations");
        return Ok(());
    }

    let verb = if dry_run { "Would close" } else { "Closed" };
    println!("{} {} conversation(s):", verb, closed.len());
    for id in closed {
        println!("  {}", id);
    }
    Ok(())
}
