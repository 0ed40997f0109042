//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod chat;
pub mod common;
pub mod config;
pub mod sessions;
pub mod summary;
pub mod wallet;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use medchat::config::LoggingConfig;

#[derive(Parser)]
#[command(name = "medchat")]
#[command(version)]
#[command(about = "Medical chat assistant", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.medchat/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message as a user (interactive when --message is omitted)
    Chat(ChatArgs),
    /// Rebuild summaries now for one user, one conversation or everyone
    Summarize {
        /// User whose open conversations and global summary are rebuilt
        #[arg(long, conflicts_with_all = ["conversation", "all"])]
        user: Option<u64>,
        /// Single conversation to rebuild
        #[arg(long, conflicts_with = "all")]
        conversation: Option<u64>,
        /// Rebuild for every user with conversations
        #[arg(long)]
        all: bool,
        /// Only the newest N conversations feed the global summary
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        limit: Option<u64>,
    },
    /// Remove duplicate summary records, keeping the newest per scope
    CleanupSummaries,
    /// Close conversations idle for longer than --hours
    CloseSessions {
        #[arg(long, default_value_t = 12, value_parser = clap::value_parser!(i64).range(1..))]
        hours: i64,
        /// List what would be closed without changing anything
        #[arg(long)]
        dry_run: bool,
        /// Only this user's conversations
        #[arg(long)]
        user: Option<u64>,
    },
    /// Show or top up a user's wallet
    Wallet {
        #[arg(long)]
        user: u64,
        /// Amount to add before printing the balance
        #[arg(long)]
        credit: Option<i64>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct ChatArgs {
    /// Acting user id
    #[arg(long, default_value_t = 1)]
    pub user: u64,
    /// Message to send (non-interactive mode)
    #[arg(short, long)]
    pub message: Option<String>,
    /// Image file path, http(s) URL or base64 payload; repeatable
    #[arg(long = "image")]
    pub images: Vec<String>,
    /// Close open conversations and start a new one
    #[arg(long)]
    pub new: bool,
    /// Model override for this request
    #[arg(long)]
    pub model: Option<String>,
    /// Tool whitelist (comma separated); omit to allow every tool
    #[arg(long, value_delimiter = ',')]
    pub tools: Option<Vec<String>>,
    /// Per-request output token cap
    #[arg(long)]
    pub max_tokens: Option<u32>,
    /// Maximum images sent to the model (0 disables vision)
    #[arg(long)]
    pub max_images: Option<usize>,
    /// Specialty code selecting an extra system prompt
    #[arg(long)]
    pub specialty: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Validate configuration file
    Check,
}

/// Entry point for the CLI, called from main().
pub async fn run() -> Result<()> {
    // `.env` is optional; real environment variables take precedence.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Load config early so logging respects it; a broken file still gets
    // default logging so `config check` can report the problem.
    let loaded = common::load_config(cli.config.as_deref());
    let logging_cfg = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_else(|_| LoggingConfig::default());
    medchat::utils::logging::init_logging(&logging_cfg)?;

    match cli.command {
        Commands::Config { action } => {
            config::cmd_config(action, cli.config.as_deref(), loaded).await?;
        }
        Commands::Chat(args) => {
            chat::cmd_chat(loaded?, args).await?;
        }
        Commands::Summarize {
            user,
            conversation,
            all,
            limit,
        } => {
            summary::cmd_summarize(loaded?, user, conversation, all, limit).await?;
        }
        Commands::CleanupSummaries => {
            summary::cmd_cleanup(loaded?).await?;
        }
        Commands::CloseSessions {
            hours,
            dry_run,
            user,
        } => {
            sessions::cmd_close_sessions(loaded?, hours, dry_run, user).await?;
        }
        Commands::Wallet { user, credit } => {
            wallet::cmd_wallet(loaded?, user, credit).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_chat_with_caps() {
        let cli = Cli::try_parse_from([
            "medchat",
            "chat",
            "--user",
            "7",
            "-m",
            "سلام",
            "--tools",
            "triage_level,get_patient_profile",
            "--max-images",
            "0",
        ])
        .unwrap();
        match cli.command {
            Commands::Chat(args) => {
                assert_eq!(args.user, 7);
                assert_eq!(args.message.as_deref(), Some("سلام"));
                assert_eq!(
                    args.tools,
                    Some(vec!["triage_level".to_string(), "get_patient_profile".to_string()])
                );
                assert_eq!(args.max_images, Some(0));
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn test_summarize_rejects_user_with_all() {
        assert!(Cli::try_parse_from(["medchat", "summarize", "--user", "1", "--all"]).is_err());
    }

    #[test]
    fn test_summarize_rejects_zero_limit() {
        assert!(Cli::try_parse_from(["medchat", "summarize", "--all", "--limit", "0"]).is_err());
    }

    #[test]
    fn test_close_sessions_defaults() {
        let cli = Cli::try_parse_from(["medchat", "close-sessions"]).unwrap();
        match cli.command {
            Commands::CloseSessions {
                hours,
                dry_run,
                user,
            } => {
                assert_eq!(hours, 12);
                assert!(!dry_run);
                assert!(user.is_none());
            }
            _ => panic!("expected close-sessions"),
        }
    }
}
