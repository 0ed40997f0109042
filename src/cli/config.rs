//! Config check command handler.

use std::path::Path;

use anyhow::Result;

use medchat::config::Config;

use super::ConfigAction;

/// Validate configuration file.
pub(crate) async fn cmd_config(
    action: ConfigAction,
    path: Option<&Path>,
    loaded: Result<Config>,
) -> Result<()> {
    match action {
        ConfigAction::Check => {
            let config_path = path.map(Path::to_path_buf).unwrap_or_else(Config::path);
            println!("Config file: {}", config_path.display());

            if !config_path.exists() {
                println!("[OK] No config file found (using defaults)");
            }

            let config = match loaded {
                Ok(config) => config,
                Err(e) => {
                    println!("[ERROR] {:#}", e);
                    return Ok(());
                }
            };

            if config.api_key().is_none() {
                println!("[WARN] backend.api_key is not set; every request will get the missing-credentials reply");
            }

            match config.validate() {
                Ok(()) => println!("\nConfiguration looks good!"),
                Err(e) => println!("[ERROR] {}", e),
            }
        }
    }
    Ok(())
}
