//! `wallet` command handler.

use anyhow::{bail, Result};

use medchat::config::Config;
use medchat::store::ClinicStore;

use super::common::open_store;

/// Print a user's balance and visits, optionally crediting first.
pub(crate) async fn cmd_wallet(config: Config, user: u64, credit: Option<i64>) -> Result<()> {
    let store = open_store(&config).await?;

    if let Some(amount) = credit {
        if amount <= 0 {
            bail!("--credit must be positive");
        }
        store.credit(user, amount).await?;
        println!("Credited {}", amount);
    }

    println!("Balance: {}", store.balance(user).await?);

    let visits = store.visits(user).await?;
    if !visits.is_empty() {
        println!();
        println!("Visits:");
        for visit in visits {
            let symptoms: Vec<&str> = visit.symptoms.values().map(String::as_str).collect();
            println!(
                "  #{} {} cost={} at {} [{}]",
                visit.id,
                visit.name,
                visit.cost,
                visit.created_at.format("%Y-%m-%d %H:%M"),
                symptoms.join(", ")
            );
        }
    }
    Ok(())
}
