//! `volery accounts` — manage the persisted account registry.

use std::path::Path;

use {
    clap::Subcommand,
    volery_channels::{AccountStore, FileAccountStore},
};

#[derive(Subcommand)]
pub enum AccountAction {
    /// List all known accounts.
    List,
    /// Enable an account (it starts on the next server launch).
    Enable {
        account: String,
        #[arg(long, default_value = "bridge")]
        channel: String,
    },
    /// Disable an account without deleting its record.
    Disable {
        account: String,
        #[arg(long, default_value = "bridge")]
        channel: String,
    },
}

pub async fn handle(state_dir: &Path, action: &AccountAction) -> anyhow::Result<()> {
    let store = FileAccountStore::open(state_dir.join("accounts.json")).await?;

    match action {
        AccountAction::List => {
            let accounts = store.list().await?;
            if accounts.is_empty() {
                println!("No accounts recorded.");
                return Ok(());
            }
            for account in &accounts {
                println!(
                    "  {}/{}  {}  created {}",
                    account.channel_id,
                    account.account_id,
                    if account.enabled { "enabled" } else { "disabled" },
                    format_ts(account.created_at),
                );
            }
        },
        AccountAction::Enable { account, channel } => {
            let updated = store.set_enabled(channel, account, true).await?;
            println!("Enabled {}/{}.", updated.channel_id, updated.account_id);
        },
        AccountAction::Disable { account, channel } => {
            let updated = store.set_enabled(channel, account, false).await?;
            println!(
                "Disabled {}/{}. A running server keeps it up until restart.",
                updated.channel_id, updated.account_id
            );
        },
    }

    Ok(())
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
