//! `volery pairing` — operate the pairing store.
//!
//! Works on the same JSON file as a running server; both sides reload per
//! operation, so an approval here is visible to the server on the sender's
//! next message.

use std::path::Path;

use {
    clap::Subcommand,
    volery_channels::gating::normalize_sender,
    volery_pairing::{FilePairingStore, PairingStore},
};

#[derive(Subcommand)]
pub enum PairingAction {
    /// List pending requests and paired senders for an account.
    List {
        #[arg(long, default_value = "bridge")]
        channel: String,
        #[arg(long, default_value = "main")]
        account: String,
    },
    /// Approve a pending request by its code.
    Approve {
        code: String,
        #[arg(long, default_value = "bridge")]
        channel: String,
        #[arg(long, default_value = "main")]
        account: String,
    },
    /// Deny a pending request by its code.
    Deny {
        code: String,
        #[arg(long, default_value = "bridge")]
        channel: String,
        #[arg(long, default_value = "main")]
        account: String,
    },
    /// Revoke a paired sender.
    Revoke {
        sender: String,
        #[arg(long, default_value = "bridge")]
        channel: String,
        #[arg(long, default_value = "main")]
        account: String,
    },
}

pub async fn handle(state_dir: &Path, action: &PairingAction) -> anyhow::Result<()> {
    let store = FilePairingStore::open(state_dir.join("pairing.json")).await?;

    match action {
        PairingAction::List { channel, account } => {
            let pending = store.list_pending(channel, account).await?;
            let paired = store.list_paired(channel, account).await?;

            if pending.is_empty() {
                println!("No pending pairing requests.");
            } else {
                println!("Pending ({}):", pending.len());
                for request in &pending {
                    println!(
                        "  {}  {}{}  expires {}",
                        request.code,
                        request.sender_id,
                        request
                            .sender_name
                            .as_deref()
                            .map(|n| format!(" ({n})"))
                            .unwrap_or_default(),
                        format_ts(request.expires_at),
                    );
                }
            }

            if paired.is_empty() {
                println!("No paired senders.");
            } else {
                println!("Paired ({}):", paired.len());
                for sender in &paired {
                    println!(
                        "  {}{}  since {}{}",
                        sender.sender_id,
                        sender
                            .sender_name
                            .as_deref()
                            .map(|n| format!(" ({n})"))
                            .unwrap_or_default(),
                        format_ts(sender.paired_at),
                        if sender.notified { "" } else { "  [notice pending]" },
                    );
                }
            }
        },
        PairingAction::Approve {
            code,
            channel,
            account,
        } => {
            let paired = store.approve_code(channel, account, code).await?;
            println!(
                "Approved {}. They will be notified on their next message.",
                paired.sender_id
            );
        },
        PairingAction::Deny {
            code,
            channel,
            account,
        } => {
            let denied = store.deny_code(channel, account, code).await?;
            println!("Denied pairing request from {}.", denied.sender_id);
        },
        PairingAction::Revoke {
            sender,
            channel,
            account,
        } => {
            let sender = normalize_sender(sender);
            let revoked = store.revoke(channel, account, &sender).await?;
            println!("Revoked {}.", revoked.sender_id);
        },
    }

    Ok(())
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
