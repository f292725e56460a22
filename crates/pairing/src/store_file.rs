//! JSON-file pairing store.
//!
//! Every operation reloads the ledger from disk, applies the change, and
//! rewrites the file atomically (serialize to a `.tmp` sibling, keep the
//! previous file as `.bak`, rename into place). Reload-per-operation keeps
//! a running server and the CLI coherent on the same file; last-writer-wins
//! is acceptable at operator cadence.

use std::path::{Path, PathBuf};

use {async_trait::async_trait, tokio::sync::Mutex, tracing::warn, volery_common::types::unix_now};

use crate::{
    Result,
    error::Context,
    ledger::{LedgerSnapshot, PairedSender, PairingLedger, PairingStatus, PendingPairing},
    store::{DEFAULT_TTL_SECS, PairingStore},
};

/// Pairing ledger persisted to a single JSON file.
#[derive(Debug)]
pub struct FilePairingStore {
    path: PathBuf,
    ttl_secs: i64,
    // Serializes in-process access; cross-process writes race benignly.
    guard: Mutex<()>,
}

impl FilePairingStore {
    /// Open the store, verifying any existing file parses.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let _ = load_ledger(&path).await?;
        Ok(Self {
            path,
            ttl_secs: DEFAULT_TTL_SECS,
            guard: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_op<T>(&self, f: impl FnOnce(&PairingLedger) -> T) -> Result<T> {
        let _guard = self.guard.lock().await;
        let ledger = load_ledger(&self.path).await?;
        Ok(f(&ledger))
    }

    async fn write_op<T>(&self, f: impl FnOnce(&mut PairingLedger) -> Result<T>) -> Result<T> {
        let _guard = self.guard.lock().await;
        let mut ledger = load_ledger(&self.path).await?;
        let out = f(&mut ledger)?;
        ledger.evict_expired(unix_now());
        save_snapshot(&self.path, &ledger.snapshot()).await?;
        Ok(out)
    }
}

async fn load_ledger(path: &Path) -> Result<PairingLedger> {
    let exists = tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("stat {}", path.display()))?;
    if !exists {
        return Ok(PairingLedger::new());
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    let snapshot: LedgerSnapshot =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(PairingLedger::from_snapshot(snapshot))
}

async fn save_snapshot(path: &Path, snapshot: &LedgerSnapshot) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(snapshot).context("serialize ledger")?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;

    // Keep one generation of history alongside the live file.
    let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
    if exists {
        let bak = path.with_extension("json.bak");
        if let Err(e) = tokio::fs::copy(path, &bak).await {
            warn!(path = %bak.display(), error = %e, "failed to write pairing backup");
        }
    }

    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("rename {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl PairingStore for FilePairingStore {
    async fn resolve(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
    ) -> Result<PairingStatus> {
        self.read_op(|l| l.resolve(channel_id, account_id, sender_id, unix_now()))
            .await
    }

    async fn request(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
        sender_name: Option<&str>,
    ) -> Result<PendingPairing> {
        let ttl = self.ttl_secs;
        self.write_op(|l| {
            Ok(l.request(channel_id, account_id, sender_id, sender_name, unix_now(), ttl))
        })
        .await
    }

    async fn approve_code(
        &self,
        channel_id: &str,
        account_id: &str,
        code: &str,
    ) -> Result<PairedSender> {
        self.write_op(|l| l.approve_code(channel_id, account_id, code, unix_now()))
            .await
    }

    async fn deny_code(
        &self,
        channel_id: &str,
        account_id: &str,
        code: &str,
    ) -> Result<PendingPairing> {
        self.write_op(|l| l.deny_code(channel_id, account_id, code))
            .await
    }

    async fn revoke(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
    ) -> Result<PairedSender> {
        self.write_op(|l| l.revoke(channel_id, account_id, sender_id))
            .await
    }

    async fn upsert_allowed(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
        sender_name: Option<&str>,
    ) -> Result<PairedSender> {
        self.write_op(|l| {
            Ok(l.upsert_allowed(channel_id, account_id, sender_id, sender_name, unix_now()))
        })
        .await
    }

    async fn mark_notified(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
    ) -> Result<PairedSender> {
        self.write_op(|l| l.mark_notified(channel_id, account_id, sender_id))
            .await
    }

    async fn list_pending(
        &self,
        channel_id: &str,
        account_id: &str,
    ) -> Result<Vec<PendingPairing>> {
        self.read_op(|l| l.list_pending(channel_id, account_id, unix_now()))
            .await
    }

    async fn list_paired(&self, channel_id: &str, account_id: &str) -> Result<Vec<PairedSender>> {
        self.read_op(|l| l.list_paired(channel_id, account_id)).await
    }
}
