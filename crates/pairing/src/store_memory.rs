//! In-memory pairing store for tests and ephemeral deployments.

use std::sync::Mutex;

use {async_trait::async_trait, volery_common::types::unix_now};

use crate::{
    Result,
    ledger::{PairedSender, PairingLedger, PairingStatus, PendingPairing},
    store::{DEFAULT_TTL_SECS, PairingStore},
};

/// Ledger behind a mutex; state is lost on restart.
pub struct MemoryPairingStore {
    ledger: Mutex<PairingLedger>,
    ttl_secs: i64,
}

impl Default for MemoryPairingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPairingStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(PairingLedger::new()),
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    fn with_ledger<T>(&self, f: impl FnOnce(&mut PairingLedger) -> T) -> T {
        let mut guard = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl PairingStore for MemoryPairingStore {
    async fn resolve(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
    ) -> Result<PairingStatus> {
        Ok(self.with_ledger(|l| l.resolve(channel_id, account_id, sender_id, unix_now())))
    }

    async fn request(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
        sender_name: Option<&str>,
    ) -> Result<PendingPairing> {
        let ttl = self.ttl_secs;
        Ok(self.with_ledger(|l| {
            l.request(channel_id, account_id, sender_id, sender_name, unix_now(), ttl)
        }))
    }

    async fn approve_code(
        &self,
        channel_id: &str,
        account_id: &str,
        code: &str,
    ) -> Result<PairedSender> {
        self.with_ledger(|l| l.approve_code(channel_id, account_id, code, unix_now()))
    }

    async fn deny_code(
        &self,
        channel_id: &str,
        account_id: &str,
        code: &str,
    ) -> Result<PendingPairing> {
        self.with_ledger(|l| l.deny_code(channel_id, account_id, code))
    }

    async fn revoke(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
    ) -> Result<PairedSender> {
        self.with_ledger(|l| l.revoke(channel_id, account_id, sender_id))
    }

    async fn upsert_allowed(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
        sender_name: Option<&str>,
    ) -> Result<PairedSender> {
        Ok(self.with_ledger(|l| {
            l.upsert_allowed(channel_id, account_id, sender_id, sender_name, unix_now())
        }))
    }

    async fn mark_notified(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
    ) -> Result<PairedSender> {
        self.with_ledger(|l| l.mark_notified(channel_id, account_id, sender_id))
    }

    async fn list_pending(
        &self,
        channel_id: &str,
        account_id: &str,
    ) -> Result<Vec<PendingPairing>> {
        Ok(self.with_ledger(|l| l.list_pending(channel_id, account_id, unix_now())))
    }

    async fn list_paired(&self, channel_id: &str, account_id: &str) -> Result<Vec<PairedSender>> {
        Ok(self.with_ledger(|l| l.list_paired(channel_id, account_id)))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_then_approve() {
        let store = MemoryPairingStore::new();
        let rec = store
            .request("bridge", "main", "ada", Some("Ada"))
            .await
            .unwrap();
        store
            .approve_code("bridge", "main", &rec.code)
            .await
            .unwrap();
        assert_eq!(
            store.resolve("bridge", "main", "ada").await.unwrap(),
            PairingStatus::Paired
        );
    }

    #[tokio::test]
    async fn zero_ttl_expires_immediately() {
        let store = MemoryPairingStore::new().with_ttl(0);
        store.request("bridge", "main", "ada", None).await.unwrap();
        assert_eq!(
            store.resolve("bridge", "main", "ada").await.unwrap(),
            PairingStatus::Unpaired
        );
        assert!(store.list_pending("bridge", "main").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn revoke_unknown_is_error() {
        let store = MemoryPairingStore::new();
        assert!(store.revoke("bridge", "main", "ghost").await.is_err());
    }
}
