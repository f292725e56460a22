use std::{collections::HashMap, sync::Mutex};

use {async_trait::async_trait, serde::{Deserialize, Serialize}, volery_common::types::unix_now};

use crate::error::{Error, Result};

/// A persisted channel account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAccount {
    pub channel_id: String,
    pub account_id: String,
    /// Disabled accounts are kept but never started. No hard deletes.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Where credentials come from ("config", "env:VAR"); display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_source: Option<String>,
    /// Opaque per-channel config block.
    #[serde(default)]
    pub config: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

fn default_true() -> bool {
    true
}

impl StoredAccount {
    /// A fresh enabled account with its config block.
    #[must_use]
    pub fn new(channel_id: impl Into<String>, account_id: impl Into<String>) -> Self {
        let now = unix_now();
        Self {
            channel_id: channel_id.into(),
            account_id: account_id.into(),
            enabled: true,
            credential_source: None,
            config: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// Persistent storage for channel accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn list(&self) -> Result<Vec<StoredAccount>>;
    async fn get(&self, channel_id: &str, account_id: &str) -> Result<Option<StoredAccount>>;
    /// Insert or update; an existing record keeps its `created_at` and
    /// `enabled` flag unless the caller changed them explicitly.
    async fn upsert(&self, account: StoredAccount) -> Result<StoredAccount>;
    async fn set_enabled(
        &self,
        channel_id: &str,
        account_id: &str,
        enabled: bool,
    ) -> Result<StoredAccount>;
}

type AccountKey = (String, String);

fn key_of(account: &StoredAccount) -> AccountKey {
    (account.channel_id.clone(), account.account_id.clone())
}

pub(crate) fn apply_upsert(
    accounts: &mut HashMap<AccountKey, StoredAccount>,
    mut account: StoredAccount,
) -> StoredAccount {
    let now = unix_now();
    account.updated_at = now;
    match accounts.get(&key_of(&account)) {
        Some(existing) => account.created_at = existing.created_at,
        None => account.created_at = now,
    }
    accounts.insert(key_of(&account), account.clone());
    account
}

pub(crate) fn apply_set_enabled(
    accounts: &mut HashMap<AccountKey, StoredAccount>,
    channel_id: &str,
    account_id: &str,
    enabled: bool,
) -> Result<StoredAccount> {
    let k = (channel_id.to_string(), account_id.to_string());
    let Some(account) = accounts.get_mut(&k) else {
        return Err(Error::unknown_account(account_id));
    };
    account.enabled = enabled;
    account.updated_at = unix_now();
    Ok(account.clone())
}

pub(crate) fn sorted_accounts(accounts: &HashMap<AccountKey, StoredAccount>) -> Vec<StoredAccount> {
    let mut out: Vec<_> = accounts.values().cloned().collect();
    out.sort_by(|a, b| {
        (a.channel_id.as_str(), a.account_id.as_str())
            .cmp(&(b.channel_id.as_str(), b.account_id.as_str()))
    });
    out
}

/// In-memory account store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<AccountKey, StoredAccount>>,
}

impl MemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_accounts<T>(&self, f: impl FnOnce(&mut HashMap<AccountKey, StoredAccount>) -> T) -> T {
        let mut guard = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn list(&self) -> Result<Vec<StoredAccount>> {
        Ok(self.with_accounts(|a| sorted_accounts(a)))
    }

    async fn get(&self, channel_id: &str, account_id: &str) -> Result<Option<StoredAccount>> {
        let k = (channel_id.to_string(), account_id.to_string());
        Ok(self.with_accounts(|a| a.get(&k).cloned()))
    }

    async fn upsert(&self, account: StoredAccount) -> Result<StoredAccount> {
        Ok(self.with_accounts(|a| apply_upsert(a, account)))
    }

    async fn set_enabled(
        &self,
        channel_id: &str,
        account_id: &str,
        enabled: bool,
    ) -> Result<StoredAccount> {
        self.with_accounts(|a| apply_set_enabled(a, channel_id, account_id, enabled))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_and_get() {
        let store = MemoryAccountStore::new();
        store
            .upsert(StoredAccount::new("bridge", "main"))
            .await
            .unwrap();
        let got = store.get("bridge", "main").await.unwrap().unwrap();
        assert!(got.enabled);
        assert!(got.created_at > 0);
    }

    #[tokio::test]
    async fn upsert_preserves_created_at() {
        let store = MemoryAccountStore::new();
        let first = store
            .upsert(StoredAccount::new("bridge", "main"))
            .await
            .unwrap();
        let second = store
            .upsert(
                StoredAccount::new("bridge", "main")
                    .with_config(serde_json::json!({ "dm_policy": "open" })),
            )
            .await
            .unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.config["dm_policy"], "open");
    }

    #[tokio::test]
    async fn set_enabled_toggles() {
        let store = MemoryAccountStore::new();
        store
            .upsert(StoredAccount::new("bridge", "main"))
            .await
            .unwrap();
        let disabled = store.set_enabled("bridge", "main", false).await.unwrap();
        assert!(!disabled.enabled);
        assert!(!store.get("bridge", "main").await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn set_enabled_unknown_account_fails() {
        let store = MemoryAccountStore::new();
        assert!(store.set_enabled("bridge", "ghost", false).await.is_err());
    }

    #[tokio::test]
    async fn list_is_sorted() {
        let store = MemoryAccountStore::new();
        store
            .upsert(StoredAccount::new("bridge", "zeta"))
            .await
            .unwrap();
        store
            .upsert(StoredAccount::new("bridge", "alpha"))
            .await
            .unwrap();
        let ids: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.account_id)
            .collect();
        assert_eq!(ids, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
