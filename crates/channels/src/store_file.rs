//! JSON-file account store.
//!
//! Same discipline as the pairing file store: reload from disk on every
//! operation so the CLI and a running server stay coherent, write through a
//! `.tmp` sibling with one `.bak` generation kept.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use {async_trait::async_trait, serde::{Deserialize, Serialize}, tokio::sync::Mutex, tracing::warn};

use crate::{
    error::{Error, Result},
    store::{AccountStore, StoredAccount, apply_set_enabled, apply_upsert, sorted_accounts},
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountsSnapshot {
    #[serde(default)]
    accounts: Vec<StoredAccount>,
}

/// Channel accounts persisted to a single JSON file.
pub struct FileAccountStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileAccountStore {
    /// Open the store, verifying any existing file parses.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let _ = load_accounts(&path).await?;
        Ok(Self {
            path,
            guard: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_op<T>(
        &self,
        f: impl FnOnce(&HashMap<(String, String), StoredAccount>) -> T,
    ) -> Result<T> {
        let _guard = self.guard.lock().await;
        let accounts = load_accounts(&self.path).await?;
        Ok(f(&accounts))
    }

    async fn write_op<T>(
        &self,
        f: impl FnOnce(&mut HashMap<(String, String), StoredAccount>) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.guard.lock().await;
        let mut accounts = load_accounts(&self.path).await?;
        let out = f(&mut accounts)?;
        save_accounts(&self.path, &accounts).await?;
        Ok(out)
    }
}

async fn load_accounts(path: &Path) -> Result<HashMap<(String, String), StoredAccount>> {
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|e| Error::external(format!("stat {}", path.display()), e))?;
    if !exists {
        return Ok(HashMap::new());
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::external(format!("read {}", path.display()), e))?;
    let snapshot: AccountsSnapshot = serde_json::from_str(&raw)?;
    Ok(snapshot
        .accounts
        .into_iter()
        .map(|a| ((a.channel_id.clone(), a.account_id.clone()), a))
        .collect())
}

async fn save_accounts(
    path: &Path,
    accounts: &HashMap<(String, String), StoredAccount>,
) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::external(format!("create {}", parent.display()), e))?;
    }
    let snapshot = AccountsSnapshot {
        accounts: sorted_accounts(accounts),
    };
    let json = serde_json::to_string_pretty(&snapshot)?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| Error::external(format!("write {}", tmp.display()), e))?;

    let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
    if exists {
        let bak = path.with_extension("json.bak");
        if let Err(e) = tokio::fs::copy(path, &bak).await {
            warn!(path = %bak.display(), error = %e, "failed to write accounts backup");
        }
    }

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::external(format!("rename {}", path.display()), e))?;
    Ok(())
}

#[async_trait]
impl AccountStore for FileAccountStore {
    async fn list(&self) -> Result<Vec<StoredAccount>> {
        self.read_op(|a| sorted_accounts(a)).await
    }

    async fn get(&self, channel_id: &str, account_id: &str) -> Result<Option<StoredAccount>> {
        let k = (channel_id.to_string(), account_id.to_string());
        self.read_op(|a| a.get(&k).cloned()).await
    }

    async fn upsert(&self, account: StoredAccount) -> Result<StoredAccount> {
        self.write_op(|a| Ok(apply_upsert(a, account))).await
    }

    async fn set_enabled(
        &self,
        channel_id: &str,
        account_id: &str,
        enabled: bool,
    ) -> Result<StoredAccount> {
        self.write_op(|a| apply_set_enabled(a, channel_id, account_id, enabled))
            .await
    }
}
