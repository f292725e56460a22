//! The bridge-backed channel plugin.
//!
//! Platforms without a first-party server API run a client next to their
//! own stack and connect it here over the WebSocket bridge; from the
//! runtime's point of view this is a channel like any other.

use std::{
    collections::HashSet,
    sync::{Arc, RwLock},
};

use {
    async_trait::async_trait,
    tracing::info,
    volery_channels::{
        ChannelAccountConfig, ChannelDock, ChannelHealthSnapshot, ChannelOutbound, ChannelPlugin,
        ChannelStatus, MediaSupport,
    },
    volery_common::types::{ChatType, unix_now},
};

use crate::{outbound::BridgeOutbound, registry::BridgeRegistry};

/// Channel id of the built-in bridge channel.
pub const CHANNEL_ID: &str = "bridge";

/// Conservative default; accounts can lower it per platform.
pub const DEFAULT_CHUNK_LIMIT: usize = 4000;

pub struct BridgePlugin {
    dock: ChannelDock,
    registry: Arc<BridgeRegistry>,
    outbound: Arc<BridgeOutbound>,
    started: RwLock<HashSet<String>>,
}

impl BridgePlugin {
    #[must_use]
    pub fn new(registry: Arc<BridgeRegistry>) -> Self {
        let outbound = Arc::new(BridgeOutbound::new(registry.clone(), CHANNEL_ID));
        Self {
            dock: ChannelDock {
                channel_id: CHANNEL_ID.into(),
                label: "Bridge".into(),
                chat_types: vec![ChatType::Dm, ChatType::Group],
                media: MediaSupport::both(),
                text_chunk_limit: DEFAULT_CHUNK_LIMIT,
                typing_indicators: true,
                default_require_mention_in_groups: true,
                debounce_default_ms: None,
            },
            registry,
            outbound,
            started: RwLock::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn started_accounts(&self) -> Vec<String> {
        let mut accounts: Vec<String> = self.lock_started().iter().cloned().collect();
        accounts.sort();
        accounts
    }

    fn lock_started(&self) -> std::sync::RwLockReadGuard<'_, HashSet<String>> {
        self.started.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChannelPlugin for BridgePlugin {
    fn dock(&self) -> &ChannelDock {
        &self.dock
    }

    async fn start_account(
        &mut self,
        account_id: &str,
        config: serde_json::Value,
    ) -> anyhow::Result<()> {
        // Parse eagerly so a broken account block fails at startup, not
        // on first message.
        ChannelAccountConfig::from_value(&config)?;
        self.started
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account_id.to_string());
        info!(account = account_id, "bridge account started; awaiting client connection");
        Ok(())
    }

    async fn stop_account(&mut self, account_id: &str) -> anyhow::Result<()> {
        self.started
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(account_id);
        if let Some(session) = self.registry.get(CHANNEL_ID, account_id) {
            session.close();
            self.registry.remove_if_current(&session);
        }
        info!(account = account_id, "bridge account stopped");
        Ok(())
    }

    fn outbound(&self) -> Option<Arc<dyn ChannelOutbound>> {
        Some(self.outbound.clone())
    }

    fn status(&self) -> Option<Arc<dyn ChannelStatus>> {
        Some(Arc::new(BridgeStatus {
            registry: self.registry.clone(),
        }))
    }
}

/// Health probe: is a client connected for the account right now?
struct BridgeStatus {
    registry: Arc<BridgeRegistry>,
}

#[async_trait]
impl ChannelStatus for BridgeStatus {
    async fn probe(&self, account_id: &str) -> volery_channels::Result<ChannelHealthSnapshot> {
        let session = self.registry.get(CHANNEL_ID, account_id);
        let (healthy, detail) = match session {
            Some(session) if !session.is_closed() => {
                let remote = session.remote();
                (true, remote.client.or(remote.state))
            },
            _ => (false, Some("no bridge client connected".into())),
        };
        Ok(ChannelHealthSnapshot {
            account_id: account_id.to_string(),
            healthy,
            detail,
            checked_at: unix_now(),
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {serde_json::json, std::time::Duration, tokio::sync::mpsc};

    use {super::*, crate::session::BridgeSession};

    #[tokio::test]
    async fn start_validates_the_account_block() {
        let (registry, _events) = BridgeRegistry::new();
        let mut plugin = BridgePlugin::new(registry);
        plugin.start_account("main", json!({})).await.unwrap();
        assert_eq!(plugin.started_accounts(), ["main"]);

        let err = plugin
            .start_account("bad", json!({"dm_policy": "everyone"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("everyone"));
        assert_eq!(plugin.started_accounts(), ["main"]);
    }

    #[tokio::test]
    async fn stop_closes_the_live_session() {
        let (registry, _events) = BridgeRegistry::new();
        let mut plugin = BridgePlugin::new(registry.clone());
        plugin.start_account("main", json!({})).await.unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Arc::new(BridgeSession::new(
            CHANNEL_ID,
            "main",
            tx,
            Duration::from_secs(5),
        ));
        registry.insert(session.clone());

        plugin.stop_account("main").await.unwrap();
        assert!(session.is_closed());
        assert_eq!(registry.active_count(), 0);
        assert!(plugin.started_accounts().is_empty());
    }

    #[tokio::test]
    async fn probe_reflects_connection_state() {
        let (registry, _events) = BridgeRegistry::new();
        let plugin = BridgePlugin::new(registry.clone());
        let status = plugin.status().unwrap();

        let snapshot = status.probe("main").await.unwrap();
        assert!(!snapshot.healthy);

        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Arc::new(BridgeSession::new(
            CHANNEL_ID,
            "main",
            tx,
            Duration::from_secs(5),
        ));
        session.set_client(Some("test-client/1.0".into()));
        registry.insert(session);

        let snapshot = status.probe("main").await.unwrap();
        assert!(snapshot.healthy);
        assert_eq!(snapshot.detail.as_deref(), Some("test-client/1.0"));
    }

    #[test]
    fn dock_is_valid() {
        let (registry, _events) = BridgeRegistry::new();
        let plugin = BridgePlugin::new(registry);
        plugin.dock().validate().unwrap();
        assert_eq!(plugin.dock().text_chunk_limit, DEFAULT_CHUNK_LIMIT);
    }
}
