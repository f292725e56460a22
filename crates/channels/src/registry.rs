use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

#[cfg(feature = "metrics")]
use volery_metrics::{definitions, gauge};

use crate::{
    dock::ChannelDock,
    error::{Error, Result},
    plugin::{ChannelOutbound, ChannelPlugin, ChannelStatus},
};

/// Registry of all loaded channel plugins.
///
/// Owned by the composition root; lookups by unknown id return `None` and
/// callers log and drop.
pub struct ChannelRegistry {
    plugins: HashMap<String, Box<dyn ChannelPlugin>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    /// Register a plugin after validating its dock; duplicate channel ids
    /// are rejected.
    pub fn register(&mut self, plugin: Box<dyn ChannelPlugin>) -> Result<()> {
        let dock = plugin.dock();
        dock.validate()?;
        let channel_id = dock.channel_id.clone();
        if self.plugins.contains_key(&channel_id) {
            return Err(Error::duplicate_channel(channel_id));
        }
        self.plugins.insert(channel_id, plugin);
        #[cfg(feature = "metrics")]
        gauge!(definitions::CHANNELS_REGISTERED).set(self.plugins.len() as f64);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&dyn ChannelPlugin> {
        self.plugins.get(id).map(|p| p.as_ref())
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Box<dyn ChannelPlugin>> {
        self.plugins.get_mut(id)
    }

    pub fn dock(&self, id: &str) -> Option<ChannelDock> {
        self.plugins.get(id).map(|p| p.dock().clone())
    }

    pub fn outbound(&self, id: &str) -> Option<Arc<dyn ChannelOutbound>> {
        self.plugins.get(id).and_then(|p| p.outbound())
    }

    pub fn status(&self, id: &str) -> Option<Arc<dyn ChannelStatus>> {
        self.plugins.get(id).and_then(|p| p.status())
    }

    /// Registered channel ids, sorted for stable output.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.plugins.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Cheap shared handle over the registry.
///
/// Adapters are cloned out under the lock so no await runs while holding it.
#[derive(Clone)]
pub struct SharedChannels {
    inner: Arc<RwLock<ChannelRegistry>>,
}

impl SharedChannels {
    #[must_use]
    pub fn new(registry: ChannelRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }

    pub async fn contains(&self, channel_id: &str) -> bool {
        self.inner.read().await.get(channel_id).is_some()
    }

    pub async fn dock(&self, channel_id: &str) -> Option<ChannelDock> {
        self.inner.read().await.dock(channel_id)
    }

    pub async fn outbound(&self, channel_id: &str) -> Option<Arc<dyn ChannelOutbound>> {
        self.inner.read().await.outbound(channel_id)
    }

    pub async fn status(&self, channel_id: &str) -> Option<Arc<dyn ChannelStatus>> {
        self.inner.read().await.status(channel_id)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner.read().await.ids()
    }

    /// Start an account on its channel. Holds the write lock for the
    /// duration; account lifecycle changes are rare.
    pub async fn start_account(
        &self,
        channel_id: &str,
        account_id: &str,
        config: serde_json::Value,
    ) -> anyhow::Result<()> {
        let mut registry = self.inner.write().await;
        let Some(plugin) = registry.get_mut(channel_id) else {
            return Err(Error::unknown_channel(channel_id).into());
        };
        plugin.start_account(account_id, config).await
    }

    pub async fn stop_account(&self, channel_id: &str, account_id: &str) -> anyhow::Result<()> {
        let mut registry = self.inner.write().await;
        let Some(plugin) = registry.get_mut(channel_id) else {
            return Err(Error::unknown_channel(channel_id).into());
        };
        plugin.stop_account(account_id).await
    }
}
