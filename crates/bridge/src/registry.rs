//! Session registry: at most one live bridge connection per account.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use {tokio::sync::mpsc, tracing::info};

#[cfg(feature = "metrics")]
use volery_metrics::{definitions, gauge};

use crate::session::BridgeSession;

/// Events the registry surfaces to the composition root.
#[derive(Debug)]
pub enum BridgeEvent {
    /// A `message` notification from a client, still in wire shape;
    /// the inbound pipeline normalizes it.
    Inbound {
        channel_id: String,
        account_id: String,
        payload: serde_json::Value,
    },
    /// A session connected, disconnected, or relayed a client status.
    Status {
        channel_id: String,
        account_id: String,
        state: String,
    },
}

type SessionKey = (String, String);

/// Owns the per-account session map. Created by the composition root and
/// shared with the WebSocket server and the bridge outbound adapter.
pub struct BridgeRegistry {
    sessions: Mutex<HashMap<SessionKey, Arc<BridgeSession>>>,
    events: mpsc::UnboundedSender<BridgeEvent>,
}

impl BridgeRegistry {
    /// Build a registry; bridge events arrive on the returned receiver.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                sessions: Mutex::new(HashMap::new()),
                events: tx,
            }),
            rx,
        )
    }

    /// Register a session, replacing any prior one for the same account.
    ///
    /// Insert first, close the old session after: the account never
    /// observes a window with no registered session.
    pub fn insert(&self, session: Arc<BridgeSession>) {
        let key = key_of(&session);
        let previous = {
            let mut sessions = self.lock_sessions();
            let previous = sessions.insert(key, session.clone());
            #[cfg(feature = "metrics")]
            gauge!(definitions::BRIDGE_SESSIONS_ACTIVE).set(sessions.len() as f64);
            previous
        };
        if let Some(old) = previous {
            info!(
                channel = session.channel_id(),
                account = session.account_id(),
                old_conn = old.conn_id(),
                new_conn = session.conn_id(),
                "replacing existing bridge session"
            );
            old.close();
        }
    }

    /// Deregister a session, but only if it is still the current one for
    /// its account; a replaced session must not evict its replacement.
    pub fn remove_if_current(&self, session: &BridgeSession) -> bool {
        let mut sessions = self.lock_sessions();
        let key = (
            session.channel_id().to_string(),
            session.account_id().to_string(),
        );
        let is_current = sessions
            .get(&key)
            .is_some_and(|current| current.conn_id() == session.conn_id());
        if is_current {
            sessions.remove(&key);
            #[cfg(feature = "metrics")]
            gauge!(definitions::BRIDGE_SESSIONS_ACTIVE).set(sessions.len() as f64);
        }
        is_current
    }

    #[must_use]
    pub fn get(&self, channel_id: &str, account_id: &str) -> Option<Arc<BridgeSession>> {
        self.lock_sessions()
            .get(&(channel_id.to_string(), account_id.to_string()))
            .cloned()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Connected account ids per channel, sorted.
    #[must_use]
    pub fn connected_accounts(&self, channel_id: &str) -> Vec<String> {
        let mut accounts: Vec<String> = self
            .lock_sessions()
            .keys()
            .filter(|(channel, _)| channel == channel_id)
            .map(|(_, account)| account.clone())
            .collect();
        accounts.sort();
        accounts
    }

    /// Close every session (shutdown path).
    pub fn close_all(&self) {
        let drained: Vec<Arc<BridgeSession>> = {
            let mut sessions = self.lock_sessions();
            let drained = sessions.drain().map(|(_, s)| s).collect();
            #[cfg(feature = "metrics")]
            gauge!(definitions::BRIDGE_SESSIONS_ACTIVE).set(0.0);
            drained
        };
        for session in drained {
            session.close();
        }
    }

    /// Forward an event to the composition root's drain.
    pub fn emit(&self, event: BridgeEvent) {
        let _ = self.events.send(event);
    }

    fn lock_sessions(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<SessionKey, Arc<BridgeSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn key_of(session: &BridgeSession) -> SessionKey {
    (
        session.channel_id().to_string(),
        session.account_id().to_string(),
    )
}
