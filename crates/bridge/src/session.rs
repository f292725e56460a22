//! One live bridge client connection.
//!
//! The session owns the write half (an unbounded channel drained by a
//! spawned writer task), the pending-request correlation map, and the
//! cancellation token shared by the writer, ping, and read tasks.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use {
    tokio::sync::{mpsc, oneshot},
    tokio_util::sync::CancellationToken,
    tracing::{debug, trace},
};

#[cfg(feature = "metrics")]
use volery_metrics::{counter, definitions};

use crate::{
    error::{BridgeError, Result},
    protocol::{RequestFrame, ResponseFrame, RpcError},
};

struct PendingRequest {
    sender: oneshot::Sender<std::result::Result<serde_json::Value, RpcError>>,
    created_at: Instant,
}

/// Client-reported connection state plus bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RemoteState {
    /// Client self-description from the `connect` handshake.
    pub client: Option<String>,
    /// Last state string from a `status` notification.
    pub state: Option<String>,
    /// Unix seconds of the last inbound frame.
    pub last_seen: i64,
}

/// A registered bridge connection for one `(channel, account)` pair.
pub struct BridgeSession {
    channel_id: String,
    account_id: String,
    /// Unique per connection; the registry uses it to tell a replaced
    /// session from its replacement.
    conn_id: String,
    writer: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    token: CancellationToken,
    remote: Mutex<RemoteState>,
    request_timeout: Duration,
}

impl BridgeSession {
    #[must_use]
    pub fn new(
        channel_id: impl Into<String>,
        account_id: impl Into<String>,
        writer: mpsc::UnboundedSender<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            account_id: account_id.into(),
            conn_id: uuid::Uuid::new_v4().to_string(),
            writer,
            pending: Mutex::new(HashMap::new()),
            token: CancellationToken::new(),
            remote: Mutex::new(RemoteState::default()),
            request_timeout,
        }
    }

    #[must_use]
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    #[must_use]
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Token cancelled when the session closes; the writer, ping, and
    /// read tasks all hang off it.
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.token.clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn remote(&self) -> RemoteState {
        self.lock_remote().clone()
    }

    pub fn set_client(&self, client: Option<String>) {
        self.lock_remote().client = client;
    }

    pub fn note_status(&self, state: &str) {
        self.lock_remote().state = Some(state.to_string());
    }

    pub fn touch(&self) {
        self.lock_remote().last_seen = volery_common::types::unix_now();
    }

    /// Issue a correlated request and await its response.
    pub async fn call(&self, method: &str, params: Option<serde_json::Value>) -> Result<serde_json::Value> {
        self.call_with_timeout(method, params, self.request_timeout).await
    }

    /// [`call`](Self::call) with an explicit deadline. On timeout the
    /// pending entry is removed so a late response is ignored instead of
    /// resolving a slot that has been reused.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id.clone(), PendingRequest {
            sender: tx,
            created_at: Instant::now(),
        });

        let frame = RequestFrame::request(id.clone(), method, params);
        let encoded = serde_json::to_string(&frame)?;
        if self.writer.send(encoded).is_err() {
            self.lock_pending().remove(&id);
            return Err(BridgeError::Disconnected);
        }
        trace!(
            account = %self.account_id,
            request = %id,
            method,
            "bridge request sent"
        );

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => Err(BridgeError::Rpc(error)),
            // Sender dropped: the session rejected everything on disconnect.
            Ok(Err(_)) => Err(BridgeError::Disconnected),
            Err(_) => {
                self.lock_pending().remove(&id);
                #[cfg(feature = "metrics")]
                counter!(definitions::BRIDGE_RPC_TIMEOUTS).increment(1);
                debug!(
                    account = %self.account_id,
                    request = %id,
                    method,
                    "bridge request timed out"
                );
                Err(BridgeError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            },
        }
    }

    /// Send a notification (no response expected).
    pub fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let frame = RequestFrame::notification(method, params);
        let encoded = serde_json::to_string(&frame)?;
        self.writer
            .send(encoded)
            .map_err(|_| BridgeError::Disconnected)
    }

    /// Send a raw pre-encoded frame (responses to client requests).
    pub fn send_raw(&self, encoded: String) -> Result<()> {
        self.writer
            .send(encoded)
            .map_err(|_| BridgeError::Disconnected)
    }

    /// Route an inbound response to its pending request.
    ///
    /// A response with no matching pending entry is ignored: it either
    /// timed out already or belongs to a replaced session.
    pub fn handle_response(&self, response: ResponseFrame) {
        let id = response.id.to_string();
        let Some(pending) = self.lock_pending().remove(&id) else {
            debug!(
                account = %self.account_id,
                request = %id,
                "response for unknown request id; ignoring"
            );
            return;
        };
        trace!(
            account = %self.account_id,
            request = %id,
            elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
            ok = response.error.is_none(),
            "bridge response received"
        );
        let outcome = match response.error {
            Some(error) => Err(error),
            None => Ok(response.result.unwrap_or(serde_json::Value::Null)),
        };
        let _ = pending.sender.send(outcome);
    }

    /// Close the session: cancel the shared token and reject every
    /// pending request with [`BridgeError::Disconnected`].
    pub fn close(&self) {
        self.token.cancel();
        let rejected = {
            let mut pending = self.lock_pending();
            let count = pending.len();
            pending.clear();
            count
        };
        if rejected > 0 {
            debug!(
                account = %self.account_id,
                rejected,
                "session closed with requests in flight"
            );
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_remote(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.remote.lock().unwrap_or_else(|e| e.into_inner())
    }
}
