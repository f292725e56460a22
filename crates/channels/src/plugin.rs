use std::sync::Arc;

use {async_trait::async_trait, tracing::debug, volery_common::types::ReplyPayload};

use crate::{dock::ChannelDock, error::Result};

/// Text sent by the default [`ChannelOutbound::notify_approval`].
const APPROVAL_NOTICE: &str = "Pairing approved. Your messages now reach the assistant.";

// ── Channel events (diagnostics) ────────────────────────────────────────────

/// Diagnostic events emitted along the dispatch path.
///
/// Carries ids and counters only, never message bodies.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelEvent {
    InboundMessage {
        channel_id: String,
        account_id: String,
        chat_id: String,
        sender_id: String,
        access_granted: bool,
    },
    /// A message entered a debounce bucket.
    MessageQueued {
        channel_id: String,
        account_id: String,
        chat_id: String,
        pending: usize,
    },
    /// A debounced turn went to the agent seam.
    TurnDispatched {
        channel_id: String,
        account_id: String,
        chat_id: String,
        messages: usize,
    },
    /// A reply finished delivery (successfully or not).
    ReplyDelivered {
        channel_id: String,
        account_id: String,
        chat_id: String,
        chunks: usize,
        ok: bool,
    },
    /// A pairing code was issued to an unknown DM sender.
    PairingRequested {
        channel_id: String,
        account_id: String,
        sender_id: String,
        expires_at: i64,
    },
    /// A pairing request was resolved (approved, denied, revoked, expired).
    PairingResolved {
        channel_id: String,
        account_id: String,
        sender_id: String,
        resolution: String,
    },
    /// A channel account connected, disconnected, started, or stopped.
    AccountStatusChanged {
        channel_id: String,
        account_id: String,
        state: String,
    },
}

/// Fire-and-forget sink for diagnostic events.
pub trait ChannelEventSink: Send + Sync {
    fn emit(&self, event: ChannelEvent);
}

/// Default sink: structured debug logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl ChannelEventSink for TracingEventSink {
    fn emit(&self, event: ChannelEvent) {
        debug!(?event, "channel event");
    }
}

// ── Send receipts ───────────────────────────────────────────────────────────

/// Outcome of a single outbound send.
///
/// Transport failures surface as `ok: false` receipts; `Err` from outbound
/// methods is reserved for local failures (unknown account, serialization).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SendReceipt {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendReceipt {
    #[must_use]
    pub fn ok(message_id: Option<String>) -> Self {
        Self {
            ok: true,
            message_id,
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message_id: None,
            error: Some(message.into()),
        }
    }
}

// ── Plugin traits ───────────────────────────────────────────────────────────

/// Core channel plugin trait. Each messaging platform implements this.
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    /// Capability sheet; stable for the plugin's lifetime.
    fn dock(&self) -> &ChannelDock;

    /// Start an account with its parsed-opaque config block.
    async fn start_account(
        &mut self,
        account_id: &str,
        config: serde_json::Value,
    ) -> anyhow::Result<()>;

    /// Stop an account.
    async fn stop_account(&mut self, account_id: &str) -> anyhow::Result<()>;

    /// Outbound adapter for sending messages.
    fn outbound(&self) -> Option<Arc<dyn ChannelOutbound>>;

    /// Status adapter for health checks.
    fn status(&self) -> Option<Arc<dyn ChannelStatus>>;
}

/// Send messages to a channel.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    async fn send_text(&self, account_id: &str, to: &str, text: &str) -> Result<SendReceipt>;

    async fn send_media(
        &self,
        account_id: &str,
        to: &str,
        payload: &ReplyPayload,
    ) -> Result<SendReceipt>;

    /// Toggle a typing indicator. Callers treat failures as best-effort.
    async fn send_typing(&self, _account_id: &str, _to: &str, _active: bool) -> Result<()> {
        Ok(())
    }

    /// Canonicalize a raw reply target.
    fn normalize_target(&self, raw: &str) -> Result<String> {
        Ok(raw.trim().to_string())
    }

    /// One-time pairing-approved notice. Best-effort text by default.
    async fn notify_approval(&self, account_id: &str, to: &str) -> Result<()> {
        let receipt = self.send_text(account_id, to, APPROVAL_NOTICE).await?;
        if !receipt.ok {
            debug!(account_id, to, error = ?receipt.error, "approval notice not delivered");
        }
        Ok(())
    }
}

/// Probe channel account health.
#[async_trait]
pub trait ChannelStatus: Send + Sync {
    async fn probe(&self, account_id: &str) -> Result<ChannelHealthSnapshot>;
}

/// Channel health snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelHealthSnapshot {
    pub account_id: String,
    pub healthy: bool,
    pub detail: Option<String>,
    pub checked_at: i64,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct RecordingOutbound {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChannelOutbound for RecordingOutbound {
        async fn send_text(&self, _account_id: &str, _to: &str, text: &str) -> Result<SendReceipt> {
            self.sent
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(text.to_string());
            Ok(SendReceipt::ok(None))
        }

        async fn send_media(
            &self,
            _account_id: &str,
            _to: &str,
            _payload: &ReplyPayload,
        ) -> Result<SendReceipt> {
            Ok(SendReceipt::ok(None))
        }
    }

    #[test]
    fn receipt_constructors() {
        let ok = SendReceipt::ok(Some("m1".into()));
        assert!(ok.ok);
        assert_eq!(ok.message_id.as_deref(), Some("m1"));
        assert!(ok.error.is_none());

        let failed = SendReceipt::error("rate limited");
        assert!(!failed.ok);
        assert_eq!(failed.error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn receipt_serializes_flat() {
        let json = serde_json::to_value(SendReceipt::error("boom")).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "boom");
        assert!(json.get("message_id").is_none());
    }

    #[tokio::test]
    async fn default_normalize_target_trims() {
        let out = RecordingOutbound {
            sent: Mutex::new(vec![]),
        };
        assert_eq!(out.normalize_target("  chat-1  ").unwrap(), "chat-1");
    }

    #[tokio::test]
    async fn default_notify_approval_sends_text() {
        let out = RecordingOutbound {
            sent: Mutex::new(vec![]),
        };
        out.notify_approval("main", "chat-1").await.unwrap();
        let sent = out.sent.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("approved"));
    }

    #[test]
    fn events_serialize_tagged() {
        let ev = ChannelEvent::MessageQueued {
            channel_id: "bridge".into(),
            account_id: "main".into(),
            chat_id: "c1".into(),
            pending: 2,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["kind"], "message_queued");
        assert_eq!(json["pending"], 2);
    }
}
