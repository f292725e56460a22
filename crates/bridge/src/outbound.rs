//! [`ChannelOutbound`] implemented over bridge RPC.

use std::sync::Arc;

use {
    async_trait::async_trait,
    serde_json::json,
    tracing::debug,
    volery_channels::{ChannelOutbound, SendReceipt},
    volery_common::types::ReplyPayload,
};

use crate::{
    error::BridgeError, protocol::methods, registry::BridgeRegistry, session::BridgeSession,
};

/// Sends through whichever bridge session is currently registered for
/// the target account. Transport problems (no client, timeouts, RPC
/// errors) come back as `ok: false` receipts, never as `Err`.
pub struct BridgeOutbound {
    registry: Arc<BridgeRegistry>,
    channel_id: String,
}

impl BridgeOutbound {
    #[must_use]
    pub fn new(registry: Arc<BridgeRegistry>, channel_id: impl Into<String>) -> Self {
        Self {
            registry,
            channel_id: channel_id.into(),
        }
    }

    fn session(&self, account_id: &str) -> Option<Arc<BridgeSession>> {
        self.registry.get(&self.channel_id, account_id)
    }

    async fn call_send(&self, account_id: &str, params: serde_json::Value) -> SendReceipt {
        let Some(session) = self.session(account_id) else {
            return SendReceipt::error(BridgeError::not_connected(account_id).to_string());
        };
        match session.call(methods::SEND, Some(params)).await {
            Ok(result) => receipt_from(&result),
            Err(err) => SendReceipt::error(err.to_string()),
        }
    }
}

/// The wire result is camelCase (`{ok, messageId?, error?}`); absent `ok`
/// counts as success so minimal clients can answer `{}`.
fn receipt_from(result: &serde_json::Value) -> SendReceipt {
    SendReceipt {
        ok: result.get("ok").and_then(serde_json::Value::as_bool).unwrap_or(true),
        message_id: result
            .get("messageId")
            .and_then(serde_json::Value::as_str)
            .map(String::from),
        error: result
            .get("error")
            .and_then(serde_json::Value::as_str)
            .map(String::from),
    }
}

#[async_trait]
impl ChannelOutbound for BridgeOutbound {
    async fn send_text(
        &self,
        account_id: &str,
        to: &str,
        text: &str,
    ) -> volery_channels::Result<SendReceipt> {
        Ok(self
            .call_send(account_id, json!({ "to": to, "text": text }))
            .await)
    }

    async fn send_media(
        &self,
        account_id: &str,
        to: &str,
        payload: &ReplyPayload,
    ) -> volery_channels::Result<SendReceipt> {
        let Some(media) = payload.media.as_ref() else {
            return self.send_text(account_id, to, &payload.text).await;
        };
        let mut params = json!({
            "to": to,
            "text": payload.text,
            "mediaUrl": media.url,
            "mimeType": media.mime_type,
        });
        if let (Some(obj), Some(name)) = (params.as_object_mut(), media.file_name.as_ref()) {
            obj.insert("fileName".into(), json!(name));
        }
        Ok(self.call_send(account_id, params).await)
    }

    async fn send_typing(
        &self,
        account_id: &str,
        to: &str,
        active: bool,
    ) -> volery_channels::Result<()> {
        let Some(session) = self.session(account_id) else {
            return Ok(());
        };
        if let Err(err) = session.notify(methods::TYPING, Some(json!({ "to": to, "active": active })))
        {
            debug!(account = account_id, %err, "typing notification not delivered");
        }
        Ok(())
    }
}
