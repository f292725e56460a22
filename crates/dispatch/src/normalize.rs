//! Turning raw channel payloads into the canonical [`InboundMessage`].
//!
//! Channel clients speak a loose camelCase JSON shape; everything past
//! this module sees only the canonical envelope. Malformed payloads are
//! logged and dropped, never bounced back to the sender.

use {
    serde::Deserialize,
    tracing::{debug, warn},
    volery_channels::gating::normalize_sender,
    volery_common::types::{ChatType, InboundMessage, MediaRef, unix_now},
};

/// Message payload as channel clients put it on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    chat_id: Option<WireId>,
    #[serde(default)]
    chat_type: Option<String>,
    #[serde(default)]
    sender_id: Option<WireId>,
    #[serde(default)]
    sender_name: Option<String>,
    #[serde(default)]
    message_id: Option<WireId>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    media: Vec<WireMedia>,
    #[serde(default)]
    timestamp: Option<f64>,
}

/// Platforms disagree on whether ids are strings or numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(i64),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(num) => num.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMedia {
    url: String,
    mime_type: String,
    #[serde(default)]
    file_name: Option<String>,
}

/// Normalize a raw inbound payload into an [`InboundMessage`].
///
/// Returns `None` when the payload is malformed (missing `chatId` or
/// `senderId`, unknown `chatType`) or carries neither text nor media.
/// The sender id is lowercased and stripped of a leading `@` so that
/// allowlists and the pairing ledger see one spelling per sender.
pub fn normalize_inbound(
    channel_id: &str,
    account_id: &str,
    raw: &serde_json::Value,
) -> Option<InboundMessage> {
    let wire: WireMessage = match serde_json::from_value(raw.clone()) {
        Ok(wire) => wire,
        Err(err) => {
            warn!(
                channel = channel_id,
                account = account_id,
                %err,
                "discarding malformed message payload"
            );
            return None;
        },
    };

    let chat_id = match wire.chat_id.map(WireId::into_string) {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            warn!(
                channel = channel_id,
                account = account_id,
                "discarding message payload without chatId"
            );
            return None;
        },
    };

    let sender_id = match wire.sender_id.map(WireId::into_string) {
        Some(id) if !id.trim().is_empty() => normalize_sender(&id),
        _ => {
            warn!(
                channel = channel_id,
                account = account_id,
                chat = %chat_id,
                "discarding message payload without senderId"
            );
            return None;
        },
    };

    let chat_type = match wire.chat_type.as_deref() {
        None => ChatType::Dm,
        Some(kind) => match kind.to_ascii_lowercase().as_str() {
            "dm" => ChatType::Dm,
            "group" => ChatType::Group,
            "channel" => ChatType::Channel,
            other => {
                warn!(
                    channel = channel_id,
                    account = account_id,
                    chat_type = other,
                    "discarding message payload with unknown chatType"
                );
                return None;
            },
        },
    };

    let body = wire.text.unwrap_or_default();
    let attachments: Vec<MediaRef> = wire
        .media
        .into_iter()
        .map(|media| MediaRef {
            url: media.url,
            mime_type: media.mime_type,
            file_name: media.file_name,
        })
        .collect();

    if body.trim().is_empty() && attachments.is_empty() {
        debug!(
            channel = channel_id,
            account = account_id,
            chat = %chat_id,
            "dropping message with neither text nor media"
        );
        return None;
    }

    Some(InboundMessage {
        channel_id: channel_id.to_string(),
        account_id: account_id.to_string(),
        chat_id,
        chat_type,
        sender_id,
        sender_name: wire.sender_name.filter(|name| !name.trim().is_empty()),
        message_id: wire.message_id.map(WireId::into_string),
        body,
        attachments,
        was_mentioned: false,
        timestamp: wire.timestamp.map_or_else(unix_now, |ts| ts as i64),
    })
}
