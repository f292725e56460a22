//! Canonical message types shared by the channel plugins and the dispatch
//! pipeline.

use serde::{Deserialize, Serialize};

/// Kind of conversation a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Dm,
    Group,
    Channel,
}

impl ChatType {
    /// True for multi-party contexts where mention gating applies.
    #[must_use]
    pub fn is_multi_party(self) -> bool {
        matches!(self, Self::Group | Self::Channel)
    }
}

impl std::fmt::Display for ChatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dm => write!(f, "dm"),
            Self::Group => write!(f, "group"),
            Self::Channel => write!(f, "channel"),
        }
    }
}

/// Reference to a media object carried alongside a message.
///
/// The runtime treats media as opaque: URLs (including `data:` URIs) pass
/// through to the channel adapter untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// Canonical inbound envelope produced by the normalizer.
///
/// Everything downstream of a channel adapter (gating, debouncing, the agent
/// seam) operates on this shape only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_id: String,
    pub account_id: String,
    pub chat_id: String,
    pub chat_type: ChatType,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<MediaRef>,
    #[serde(default)]
    pub was_mentioned: bool,
    pub timestamp: i64,
}

impl InboundMessage {
    #[must_use]
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(&self.channel_id, &self.account_id, &self.chat_id)
    }
}

/// Reply produced at the agent seam: text plus optional media.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyPayload {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
}

impl ReplyPayload {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
        }
    }
}

/// Where a reply should be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTarget {
    pub channel_id: String,
    pub account_id: String,
    pub chat_id: String,
}

/// Identity of one conversation: the debounce bucket key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub channel_id: String,
    pub account_id: String,
    pub chat_id: String,
}

impl ConversationKey {
    #[must_use]
    pub fn new(
        channel_id: impl Into<String>,
        account_id: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            account_id: account_id.into(),
            chat_id: chat_id.into(),
        }
    }

    #[must_use]
    pub fn reply_target(&self) -> ReplyTarget {
        ReplyTarget {
            channel_id: self.channel_id.clone(),
            account_id: self.account_id.clone(),
            chat_id: self.chat_id.clone(),
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.channel_id, self.account_id, self.chat_id)
    }
}

/// Current unix time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
