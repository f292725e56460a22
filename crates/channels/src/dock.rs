//! Channel capability contract.
//!
//! A [`ChannelDock`] declares what a concrete channel can do; dispatch and
//! gating code consults it instead of hardcoding per-platform behavior.

use {serde::{Deserialize, Serialize}, volery_common::types::ChatType};

use crate::error::{Error, Result};

/// Media directions a channel supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSupport {
    pub inbound: bool,
    pub outbound: bool,
}

impl MediaSupport {
    #[must_use]
    pub fn both() -> Self {
        Self {
            inbound: true,
            outbound: true,
        }
    }

    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

/// Capability sheet for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDock {
    /// Stable lowercase identifier ("bridge", "telegram").
    pub channel_id: String,
    /// Human-readable name.
    pub label: String,
    /// Chat types the channel can carry.
    pub chat_types: Vec<ChatType>,
    pub media: MediaSupport,
    /// Hard per-message character limit; 0 means unlimited.
    pub text_chunk_limit: usize,
    pub typing_indicators: bool,
    /// Whether group chats need an explicit mention by default.
    pub default_require_mention_in_groups: bool,
    /// Channel-suggested debounce window in milliseconds; `None` defers to
    /// the global dispatcher default.
    pub debounce_default_ms: Option<u64>,
}

impl ChannelDock {
    /// Reject docks that would misbehave at runtime. Called at registration.
    pub fn validate(&self) -> Result<()> {
        if self.channel_id.is_empty() {
            return Err(Error::invalid_input("channel_id must not be empty"));
        }
        if !self
            .channel_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::invalid_input(format!(
                "channel_id `{}` must be lowercase alphanumeric or `-`",
                self.channel_id
            )));
        }
        if self.label.trim().is_empty() {
            return Err(Error::invalid_input("label must not be empty"));
        }
        if self.chat_types.is_empty() {
            return Err(Error::invalid_input("at least one chat type is required"));
        }
        Ok(())
    }

    #[must_use]
    pub fn supports_chat_type(&self, chat_type: ChatType) -> bool {
        self.chat_types.contains(&chat_type)
    }

    /// Whether a message in `chat_type` must mention the assistant.
    ///
    /// DMs never require a mention. In multi-party chats an account-level
    /// override wins over the dock default.
    #[must_use]
    pub fn resolve_require_mention(
        &self,
        chat_type: ChatType,
        account_override: Option<bool>,
    ) -> bool {
        if !chat_type.is_multi_party() {
            return false;
        }
        account_override.unwrap_or(self.default_require_mention_in_groups)
    }

    /// Debounce window for an account, if either layer configures one.
    ///
    /// Account override wins, then the channel default; `None` leaves the
    /// choice to the global dispatcher setting.
    #[must_use]
    pub fn resolve_debounce_window(&self, account_override: Option<u64>) -> Option<u64> {
        account_override.or(self.debounce_default_ms)
    }

    /// Effective chunk limit for an account.
    ///
    /// An override of 0 or absence falls back to the dock limit; overrides
    /// above the platform hard limit are clamped down to it.
    #[must_use]
    pub fn resolve_chunk_limit(&self, account_override: Option<usize>) -> usize {
        match account_override {
            Some(n) if n > 0 => {
                if self.text_chunk_limit > 0 {
                    n.min(self.text_chunk_limit)
                } else {
                    n
                }
            },
            _ => self.text_chunk_limit,
        }
    }
}
