//! Typed per-account channel configuration.
//!
//! The config file stores each account block as an opaque JSON value under
//! `channels.<channel_id>.<account_id>`; the owning channel parses it here.

use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    gating::{DmPolicy, GroupPolicy},
};

/// Per-account policy knobs shared by every channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelAccountConfig {
    /// Disabled accounts are kept in config but never started.
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub dm_policy: DmPolicy,
    pub group_policy: GroupPolicy,
    /// DM allowlist entries; `*` matches anyone.
    pub allow_from: Vec<String>,
    /// Group allowlist, matched against the group chat id.
    pub group_allow_from: Vec<String>,
    /// Patterns that count as mentioning the assistant.
    pub mention_patterns: Vec<String>,
    /// Overrides the dock's group-mention default when set.
    pub require_mention: Option<bool>,
    /// Per-account chunk limit, clamped to the dock hard limit.
    pub text_chunk_limit: Option<usize>,
    /// Per-account debounce window override.
    pub debounce_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl ChannelAccountConfig {
    /// Parse an account block from its opaque config value.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}
