//! Channel plugin system.
//!
//! Each channel implements [`plugin::ChannelPlugin`] and describes itself
//! with a [`dock::ChannelDock`] capability sheet. Gating (allowlists,
//! mentions, DM/group policies) lives here so every channel enforces the
//! same rules.

pub mod config;
pub mod dock;
pub mod error;
pub mod gating;
pub mod plugin;
pub mod registry;
pub mod store;
pub mod store_file;

pub use {
    config::ChannelAccountConfig,
    dock::{ChannelDock, MediaSupport},
    error::{Error, Result},
    plugin::{
        ChannelEvent, ChannelEventSink, ChannelHealthSnapshot, ChannelOutbound, ChannelPlugin,
        ChannelStatus, SendReceipt, TracingEventSink,
    },
    registry::{ChannelRegistry, SharedChannels},
    store::{AccountStore, MemoryAccountStore, StoredAccount},
    store_file::FileAccountStore,
};
