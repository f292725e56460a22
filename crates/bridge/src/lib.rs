//! WebSocket bridge for out-of-process channel clients.
//!
//! A bridge client (say, a desktop-automation process driving a chat app
//! without a server API) connects to `/channels/{channel_id}`, performs a
//! `connect` handshake, and then speaks JSON-RPC 2.0 both ways: the
//! server issues correlated requests (`send`, `getStatus`, `ping`) and
//! the client pushes `message`/`status` notifications that flow into the
//! inbound pipeline. One session per account; a new connection replaces
//! the old one.

pub mod error;
pub mod outbound;
pub mod plugin;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use {
    error::{BridgeError, Result},
    outbound::BridgeOutbound,
    plugin::BridgePlugin,
    registry::{BridgeEvent, BridgeRegistry},
    server::{BridgeServerState, router},
    session::BridgeSession,
};
