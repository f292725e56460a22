use crate::protocol::RpcError;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced by bridge RPC calls.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No live session for the account.
    #[error("no bridge client connected for account '{account_id}'")]
    NotConnected { account_id: String },

    /// The client answered with an error response.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// No response arrived inside the request deadline.
    #[error("bridge request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The session went away while the request was in flight.
    #[error("bridge session disconnected")]
    Disconnected,

    #[error("bridge frame error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    #[must_use]
    pub fn not_connected(account_id: impl Into<String>) -> Self {
        Self::NotConnected {
            account_id: account_id.into(),
        }
    }
}
