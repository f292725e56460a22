//! Storage-agnostic pairing operations.

use async_trait::async_trait;

use crate::{
    Result,
    ledger::{PairedSender, PairingStatus, PendingPairing},
};

/// Default lifetime of a pairing code, in seconds.
pub const DEFAULT_TTL_SECS: i64 = 3_600;

/// Async facade over a [`crate::PairingLedger`], backed by memory or disk.
///
/// Implementations take the current time themselves; the ledger underneath
/// stays clock-free.
#[async_trait]
pub trait PairingStore: Send + Sync {
    /// Current status of a sender on an account.
    async fn resolve(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
    ) -> Result<PairingStatus>;

    /// Open (or refresh) a pairing request and return its code record.
    async fn request(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
        sender_name: Option<&str>,
    ) -> Result<PendingPairing>;

    /// Approve a pending request by code.
    async fn approve_code(
        &self,
        channel_id: &str,
        account_id: &str,
        code: &str,
    ) -> Result<PairedSender>;

    /// Deny a pending request by code.
    async fn deny_code(
        &self,
        channel_id: &str,
        account_id: &str,
        code: &str,
    ) -> Result<PendingPairing>;

    /// Remove a paired sender.
    async fn revoke(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
    ) -> Result<PairedSender>;

    /// Pair a sender directly without a code handshake.
    async fn upsert_allowed(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
        sender_name: Option<&str>,
    ) -> Result<PairedSender>;

    /// Record that the one-time approval notice was delivered.
    async fn mark_notified(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
    ) -> Result<PairedSender>;

    /// Non-expired pending requests for an account.
    async fn list_pending(&self, channel_id: &str, account_id: &str)
    -> Result<Vec<PendingPairing>>;

    /// Paired senders for an account.
    async fn list_paired(&self, channel_id: &str, account_id: &str) -> Result<Vec<PairedSender>>;
}
