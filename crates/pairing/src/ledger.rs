//! Pairing state machine over plain maps.
//!
//! Synchronous and clock-free: callers pass the current unix time, which
//! keeps expiry behavior testable and lets the file store persist snapshots.

use std::collections::HashMap;

use {rand::Rng, serde::{Deserialize, Serialize}};

/// Code alphabet without look-alike characters (no I/L/O/0/1).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Length of generated pairing codes.
pub const CODE_LEN: usize = 8;

/// Authorization state of one sender on one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingStatus {
    Unpaired,
    Pending,
    Paired,
}

impl std::fmt::Display for PairingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unpaired => write!(f, "unpaired"),
            Self::Pending => write!(f, "pending"),
            Self::Paired => write!(f, "paired"),
        }
    }
}

/// An open pairing request awaiting operator approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPairing {
    pub channel_id: String,
    pub account_id: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub code: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl PendingPairing {
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// A sender the operator has approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedSender {
    pub channel_id: String,
    pub account_id: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub paired_at: i64,
    /// Code that was approved, absent for direct operator inserts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_code: Option<String>,
    /// Whether the one-time approval notice has been delivered.
    #[serde(default)]
    pub notified: bool,
}

/// Generate a short human-relayable pairing code.
#[must_use]
pub fn generate_pairing_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[idx] as char
        })
        .collect()
}

type SenderKey = (String, String, String);

fn key(channel_id: &str, account_id: &str, sender_id: &str) -> SenderKey {
    (
        channel_id.to_string(),
        account_id.to_string(),
        sender_id.to_string(),
    )
}

/// Serializable whole-ledger snapshot used by the file store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub pending: Vec<PendingPairing>,
    #[serde(default)]
    pub paired: Vec<PairedSender>,
}

/// Pairing state for all accounts: pending requests and paired senders.
///
/// Sender IDs are expected pre-normalized (lowercased, trimmed) by the
/// caller; the ledger matches them exactly. Codes match case-insensitively.
#[derive(Debug, Default)]
pub struct PairingLedger {
    pending: HashMap<SenderKey, PendingPairing>,
    paired: HashMap<SenderKey, PairedSender>,
}

impl PairingLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let mut ledger = Self::new();
        for p in snapshot.pending {
            ledger
                .pending
                .insert(key(&p.channel_id, &p.account_id, &p.sender_id), p);
        }
        for p in snapshot.paired {
            ledger
                .paired
                .insert(key(&p.channel_id, &p.account_id, &p.sender_id), p);
        }
        ledger
    }

    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut snapshot = LedgerSnapshot {
            pending: self.pending.values().cloned().collect(),
            paired: self.paired.values().cloned().collect(),
        };
        // Stable output keeps file diffs readable.
        snapshot.pending.sort_by(|a, b| a.sender_id.cmp(&b.sender_id));
        snapshot.paired.sort_by(|a, b| a.sender_id.cmp(&b.sender_id));
        snapshot
    }

    /// Current status of a sender. Expired pending requests read as unpaired.
    #[must_use]
    pub fn resolve(
        &self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
        now: i64,
    ) -> PairingStatus {
        let k = key(channel_id, account_id, sender_id);
        if self.paired.contains_key(&k) {
            return PairingStatus::Paired;
        }
        match self.pending.get(&k) {
            Some(p) if !p.is_expired(now) => PairingStatus::Pending,
            _ => PairingStatus::Unpaired,
        }
    }

    /// Open (or return the existing) pairing request for a sender.
    ///
    /// Idempotent while a request is pending: the same code is returned, no
    /// new record is minted. An expired request is replaced with a fresh one.
    pub fn request(
        &mut self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
        sender_name: Option<&str>,
        now: i64,
        ttl_secs: i64,
    ) -> PendingPairing {
        let k = key(channel_id, account_id, sender_id);
        if let Some(existing) = self.pending.get(&k)
            && !existing.is_expired(now)
        {
            return existing.clone();
        }
        let record = PendingPairing {
            channel_id: channel_id.to_string(),
            account_id: account_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.map(String::from),
            code: generate_pairing_code(),
            created_at: now,
            expires_at: now + ttl_secs,
        };
        self.pending.insert(k, record.clone());
        record
    }

    /// Approve a pending request by its code; moves the sender to paired.
    ///
    /// An expired code is evicted and reported; nothing else changes. An
    /// unknown code changes nothing.
    pub fn approve_code(
        &mut self,
        channel_id: &str,
        account_id: &str,
        code: &str,
        now: i64,
    ) -> crate::Result<PairedSender> {
        let k = self
            .find_pending_by_code(channel_id, account_id, code)
            .ok_or(crate::Error::CodeNotFound)?;
        let pending = self.pending.remove(&k).ok_or(crate::Error::CodeNotFound)?;
        if pending.is_expired(now) {
            // Evicted either way; the sender has to re-request.
            return Err(crate::Error::CodeExpired);
        }
        let paired = PairedSender {
            channel_id: pending.channel_id,
            account_id: pending.account_id,
            sender_id: pending.sender_id,
            sender_name: pending.sender_name,
            paired_at: now,
            approved_code: Some(pending.code),
            notified: false,
        };
        self.paired.insert(k, paired.clone());
        Ok(paired)
    }

    /// Deny a pending request by its code; the sender returns to unpaired.
    pub fn deny_code(
        &mut self,
        channel_id: &str,
        account_id: &str,
        code: &str,
    ) -> crate::Result<PendingPairing> {
        let k = self
            .find_pending_by_code(channel_id, account_id, code)
            .ok_or(crate::Error::CodeNotFound)?;
        self.pending.remove(&k).ok_or(crate::Error::CodeNotFound)
    }

    /// Revoke a paired sender. Unknown senders are rejected without mutation.
    pub fn revoke(
        &mut self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
    ) -> crate::Result<PairedSender> {
        let k = key(channel_id, account_id, sender_id);
        self.paired.remove(&k).ok_or(crate::Error::SenderNotPaired)
    }

    /// Directly insert a paired sender (operator-driven), bypassing the
    /// request/approve handshake. Re-inserting keeps the original pairing.
    pub fn upsert_allowed(
        &mut self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
        sender_name: Option<&str>,
        now: i64,
    ) -> PairedSender {
        let k = key(channel_id, account_id, sender_id);
        self.pending.remove(&k);
        self.paired
            .entry(k)
            .or_insert_with(|| PairedSender {
                channel_id: channel_id.to_string(),
                account_id: account_id.to_string(),
                sender_id: sender_id.to_string(),
                sender_name: sender_name.map(String::from),
                paired_at: now,
                approved_code: None,
                // Operator-driven adds skip the approval notice.
                notified: true,
            })
            .clone()
    }

    /// Record that the approval notice reached the sender.
    pub fn mark_notified(
        &mut self,
        channel_id: &str,
        account_id: &str,
        sender_id: &str,
    ) -> crate::Result<PairedSender> {
        let k = key(channel_id, account_id, sender_id);
        let Some(record) = self.paired.get_mut(&k) else {
            return Err(crate::Error::SenderNotPaired);
        };
        record.notified = true;
        Ok(record.clone())
    }

    /// Non-expired pending requests for one account.
    #[must_use]
    pub fn list_pending(
        &self,
        channel_id: &str,
        account_id: &str,
        now: i64,
    ) -> Vec<PendingPairing> {
        let mut out: Vec<_> = self
            .pending
            .values()
            .filter(|p| {
                p.channel_id == channel_id && p.account_id == account_id && !p.is_expired(now)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Paired senders for one account.
    #[must_use]
    pub fn list_paired(&self, channel_id: &str, account_id: &str) -> Vec<PairedSender> {
        let mut out: Vec<_> = self
            .paired
            .values()
            .filter(|p| p.channel_id == channel_id && p.account_id == account_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.paired_at.cmp(&b.paired_at));
        out
    }

    /// Drop expired pending requests.
    pub fn evict_expired(&mut self, now: i64) {
        self.pending.retain(|_, p| !p.is_expired(now));
    }

    fn find_pending_by_code(
        &self,
        channel_id: &str,
        account_id: &str,
        code: &str,
    ) -> Option<SenderKey> {
        self.pending
            .iter()
            .find(|(_, p)| {
                p.channel_id == channel_id
                    && p.account_id == account_id
                    && p.code.eq_ignore_ascii_case(code)
            })
            .map(|(k, _)| k.clone())
    }
}
