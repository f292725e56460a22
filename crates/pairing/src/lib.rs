//! Sender pairing for channel accounts.
//!
//! Tracks which channel-scoped senders are authorized to talk to an account.
//! Unknown senders request pairing and receive a short code; an operator
//! approves or denies the code; approved senders stay paired until revoked.
//!
//! ```text
//! unpaired --request--> pending --approve--> paired
//!    ^                     |
//!    |<-------deny---------|
//!    |<------expire--------|
//! paired --revoke--> unpaired
//! ```
//!
//! The state machine lives in [`ledger::PairingLedger`]; [`store::PairingStore`]
//! is the async boundary with in-memory and JSON-file implementations.

pub mod error;
pub mod ledger;
pub mod store;
pub mod store_file;
pub mod store_memory;

pub use {
    error::{Error, Result},
    ledger::{PairedSender, PairingLedger, PairingStatus, PendingPairing, generate_pairing_code},
    store::PairingStore,
    store_file::FilePairingStore,
    store_memory::MemoryPairingStore,
};
