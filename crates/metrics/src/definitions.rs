//! Metric name and label definitions.
//!
//! Every metric volery records is named here so dashboards and alerts have
//! one place to look.

/// Inbound messages accepted by the pipeline.
pub const INBOUND_MESSAGES: &str = "volery_inbound_messages_total";
/// Inbound messages dropped before dispatch; labelled with [`LABEL_REASON`].
pub const INBOUND_DROPPED: &str = "volery_inbound_dropped_total";
/// Debounce buckets flushed into turns.
pub const DEBOUNCE_FLUSH: &str = "volery_debounce_flush_total";
/// Turns handed to the agent seam.
pub const TURNS_DISPATCHED: &str = "volery_turns_dispatched_total";
/// Reply chunks delivered to channels.
pub const REPLY_CHUNKS_SENT: &str = "volery_reply_chunks_sent_total";
/// Reply sends that came back failed.
pub const REPLY_SEND_FAILURES: &str = "volery_reply_send_failures_total";
/// Pairing codes issued to unknown senders.
pub const PAIRING_REQUESTS: &str = "volery_pairing_requests_total";
/// Currently connected bridge sessions (gauge).
pub const BRIDGE_SESSIONS_ACTIVE: &str = "volery_bridge_sessions_active";
/// Bridge RPC calls that timed out.
pub const BRIDGE_RPC_TIMEOUTS: &str = "volery_bridge_rpc_timeouts_total";
/// Registered channel plugins (gauge).
pub const CHANNELS_REGISTERED: &str = "volery_channels_registered";

/// Label key for drop/failure reasons.
pub const LABEL_REASON: &str = "reason";
/// Label key for the channel id.
pub const LABEL_CHANNEL: &str = "channel";
