//! The dispatch layer between channel adapters and the agent seam.
//!
//! Inbound: raw channel payloads are normalized ([`normalize`]), gated and
//! policy-checked ([`pipeline`]), then coalesced per conversation
//! ([`debounce`]) before a turn reaches the [`pipeline::TurnHandler`].
//! Outbound: agent replies are chunked ([`chunk`]) and delivered in order
//! with typing indicators ([`dispatcher`]).

pub mod chunk;
pub mod debounce;
pub mod dispatcher;
pub mod error;
pub mod normalize;
pub mod pipeline;

pub use {
    chunk::chunk_text,
    debounce::{DebouncedTurn, Debouncer},
    dispatcher::{DeliveryReport, ReplyDispatcher, ReplyEvent},
    error::{Error, Result},
    normalize::normalize_inbound,
    pipeline::{EchoTurnHandler, InboundPipeline, TurnHandler, TurnReply, spawn_turn_drain},
};
