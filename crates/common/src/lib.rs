//! Shared types, error plumbing, and utilities used across all volery crates.

pub mod error;
pub mod types;

pub use error::FromMessage;
