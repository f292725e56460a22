use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the dispatch layer.
///
/// Most per-message problems (malformed payloads, gated senders) are
/// logged and dropped rather than returned; `Error` is reserved for
/// local failures such as unknown channels or a broken pairing store.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Channel(#[from] volery_channels::Error),

    #[error(transparent)]
    Pairing(#[from] volery_pairing::Error),
}
