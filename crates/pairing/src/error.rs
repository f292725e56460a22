use volery_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pairing code not found")]
    CodeNotFound,

    #[error("pairing code expired")]
    CodeExpired,

    #[error("sender is not paired")]
    SenderNotPaired,

    #[error("pairing store error: {0}")]
    Store(String),
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Store(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

volery_common::impl_context!();
