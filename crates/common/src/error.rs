//! Error plumbing shared by the volery crates.
//!
//! Each crate keeps its own `thiserror` enum; what they share is the way a
//! plain message string becomes one. [`FromMessage`] is that conversion and
//! [`impl_context!`] turns it into crate-local `.context()` helpers.

/// Conversion from a plain message string into a crate's error type.
///
/// Implemented by error enums that carry a catch-all message variant.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` trait with `.context()` and
/// `.with_context()` on `Result` and `Option`.
///
/// Invoke inside an error module that defines `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`. For `Result` the
/// underlying error's `Display` output is folded into the message; for
/// `Option` the message stands alone.
///
/// ```ignore
/// volery_common::impl_context!();
///
/// let raw = tokio::fs::read_to_string(path)
///     .await
///     .with_context(|| format!("read {}", path.display()))?;
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, message: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, message: impl Into<String>) -> Result<T> {
                let message = message.into();
                self.with_context(move || message)
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::from_message(format!(
                        "{}: {source}",
                        f().into()
                    ))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, message: impl Into<String>) -> Result<T> {
                let message = message.into();
                self.with_context(move || message)
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}
