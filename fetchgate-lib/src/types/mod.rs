#![allow(unreachable_pub)]

mod error;
mod key;

pub use error::ErrorKind;
pub use key::RequestKey;

/// The fetchgate `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
