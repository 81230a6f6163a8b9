use thiserror::Error;

/// Everything a ShareBook operation can fail with. Store and transport
/// errors are passed through unchanged; nothing is retried.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before any I/O was attempted.
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("only the owner can change this")]
    Forbidden,

    #[error("email is already registered")]
    EmailTaken,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("not signed in")]
    Unauthenticated,

    #[error("password reset link is invalid or has expired")]
    InvalidResetToken,

    /// The media host answered without a `secure_url`.
    #[error("{0}")]
    Upload(String),

    #[error("media request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cannot read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
