pub mod auth;
pub mod books;
pub mod client;
pub mod config;
pub mod error;
pub mod media;
pub mod messages;
pub mod profiles;
pub mod tokens;

pub use auth::{LogMailer, ResetMailer};
pub use client::ShareBook;
pub use config::{Config, MediaConfig};
pub use error::{Error, Result};
pub use sharebook_db::Database;
pub use sharebook_gateway::Subscription;
