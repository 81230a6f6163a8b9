use std::path::PathBuf;

use anyhow::{Context, Result, bail};

#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// API root; the cloud name and resource type are appended per upload.
    pub base_url: String,
    pub cloud_name: String,
    pub book_preset: String,
    pub avatar_preset: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cloudinary.com/v1_1".into(),
            cloud_name: "dbmzwhglz".into(),
            book_preset: "book_upload".into(),
            avatar_preset: "image_upload".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub media: MediaConfig,
    /// How long a password reset token stays valid.
    pub reset_ttl: chrono::Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("sharebook.db"),
            jwt_secret: "dev-secret-change-me".into(),
            media: MediaConfig::default(),
            reset_ttl: chrono::Duration::minutes(60),
        }
    }
}

impl Config {
    /// Read configuration from the environment, loading `.env` first if
    /// present. Unset variables fall back to the defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let defaults = Config::default();
        let var = |name: &str, default: String| std::env::var(name).unwrap_or(default);

        let reset_ttl = match std::env::var("SHAREBOOK_RESET_TTL_MINUTES") {
            Ok(raw) => parse_reset_ttl(&raw)?,
            Err(_) => defaults.reset_ttl,
        };

        Ok(Self {
            db_path: std::env::var("SHAREBOOK_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            jwt_secret: var("SHAREBOOK_JWT_SECRET", defaults.jwt_secret),
            media: MediaConfig {
                base_url: var("SHAREBOOK_MEDIA_URL", defaults.media.base_url),
                cloud_name: var("SHAREBOOK_CLOUD_NAME", defaults.media.cloud_name),
                book_preset: var("SHAREBOOK_BOOK_PRESET", defaults.media.book_preset),
                avatar_preset: var("SHAREBOOK_AVATAR_PRESET", defaults.media.avatar_preset),
            },
            reset_ttl,
        })
    }
}

/// Reset tokens must outlive the request that issued them, so only a
/// positive number of minutes is accepted.
fn parse_reset_ttl(raw: &str) -> Result<chrono::Duration> {
    let minutes: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("SHAREBOOK_RESET_TTL_MINUTES is not a number: {raw}"))?;
    if minutes <= 0 {
        bail!("SHAREBOOK_RESET_TTL_MINUTES must be positive, got {minutes}");
    }
    Ok(chrono::Duration::minutes(minutes))
}
