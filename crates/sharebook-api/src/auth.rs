use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use chrono::SecondsFormat;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use sharebook_db::{Database, server_timestamp};
use sharebook_types::api::{Claims, LoginRequest, RegisterRequest, Session};
use sharebook_types::models::USERS;

use crate::client::{blocking, parse_id};
use crate::error::{Error, Result};
use crate::tokens;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Delivers password reset tokens to their owner.
pub trait ResetMailer: Send + Sync {
    fn send_reset(&self, email: &str, token: &str) -> anyhow::Result<()>;
}

/// Writes the reset token to the log instead of sending mail.
pub struct LogMailer;

impl ResetMailer for LogMailer {
    fn send_reset(&self, email: &str, token: &str) -> anyhow::Result<()> {
        info!("Password reset for {}: token {}", email, token);
        Ok(())
    }
}

/// The signed-in user, shared by every service of one client.
#[derive(Clone, Default)]
pub(crate) struct CurrentSession(Arc<RwLock<Option<Session>>>);

impl CurrentSession {
    pub(crate) fn get(&self) -> Option<Session> {
        self.0.read().ok().and_then(|session| session.clone())
    }

    /// Id of the signed-in user; the acting user of every owner-only call.
    pub(crate) fn user_id(&self) -> Result<Uuid> {
        self.get()
            .map(|session| session.user_id)
            .ok_or(Error::Unauthenticated)
    }

    fn replace(&self, session: Option<Session>) -> Result<Option<Session>> {
        let mut current = self
            .0
            .write()
            .map_err(|_| anyhow!("session lock poisoned"))?;
        Ok(std::mem::replace(&mut *current, session))
    }
}

/// Email/password identity and the signed-in session.
pub struct Auth {
    db: Arc<Database>,
    jwt_secret: String,
    reset_ttl: chrono::Duration,
    mailer: Arc<dyn ResetMailer>,
    session: CurrentSession,
}

impl Auth {
    pub(crate) fn new(
        db: Arc<Database>,
        jwt_secret: String,
        reset_ttl: chrono::Duration,
        mailer: Arc<dyn ResetMailer>,
        session: CurrentSession,
    ) -> Self {
        Self {
            db,
            jwt_secret,
            reset_ttl,
            mailer,
            session,
        }
    }

    /// Create an account with its profile, then sign in as it.
    pub async fn register(&self, req: RegisterRequest) -> Result<Session> {
        let email = normalize_email(&req.email);
        if !is_plausible_email(&email) {
            return Err(Error::Validation("Please enter a valid email address".into()));
        }
        check_password(&req.password)?;
        if req.name.trim().is_empty() {
            return Err(Error::Validation("Name is required".into()));
        }

        let user_id = Uuid::new_v4();
        let profile = json!({
            "name": req.name.trim(),
            "email": email,
            "location": req.location.trim(),
            "phone": req.phone,
            "createdAt": server_timestamp(),
        });

        // Hash before touching the store; the check and both inserts then
        // run in one transaction.
        let password = req.password;
        let password_hash = blocking(move || hash_password(&password)).await?;

        let db = self.db.clone();
        let uid = user_id.to_string();
        let account_email = email.clone();
        let created = blocking(move || {
            db.create_account(&uid, &account_email, &password_hash, USERS, profile)
        })
        .await?;

        if !created {
            return Err(Error::EmailTaken);
        }

        info!("Registered {} ({})", email, user_id);
        self.start_session(user_id, email)
    }

    pub async fn login(&self, req: LoginRequest) -> Result<Session> {
        let email = normalize_email(&req.email);

        let db = self.db.clone();
        let lookup = email.clone();
        let verified = blocking(move || {
            let Some(row) = db.get_credentials_by_email(&lookup)? else {
                return Ok(None);
            };

            let parsed = PasswordHash::new(&row.password)
                .map_err(|e| anyhow!("Stored password hash for {} is invalid: {}", row.user_id, e))?;
            let ok = Argon2::default()
                .verify_password(req.password.as_bytes(), &parsed)
                .is_ok();

            Ok(ok.then_some((row.user_id, row.email)))
        })
        .await?;

        let Some((user_id, email)) = verified else {
            debug!("Failed sign-in for {}", email);
            return Err(Error::InvalidCredentials);
        };

        info!("Signed in {}", email);
        self.start_session(parse_id(&user_id)?, email)
    }

    pub fn logout(&self) {
        if let Ok(Some(old)) = self.session.replace(None) {
            info!("Signed out {}", old.email);
        }
    }

    pub fn current_user(&self) -> Option<Session> {
        self.session.get()
    }

    /// A fresh token for the signed-in user.
    pub fn id_token(&self) -> Result<String> {
        let session = self.current_user().ok_or(Error::Unauthenticated)?;
        tokens::create_token(&self.jwt_secret, session.user_id, &session.email)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        tokens::verify_token(&self.jwt_secret, token)
    }

    /// Issue a single-use reset token and hand it to the mailer. Unknown
    /// addresses succeed without doing anything, so callers cannot probe for
    /// accounts.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        let expires_at = (chrono::Utc::now() + self.reset_ttl).to_rfc3339_opts(SecondsFormat::Micros, true);

        let db = self.db.clone();
        let lookup = email.clone();
        let token = blocking(move || {
            let Some(row) = db.get_credentials_by_email(&lookup)? else {
                return Ok(None);
            };

            let token = hex::encode(rand::random::<[u8; 32]>());
            db.insert_password_reset(&hash_token(&token), &row.user_id, &expires_at)?;
            Ok(Some(token))
        })
        .await?;

        match token {
            Some(token) => {
                self.mailer.send_reset(&email, &token)?;
                info!("Password reset issued for {}", email);
            }
            None => debug!("Password reset requested for unknown address {}", email),
        }
        Ok(())
    }

    /// Set a new password using a token from `request_password_reset`.
    pub async fn confirm_password_reset(&self, token: &str, new_password: &str) -> Result<()> {
        check_password(new_password)?;

        let token_hash = hash_token(token.trim());
        let now = chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let new_password = new_password.to_string();

        let db = self.db.clone();
        let user_id = blocking(move || {
            let Some(user_id) = db.consume_password_reset(&token_hash, &now)? else {
                return Ok(None);
            };

            db.update_password(&user_id, &hash_password(&new_password)?)?;
            Ok(Some(user_id))
        })
        .await?;

        match user_id {
            Some(user_id) => {
                info!("Password reset completed for {}", user_id);
                Ok(())
            }
            None => {
                warn!("Rejected an invalid or expired password reset token");
                Err(Error::InvalidResetToken)
            }
        }
    }

    fn start_session(&self, user_id: Uuid, email: String) -> Result<Session> {
        let token = tokens::create_token(&self.jwt_secret, user_id, &email)?;
        let session = Session {
            user_id,
            email,
            token,
        };

        self.session.replace(Some(session.clone()))?;
        Ok(session)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

fn check_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

/// Only the digest of a reset token is stored.
fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
