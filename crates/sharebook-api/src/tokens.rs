use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use sharebook_types::api::Claims;

use crate::error::{Error, Result};

/// Session tokens are valid for 30 days.
const TOKEN_TTL_DAYS: i64 = 30;

pub fn create_token(secret: &str, user_id: Uuid, email: &str) -> Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Decode and validate a session token. Any failure, including expiry or a
/// foreign signature, reads as `Unauthenticated`.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims> {
    let token = token.strip_prefix("Bearer ").unwrap_or(token);

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| Error::Unauthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip_with_the_same_secret_only() {
        let user = Uuid::new_v4();
        let token = create_token("s3cret", user, "ada@example.com").unwrap();

        let claims = verify_token("s3cret", &token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.email, "ada@example.com");

        assert!(matches!(verify_token("other", &token), Err(Error::Unauthenticated)));
        assert!(matches!(verify_token("s3cret", "garbage"), Err(Error::Unauthenticated)));
    }

    #[test]
    fn bearer_prefix_is_accepted() {
        let token = create_token("s3cret", Uuid::new_v4(), "a@b.c").unwrap();
        assert!(verify_token("s3cret", &format!("Bearer {token}")).is_ok());
    }
}
