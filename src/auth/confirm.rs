use std::collections::HashSet;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::state::AppState;

pub const CONFIRMATION_SALT: &str = "email-confirmation-salt";
pub const CONFIRMATION_MAX_AGE: Duration = Duration::seconds(86_400);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid confirmation token")]
    Invalid,
    #[error("confirmation token expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfirmationClaims {
    email: String,
    iat: i64,
}

/// HS256 tokens carrying an email and its issue time. Age is checked on verify.
#[derive(Clone)]
pub struct ConfirmationSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    max_age: Duration,
}

impl FromRef<AppState> for ConfirmationSigner {
    fn from_ref(state: &AppState) -> Self {
        Self::new(&state.config.secret_key, CONFIRMATION_SALT)
    }
}

impl ConfirmationSigner {
    pub fn new(secret: &str, salt: &str) -> Self {
        let key = format!("{salt}{secret}");
        Self {
            encoding: EncodingKey::from_secret(key.as_bytes()),
            decoding: DecodingKey::from_secret(key.as_bytes()),
            max_age: CONFIRMATION_MAX_AGE,
        }
    }

    pub fn sign(&self, email: &str) -> anyhow::Result<String> {
        self.sign_at(email, OffsetDateTime::now_utc())
    }

    pub fn sign_at(&self, email: &str, issued_at: OffsetDateTime) -> anyhow::Result<String> {
        let claims = ConfirmationClaims {
            email: email.to_string(),
            iat: issued_at.unix_timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(email = %email, "confirmation token signed");
        Ok(token)
    }

    /// Returns the embedded email if the signature holds and the token is
    /// not older than the maximum age.
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        self.verify_at(token, OffsetDateTime::now_utc())
    }

    pub fn verify_at(&self, token: &str, now: OffsetDateTime) -> Result<String, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();

        let data = decode::<ConfirmationClaims>(token, &self.decoding, &validation)
            .map_err(|_| TokenError::Invalid)?;

        let age = now.unix_timestamp() - data.claims.iat;
        if age < 0 {
            return Err(TokenError::Invalid);
        }
        if age > self.max_age.whole_seconds() {
            return Err(TokenError::Expired);
        }
        Ok(data.claims.email)
    }
}
