use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::error;

lazy_static! {
    static ref ARGON2: Argon2<'static> = Argon2::default();
    // Stands in for an account hash when the email is unknown.
    static ref DECOY_HASH: Option<String> = hash_password("decoy-password-never-matches").ok();
}

fn argon2_error(op: &'static str, e: argon2::password_hash::Error) -> anyhow::Error {
    error!(error = %e, op, "argon2 error");
    anyhow::anyhow!("{op}: {e}")
}

/// Argon2 PHC string for `plain`, salted from the OS RNG.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    ARGON2
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| argon2_error("hash password", e))
}

/// `Ok(false)` on mismatch; `Err` only when the stored hash is unreadable.
pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| argon2_error("parse hash", e))?;
    Ok(ARGON2.verify_password(plain.as_bytes(), &parsed).is_ok())
}

/// Spend the same argon2 work as a real check, for logins with no account
/// behind them. Always false.
pub fn verify_against_decoy(plain: &str) -> bool {
    if let Some(hash) = DECOY_HASH.as_deref() {
        let _ = verify_password(plain, hash);
    }
    false
}
