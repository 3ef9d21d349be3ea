use std::time::Duration;

use anyhow::Context;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{
        header::{InvalidHeaderValue, COOKIE},
        request::Parts,
        HeaderMap, HeaderValue,
    },
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    auth::{
        repo::{RepoError, UserRepository},
        repo_types::User,
    },
    flash::{self, Flash, Flashes},
    state::AppState,
};

pub const SESSION_COOKIE_NAME: &str = "accountflow_session";
const SESSION_ISSUER: &str = "accountflow";
const SESSION_AUDIENCE: &str = "accountflow-session";

/// Payload of the session cookie.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid, // user ID
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    secure: bool,
}

impl FromRef<AppState> for SessionKeys {
    fn from_ref(state: &AppState) -> Self {
        let secret = state.config.secret_key.as_bytes();
        let session = &state.config.session;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: Duration::from_secs(
                u64::try_from(session.ttl_minutes.max(1))
                    .unwrap_or(1)
                    .saturating_mul(60),
            ),
            secure: session.cookie_secure,
        }
    }
}

impl SessionKeys {
    pub fn sign(&self, user_id: Uuid) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let exp = now
            .checked_add(TimeDuration::seconds(ttl))
            .context("session expiry out of range")?;
        let claims = SessionClaims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: SESSION_ISSUER.into(),
            aud: SESSION_AUDIENCE.into(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "session signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<SessionClaims> {
        let mut validation = Validation::default();
        validation.set_audience(&[SESSION_AUDIENCE]);
        validation.set_issuer(&[SESSION_ISSUER]);
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    /// `Set-Cookie` value establishing the session.
    pub fn cookie(&self, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.ttl.as_secs()
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    /// `Set-Cookie` value tearing the session down.
    pub fn clear_cookie(&self) -> HeaderValue {
        let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
    }
}

/// Read one cookie from the request headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, val)| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

/// Resolve a session's user id back to the account, if it is still signed in.
pub async fn load_user(users: &dyn UserRepository, user_id: Uuid) -> Result<Option<User>, RepoError> {
    let user = users.find_by_id(user_id).await?;
    Ok(user.filter(|u| u.authenticated))
}

/// The signed-in account. Using it as an extractor guards a route: requests
/// without a live session are sent to the login page.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = read_cookie(&parts.headers, SESSION_COOKIE_NAME) else {
            return Err(login_required(&parts.headers));
        };

        let keys = SessionKeys::from_ref(state);
        let claims = match keys.verify(&token) {
            Ok(c) => c,
            Err(_) => {
                warn!("invalid or expired session cookie");
                return Err(login_required(&parts.headers));
            }
        };

        match load_user(state.users.as_ref(), claims.sub).await {
            Ok(Some(user)) => Ok(CurrentUser(user)),
            Ok(None) => {
                debug!(user_id = %claims.sub, "session no longer live");
                Err(login_required(&parts.headers))
            }
            Err(e) => {
                error!(error = %e, user_id = %claims.sub, "load_user failed");
                Err(crate::error::AppError::from(e).into_response())
            }
        }
    }
}

fn login_required(headers: &HeaderMap) -> Response {
    flash::redirect_with(
        Flashes::from_headers(headers),
        "/login",
        vec![Flash::message("Please log in to access this page.")],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::memory::InMemoryUserRepository;
    use axum::http::header::SET_COOKIE;

    #[test]
    fn sign_and_verify_roundtrip() {
        let (state, _) = AppState::fake();
        let keys = SessionKeys::from_ref(&state);
        let user_id = Uuid::new_v4();
        let token = keys.sign(user_id).expect("sign session");
        let claims = keys.verify(&token).expect("verify session");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.aud, SESSION_AUDIENCE);
    }

    #[test]
    fn confirmation_token_is_not_a_session() {
        let (state, _) = AppState::fake();
        let keys = SessionKeys::from_ref(&state);
        let signer = crate::auth::confirm::ConfirmationSigner::from_ref(&state);
        let token = signer.sign("a@x.com").unwrap();
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn huge_ttl_does_not_panic() {
        let (mut state, _) = AppState::fake();
        let mut config = (*state.config).clone();
        config.session.ttl_minutes = i64::MAX;
        state.config = std::sync::Arc::new(config);

        let keys = SessionKeys::from_ref(&state);
        assert!(keys.sign(Uuid::new_v4()).is_err());
        assert!(keys.cookie("tok").is_ok());
    }

    #[test]
    fn read_cookie_picks_named_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; accountflow_session=abc.def ; other=1"),
        );
        assert_eq!(
            read_cookie(&headers, SESSION_COOKIE_NAME).as_deref(),
            Some("abc.def")
        );
        assert_eq!(read_cookie(&headers, "missing"), None);
    }

    #[test]
    fn cookies_carry_expected_attributes() {
        let (state, _) = AppState::fake();
        let keys = SessionKeys::from_ref(&state);
        let set = keys.cookie("tok").unwrap();
        let set = set.to_str().unwrap();
        assert!(set.starts_with("accountflow_session=tok;"));
        assert!(set.contains("HttpOnly"));
        let cleared = keys.clear_cookie();
        assert!(cleared.to_str().unwrap().contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn loader_skips_signed_out_accounts() {
        let repo = InMemoryUserRepository::default();
        let mut user = User::new_registered("a@x.com".into(), "alice".into(), "h".into());
        repo.insert(&user).await.unwrap();
        assert!(load_user(&repo, user.id).await.unwrap().is_some());

        user.authenticated = false;
        repo.update(&user).await.unwrap();
        assert!(load_user(&repo, user.id).await.unwrap().is_none());
        assert!(load_user(&repo, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[test]
    fn login_required_redirects_with_flash() {
        let res = login_required(&HeaderMap::new());
        assert!(res.status().is_redirection());
        assert_eq!(res.headers()["location"], "/login");
        assert!(res.headers().get(SET_COOKIE).is_some());
    }
}
