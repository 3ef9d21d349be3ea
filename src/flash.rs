use std::convert::Infallible;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::SET_COOKIE, request::Parts, HeaderMap, HeaderValue},
    response::{IntoResponse, Redirect, Response},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::session::read_cookie;

pub const FLASH_COOKIE_NAME: &str = "accountflow_flash";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Success,
    Info,
    Error,
    Message,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Success => "success",
            Category::Info => "info",
            Category::Error => "error",
            Category::Message => "message",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flash {
    pub category: Category,
    pub message: String,
}

impl Flash {
    pub fn new(category: Category, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Category::Success, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Category::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Category::Error, message)
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::new(Category::Message, message)
    }
}

/// Flashes pending for the current request. Rendering a page consumes them.
#[derive(Debug, Default)]
pub struct Flashes {
    pub messages: Vec<Flash>,
    from_cookie: bool,
}

impl Flashes {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let Some(raw) = read_cookie(headers, FLASH_COOKIE_NAME) else {
            return Self::default();
        };
        let messages = decode(&raw).unwrap_or_else(|| {
            debug!("ignoring malformed flash cookie");
            Vec::new()
        });
        Self {
            messages,
            from_cookie: true,
        }
    }

    pub fn push(&mut self, flash: Flash) {
        self.messages.push(flash);
    }

    /// Whether the response has to clear the flash cookie.
    pub fn consumed(&self) -> bool {
        self.from_cookie
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Flashes
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

pub fn encode(flashes: &[Flash]) -> String {
    let json = serde_json::to_vec(flashes).unwrap_or_default();
    Base64UrlUnpadded::encode_string(&json)
}

pub fn decode(raw: &str) -> Option<Vec<Flash>> {
    let bytes = Base64UrlUnpadded::decode_vec(raw).ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub fn clear_cookie() -> HeaderValue {
    HeaderValue::from_static("accountflow_flash=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

fn set_cookie(flashes: &[Flash]) -> Option<HeaderValue> {
    let value = format!(
        "{FLASH_COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax",
        encode(flashes)
    );
    HeaderValue::from_str(&value).ok()
}

/// Redirect, leaving `flashes` for whichever page renders next.
pub fn redirect(to: &str, flashes: Vec<Flash>) -> Response {
    redirect_with(Flashes::default(), to, flashes)
}

/// Redirect without dropping flashes that arrived with this request and
/// were never rendered. Pending messages keep their place ahead of `new`.
pub fn redirect_with(pending: Flashes, to: &str, new: Vec<Flash>) -> Response {
    let had_cookie = pending.consumed();
    let mut flashes = pending.messages;
    flashes.extend(new);
    let mut res = Redirect::to(to).into_response();
    if flashes.is_empty() {
        if had_cookie {
            res.headers_mut().append(SET_COOKIE, clear_cookie());
        }
        return res;
    }
    if let Some(cookie) = set_cookie(&flashes) {
        res.headers_mut().append(SET_COOKIE, cookie);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::COOKIE, Request, StatusCode};

    #[test]
    fn cookie_value_survives_encoding() {
        let flashes = vec![
            Flash::success("Thank you for confirming your email address!"),
            Flash::error("ERROR! Email (a@x.com) already exists."),
        ];
        let raw = encode(&flashes);
        assert!(raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(decode(&raw).unwrap(), flashes);
    }

    #[test]
    fn redirect_sets_flash_cookie() {
        let res = redirect("/login", vec![Flash::info("bye")]);
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        let cookie = res.headers()[SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("accountflow_flash="));
    }

    #[test]
    fn redirect_without_flashes_sets_no_cookie() {
        let res = redirect("/blog", Vec::new());
        assert!(res.headers().get(SET_COOKIE).is_none());
    }

    #[test]
    fn redirect_with_keeps_pending_messages_first() {
        let mut headers = HeaderMap::new();
        let raw = encode(&[Flash::success("confirmed")]);
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_str(&format!("{FLASH_COOKIE_NAME}={raw}")).unwrap(),
        );
        let pending = Flashes::from_headers(&headers);
        let res = redirect_with(pending, "/login", vec![Flash::message("log in")]);

        let cookie = res.headers()[SET_COOKIE].to_str().unwrap();
        let value = cookie
            .split(';')
            .next()
            .and_then(|pair| pair.split_once('='))
            .map(|(_, v)| v)
            .unwrap();
        assert_eq!(
            decode(value).unwrap(),
            vec![Flash::success("confirmed"), Flash::message("log in")]
        );
    }

    #[tokio::test]
    async fn extractor_reads_and_tolerates_garbage() {
        let raw = encode(&[Flash::info("hello")]);
        let req = Request::builder()
            .header(COOKIE, format!("{FLASH_COOKIE_NAME}={raw}"))
            .body(())
            .unwrap();
        let (mut parts, _) = req.into_parts();
        let flashes = Flashes::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(flashes.messages, vec![Flash::info("hello")]);
        assert!(flashes.consumed());

        let req = Request::builder()
            .header(COOKIE, format!("{FLASH_COOKIE_NAME}=%%%"))
            .body(())
            .unwrap();
        let (mut parts, _) = req.into_parts();
        let flashes = Flashes::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(flashes.messages.is_empty());
        assert!(flashes.consumed());
    }
}
