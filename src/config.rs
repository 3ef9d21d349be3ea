use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use std::{fmt::Display, ops::RangeInclusive, str::FromStr};

/// One year.
pub const MAX_SESSION_TTL_MINUTES: i64 = 60 * 24 * 365;
pub const MAX_MAIL_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub ttl_minutes: i64,
    pub cookie_secure: bool,
}

/// Outgoing mail settings. Absent when `MAIL_SERVER` is not set.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub use_ssl: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub default_sender: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub secret_key: String,
    pub public_url: String,
    pub session: SessionConfig,
    pub mail: Option<SmtpConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| var(key).ok_or_else(|| anyhow!("{key} must be set"));

        let database_url = required("DATABASE_URL")?;
        let secret_key = required("SECRET_KEY")?;
        if secret_key.is_empty() {
            bail!("SECRET_KEY must not be empty");
        }
        let public_url = var("PUBLIC_URL")
            .unwrap_or_else(|| "http://localhost:8080".into())
            .trim_end_matches('/')
            .to_string();

        let session = SessionConfig {
            ttl_minutes: bounded(&var, "SESSION_TTL_MINUTES", 60 * 24, 1..=MAX_SESSION_TTL_MINUTES)?,
            cookie_secure: flag(&var, "SESSION_COOKIE_SECURE", false)?,
        };

        let mail = match var("MAIL_SERVER") {
            Some(host) => {
                let username = var("MAIL_USERNAME");
                let default_sender = var("MAIL_DEFAULT_SENDER")
                    .or_else(|| username.clone())
                    .context("MAIL_DEFAULT_SENDER must be set when MAIL_SERVER is set")?;
                Some(SmtpConfig {
                    host,
                    port: match var("MAIL_PORT") {
                        Some(p) => p.parse().context("MAIL_PORT must be a port number")?,
                        None => 465,
                    },
                    use_tls: flag(&var, "MAIL_USE_TLS", false)?,
                    use_ssl: flag(&var, "MAIL_USE_SSL", true)?,
                    username,
                    password: var("MAIL_PASSWORD"),
                    default_sender,
                    timeout_secs: bounded(&var, "MAIL_TIMEOUT_SECS", 10, 1..=MAX_MAIL_TIMEOUT_SECS)?,
                })
            }
            None => None,
        };

        Ok(Self {
            database_url,
            secret_key,
            public_url,
            session,
            mail,
        })
    }
}

fn bounded<F, T>(var: &F, key: &str, default: T, range: RangeInclusive<T>) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Display,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(raw) = var(key) else {
        return Ok(default);
    };
    let value: T = raw
        .trim()
        .parse()
        .with_context(|| format!("{key}: expected a number, got {raw:?}"))?;
    if !range.contains(&value) {
        bail!(
            "{key}: {value} is outside {}..={}",
            range.start(),
            range.end()
        );
    }
    Ok(value)
}

fn flag<F>(var: &F, key: &str, default: bool) -> anyhow::Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = var(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{key}: expected a boolean, got {other:?}"),
    }
}
