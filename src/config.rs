use anyhow::{anyhow, Context, Result};
use std::time::Duration;

/// Default OpenID Connect userinfo endpoint for Google accounts.
pub const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Longest accepted token or authorization-code lifetime: ten years.
pub const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,

    // ── Database ────────────────────────────────────────────────────────
    /// PostgreSQL connection string. Required to serve; left unset by the
    /// test configuration, which runs against `MemoryStore`.
    pub database_url: Option<String>,

    // ── Tokens ──────────────────────────────────────────────────────────
    /// How long an issued access token stays usable.
    pub token_lifetime: Duration,
    /// How long an OAuth authorization code may wait to be exchanged.
    pub authorization_code_lifetime: Duration,

    // ── Providers ───────────────────────────────────────────────────────
    /// Upper bound on a single call to an external identity provider.
    pub provider_timeout: Duration,
    pub google_enabled: bool,
    pub google_userinfo_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8430".into())
                .parse()
                .context("Invalid PORT")?,

            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),

            token_lifetime: lifetime_from_env("TOKEN_LIFETIME_SECS", 3600)?,
            authorization_code_lifetime: lifetime_from_env("AUTHORIZATION_CODE_LIFETIME_SECS", 600)?,

            provider_timeout: secs_from_env("PROVIDER_TIMEOUT_SECS", 10)?,
            google_enabled: std::env::var("GOOGLE_ENABLED")
                .map(|v| v != "false")
                .unwrap_or(true),
            google_userinfo_url: std::env::var("GOOGLE_USERINFO_URL")
                .unwrap_or_else(|_| GOOGLE_USERINFO_URL.into()),
        })
    }

    /// The database to serve from. Accounts are provisioned elsewhere in
    /// ohmage, so there is nothing to authenticate without one.
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL is required: users and tokens live in PostgreSQL")
    }

    /// Listen address in `host:port` form.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".into(),
            port: 8430,
            database_url: None,
            token_lifetime: Duration::from_secs(3600),
            authorization_code_lifetime: Duration::from_secs(600),
            provider_timeout: Duration::from_secs(10),
            google_enabled: true,
            google_userinfo_url: GOOGLE_USERINFO_URL.into(),
        }
    }
}

fn secs_from_env(key: &str, default: u64) -> Result<Duration> {
    let secs = match std::env::var(key) {
        Ok(raw) => parse_secs(key, &raw)?,
        Err(_) => default,
    };
    Ok(Duration::from_secs(secs))
}

fn lifetime_from_env(key: &str, default: u64) -> Result<Duration> {
    match std::env::var(key) {
        Ok(raw) => parse_lifetime(key, &raw),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("Invalid {key}: expected a number of seconds"))
}

fn parse_lifetime(key: &str, raw: &str) -> Result<Duration> {
    let secs = parse_secs(key, raw)?;
    if secs > MAX_LIFETIME_SECS {
        return Err(anyhow!("{secs} is longer than {MAX_LIFETIME_SECS} seconds"))
            .with_context(|| format!("Invalid {key}"));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_url_is_required() {
        let mut config = Config::default();
        let err = config.require_database_url().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));

        config.database_url = Some("postgres://localhost/ohmage".into());
        assert_eq!(
            config.require_database_url().unwrap(),
            "postgres://localhost/ohmage"
        );
    }

    #[test]
    fn test_lifetime_within_bound() {
        assert_eq!(
            parse_lifetime("TOKEN_LIFETIME_SECS", "7200").unwrap(),
            Duration::from_secs(7200)
        );
        assert_eq!(
            parse_lifetime("TOKEN_LIFETIME_SECS", &MAX_LIFETIME_SECS.to_string()).unwrap(),
            Duration::from_secs(MAX_LIFETIME_SECS)
        );
    }

    #[test]
    fn test_oversized_lifetime_is_rejected() {
        let err = parse_lifetime("TOKEN_LIFETIME_SECS", "5000000000000000").unwrap_err();
        assert!(format!("{err:#}").contains("Invalid TOKEN_LIFETIME_SECS"));

        let err = parse_lifetime("AUTHORIZATION_CODE_LIFETIME_SECS", "18446744073709551615")
            .unwrap_err();
        assert!(format!("{err:#}").contains("AUTHORIZATION_CODE_LIFETIME_SECS"));
    }

    #[test]
    fn test_non_numeric_lifetime_is_rejected() {
        assert!(parse_lifetime("TOKEN_LIFETIME_SECS", "an hour").is_err());
        assert!(parse_lifetime("TOKEN_LIFETIME_SECS", "-5").is_err());
    }
}
