use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Which mailer backend delivers notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailBackend {
    /// AWS SES
    Ses,
    /// Log lines only, for local runs
    Log,
}

impl FromStr for MailBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ses" => Ok(MailBackend::Ses),
            "log" => Ok(MailBackend::Log),
            other => bail!("unknown MAIL_BACKEND '{}', expected 'ses' or 'log'", other),
        }
    }
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub operator_email: String,
    pub from_email: String,
    pub mail_backend: MailBackend,
    pub directory_base_url: String,
    pub poll_interval: Duration,
    pub prune_interval: Duration,
    pub retention: Duration,
    pub max_concurrent_probes: usize,
    pub http_timeout: Duration,
    pub session_hit_extension_hours: i64,
    pub session_new_ttl_hours: i64,
    pub session_returning_ttl_hours: i64,
}

impl AppConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} must be set", key))
        };
        let or_default = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };
        fn number<T: FromStr>(key: &str, raw: String) -> Result<T>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            raw.trim()
                .parse()
                .with_context(|| format!("{} is not a valid number: '{}'", key, raw))
        }
        // periods feed tokio interval timers, which reject zero
        fn seconds(key: &str, raw: String) -> Result<Duration> {
            let secs: u64 = number(key, raw)?;
            if secs == 0 {
                bail!("{} must be greater than zero", key);
            }
            Ok(Duration::from_secs(secs))
        }

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_addr: or_default("BIND_ADDR", "0.0.0.0:8080"),
            operator_email: required("OPERATOR_EMAIL")?,
            from_email: or_default("FROM_EMAIL", "notifications@deliverywatch.app"),
            mail_backend: or_default("MAIL_BACKEND", "log").parse()?,
            directory_base_url: required("DIRECTORY_BASE_URL")?,
            poll_interval: seconds(
                "POLL_INTERVAL_SECS",
                or_default("POLL_INTERVAL_SECS", "30"),
            )?,
            prune_interval: seconds(
                "PRUNE_INTERVAL_SECS",
                or_default("PRUNE_INTERVAL_SECS", "600"),
            )?,
            retention: Duration::from_secs(
                number::<u64>("RETENTION_HOURS", or_default("RETENTION_HOURS", "30"))? * 3600,
            ),
            max_concurrent_probes: number(
                "MAX_CONCURRENT_PROBES",
                or_default("MAX_CONCURRENT_PROBES", "8"),
            )?,
            http_timeout: seconds(
                "HTTP_TIMEOUT_SECS",
                or_default("HTTP_TIMEOUT_SECS", "10"),
            )?,
            session_hit_extension_hours: number(
                "SESSION_HIT_EXTENSION_HOURS",
                or_default("SESSION_HIT_EXTENSION_HOURS", "24"),
            )?,
            session_new_ttl_hours: number(
                "SESSION_NEW_TTL_HOURS",
                or_default("SESSION_NEW_TTL_HOURS", "24"),
            )?,
            session_returning_ttl_hours: number(
                "SESSION_RETURNING_TTL_HOURS",
                or_default("SESSION_RETURNING_TTL_HOURS", "3"),
            )?,
        })
    }
}
