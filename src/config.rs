//! Service configuration read from `REPORTS_*` environment variables.
//!
//! The database pool is configured separately through Rocket's figment
//! (`Rocket.toml` or `ROCKET_DATABASES`) under the name `reports_db`.

use crate::backend::{DeliveryOptions, ReportKind};
use crate::dispatch::{DispatchConfig, RetryPolicy};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAIL_DIR: &str = "/var/lib/kernelci-reports";

/// Startup misconfiguration. The only fatal error class of the service.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Source of configuration values; the process environment in production.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl ConfigSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl<S: std::hash::BuildHasher> ConfigSource for std::collections::HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<String> {
        std::collections::HashMap::get(self, key).cloned()
    }
}

fn env_string(source: &dyn ConfigSource, key: &str) -> Option<String> {
    source
        .get(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T>(source: &dyn ConfigSource, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env_string(source, key) {
        Some(value) => value.parse::<T>().map_err(|err| ConfigError::Invalid {
            key,
            value,
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

fn env_duration_secs(
    source: &dyn ConfigSource,
    key: &'static str,
    default_secs: u64,
) -> Result<Duration, ConfigError> {
    env_parse(source, key, default_secs).map(Duration::from_secs)
}

fn env_duration_millis(
    source: &dyn ConfigSource,
    key: &'static str,
    default_millis: u64,
) -> Result<Duration, ConfigError> {
    env_parse(source, key, default_millis).map(Duration::from_millis)
}

/// Connection settings for the build/test backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

/// Connection settings for the IMAP mailbox.
#[derive(Clone, PartialEq)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub mailbox: String,
    pub timeout: Duration,
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("mailbox", &self.mailbox)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub backend: BackendConfig,
    pub dispatch: DispatchConfig,
    /// Interval between ingestion passes and between dispatch passes.
    pub check_every: Duration,
    pub default_deadline: chrono::Duration,
    pub mail_dir: PathBuf,
    pub imap: Option<ImapConfig>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let base_url = env_string(source, "REPORTS_BACKEND_URL")
            .ok_or(ConfigError::Missing("REPORTS_BACKEND_URL"))?;

        let backend = BackendConfig {
            base_url,
            token: env_string(source, "REPORTS_BACKEND_TOKEN"),
            connect_timeout: env_duration_millis(source, "REPORTS_HTTP_CONNECT_TIMEOUT_MS", 3_000)?,
            timeout: env_duration_millis(source, "REPORTS_HTTP_TIMEOUT_MS", 10_000)?,
        };

        let formats: Vec<String> = env_string(source, "REPORTS_REPORT_FORMATS")
            .unwrap_or_else(|| "txt".to_string())
            .split(',')
            .map(|format| format.trim().to_string())
            .filter(|format| !format.is_empty())
            .collect();
        if formats.is_empty() {
            return Err(ConfigError::Invalid {
                key: "REPORTS_REPORT_FORMATS",
                value: String::new(),
                reason: "at least one format is required".to_string(),
            });
        }

        let dispatch = DispatchConfig {
            delivery: DeliveryOptions {
                delay: env_duration_secs(source, "REPORTS_SEND_DELAY_SECS", 12_600)?,
                kind: env_parse(source, "REPORTS_REPORT_KIND", ReportKind::Boot)?,
                formats,
            },
            retry: parse_retry_policy(source)?,
        };

        let deadline_hours = env_parse(source, "REPORTS_DEFAULT_DEADLINE_HOURS", 48)?;

        Ok(Self {
            backend,
            dispatch,
            check_every: env_duration_secs(source, "REPORTS_CHECK_EVERY_SECS", 900)?,
            default_deadline: deadline_horizon("REPORTS_DEFAULT_DEADLINE_HOURS", deadline_hours)?,
            mail_dir: env_string(source, "REPORTS_MAIL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MAIL_DIR)),
            imap: parse_imap(source)?,
        })
    }
}

/// Deadline horizon from a positive number of hours.
pub fn deadline_horizon(key: &'static str, hours: i64) -> Result<chrono::Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key,
        value: hours.to_string(),
        reason: reason.to_string(),
    };
    if hours <= 0 {
        return Err(invalid("must be a positive number of hours"));
    }
    chrono::Duration::try_hours(hours).ok_or_else(|| invalid("out of range"))
}

/// `0` or `unbounded` disable the ceiling.
fn parse_retry_policy(source: &dyn ConfigSource) -> Result<RetryPolicy, ConfigError> {
    match env_string(source, "REPORTS_MAX_RETRIES") {
        None => Ok(RetryPolicy::default()),
        Some(value) if value.eq_ignore_ascii_case("unbounded") => Ok(RetryPolicy::unbounded()),
        Some(value) => match value.parse::<u32>() {
            Ok(0) => Ok(RetryPolicy::unbounded()),
            Ok(max) => Ok(RetryPolicy {
                max_retries: Some(max),
            }),
            Err(err) => Err(ConfigError::Invalid {
                key: "REPORTS_MAX_RETRIES",
                value,
                reason: err.to_string(),
            }),
        },
    }
}

fn parse_imap(source: &dyn ConfigSource) -> Result<Option<ImapConfig>, ConfigError> {
    let Some(host) = env_string(source, "REPORTS_IMAP_HOST") else {
        return Ok(None);
    };

    let username = env_string(source, "REPORTS_IMAP_USERNAME")
        .ok_or(ConfigError::Missing("REPORTS_IMAP_USERNAME"))?;
    let password = env_string(source, "REPORTS_IMAP_PASSWORD")
        .ok_or(ConfigError::Missing("REPORTS_IMAP_PASSWORD"))?;

    Ok(Some(ImapConfig {
        host,
        port: env_parse(source, "REPORTS_IMAP_PORT", 993)?,
        username,
        password,
        mailbox: env_string(source, "REPORTS_IMAP_MAILBOX").unwrap_or_else(|| "INBOX".to_string()),
        timeout: env_duration_secs(source, "REPORTS_IMAP_TIMEOUT_SECS", 30)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config =
            ServiceConfig::from_source(&source(&[("REPORTS_BACKEND_URL", "https://api.example.org")]))
                .unwrap();

        assert_eq!(config.backend.base_url, "https://api.example.org");
        assert_eq!(config.backend.token, None);
        assert_eq!(config.backend.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.check_every, Duration::from_secs(900));
        assert_eq!(config.dispatch.delivery.delay, Duration::from_secs(12_600));
        assert_eq!(config.dispatch.delivery.kind, ReportKind::Boot);
        assert_eq!(config.dispatch.delivery.formats, vec!["txt"]);
        assert_eq!(config.dispatch.retry.max_retries, Some(200));
        assert_eq!(config.default_deadline, chrono::Duration::hours(48));
        assert_eq!(config.mail_dir, PathBuf::from(DEFAULT_MAIL_DIR));
        assert!(config.imap.is_none());
    }

    #[test]
    fn test_missing_backend_url() {
        assert_eq!(
            ServiceConfig::from_source(&source(&[])),
            Err(ConfigError::Missing("REPORTS_BACKEND_URL"))
        );
    }

    #[test]
    fn test_overrides() {
        let config = ServiceConfig::from_source(&source(&[
            ("REPORTS_BACKEND_URL", "https://api.example.org"),
            ("REPORTS_BACKEND_TOKEN", "secret"),
            ("REPORTS_REPORT_KIND", "build"),
            ("REPORTS_REPORT_FORMATS", "txt, html"),
            ("REPORTS_MAX_RETRIES", "unbounded"),
            ("REPORTS_SEND_DELAY_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.backend.token.as_deref(), Some("secret"));
        assert_eq!(config.dispatch.delivery.kind, ReportKind::Build);
        assert_eq!(config.dispatch.delivery.formats, vec!["txt", "html"]);
        assert_eq!(config.dispatch.retry, RetryPolicy::unbounded());
        assert_eq!(config.dispatch.delivery.delay, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_number() {
        let result = ServiceConfig::from_source(&source(&[
            ("REPORTS_BACKEND_URL", "https://api.example.org"),
            ("REPORTS_CHECK_EVERY_SECS", "often"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                key: "REPORTS_CHECK_EVERY_SECS",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_deadline_hours() {
        for hours in ["0", "-3", "9223372036854775807"] {
            let result = ServiceConfig::from_source(&source(&[
                ("REPORTS_BACKEND_URL", "https://api.example.org"),
                ("REPORTS_DEFAULT_DEADLINE_HOURS", hours),
            ]));
            assert!(
                matches!(
                    result,
                    Err(ConfigError::Invalid {
                        key: "REPORTS_DEFAULT_DEADLINE_HOURS",
                        ..
                    })
                ),
                "hours {}",
                hours
            );
        }

        assert_eq!(
            deadline_horizon("hours", 6),
            Ok(chrono::Duration::hours(6))
        );
    }

    #[test]
    fn test_imap_requires_credentials() {
        let result = ServiceConfig::from_source(&source(&[
            ("REPORTS_BACKEND_URL", "https://api.example.org"),
            ("REPORTS_IMAP_HOST", "imap.example.org"),
            ("REPORTS_IMAP_USERNAME", "reports"),
        ]));
        assert_eq!(result, Err(ConfigError::Missing("REPORTS_IMAP_PASSWORD")));
    }

    #[test]
    fn test_imap_config() {
        let config = ServiceConfig::from_source(&source(&[
            ("REPORTS_BACKEND_URL", "https://api.example.org"),
            ("REPORTS_IMAP_HOST", "imap.example.org"),
            ("REPORTS_IMAP_USERNAME", "reports"),
            ("REPORTS_IMAP_PASSWORD", "hunter2"),
        ]))
        .unwrap();

        let imap = config.imap.unwrap();
        assert_eq!(imap.port, 993);
        assert_eq!(imap.mailbox, "INBOX");
        assert!(!format!("{:?}", imap).contains("hunter2"));
    }
}
