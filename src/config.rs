//! Configuration types.
//!
//! Everything is read once at startup (`AppConfig::from_env`) and passed
//! into constructors. Each section also has a `from_lookup` constructor so
//! tests can supply values without touching the process environment.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::digest::{HTML_CAP, TEXT_CAP};
use crate::error::ConfigError;
use crate::llm::LlmConfig;
use crate::pipeline::enricher::EnricherConfig;

/// Largest batch a single run will fetch.
pub const MAX_BATCH: usize = 500;

/// Longest fetch window, in hours (30 days).
pub const MAX_WINDOW_HOURS: u64 = 30 * 24;

/// Key/value lookup, usually `std::env::var`.
pub trait Lookup: Fn(&str) -> Option<String> {}
impl<F: Fn(&str) -> Option<String>> Lookup for F {}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Lookup,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse '{raw}'"),
        }),
    }
}

/// IMAP mailbox the digest is built from.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub mailbox: String,
}

impl ImapConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    /// Credentials are shared with SMTP (`SMTP_USER` / `SMTP_PASS`).
    pub fn from_lookup(lookup: &impl Lookup) -> Result<Self, ConfigError> {
        let username = lookup("SMTP_USER").ok_or_else(|| ConfigError::MissingRequired {
            key: "SMTP_USER".into(),
            hint: "Set it to your mailbox address.".into(),
        })?;
        let password = lookup("SMTP_PASS").ok_or_else(|| ConfigError::MissingRequired {
            key: "SMTP_PASS".into(),
            hint: "Use an app password for IMAP/SMTP access.".into(),
        })?;

        Ok(Self {
            host: lookup("IMAP_HOST").unwrap_or_else(|| "imap.gmail.com".to_string()),
            port: parse_or(lookup, "IMAP_PORT", 993)?,
            username,
            password: SecretString::from(password),
            mailbox: lookup("IMAP_MAILBOX").unwrap_or_else(|| "INBOX".to_string()),
        })
    }
}

/// Outgoing SMTP for the digest email.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub to_address: String,
}

impl SmtpConfig {
    /// `Ok(None)` when `EMAIL_ENABLED` is not `true`.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: &impl Lookup) -> Result<Option<Self>, ConfigError> {
        let enabled = lookup("EMAIL_ENABLED")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if !enabled {
            return Ok(None);
        }

        let username = lookup("SMTP_USER").ok_or_else(|| ConfigError::MissingRequired {
            key: "SMTP_USER".into(),
            hint: "EMAIL_ENABLED=true needs SMTP credentials.".into(),
        })?;
        let password = lookup("SMTP_PASS").ok_or_else(|| ConfigError::MissingRequired {
            key: "SMTP_PASS".into(),
            hint: "EMAIL_ENABLED=true needs SMTP credentials.".into(),
        })?;
        let to_address = lookup("EMAIL_TO").unwrap_or_else(|| username.clone());

        Ok(Some(Self {
            host: lookup("SMTP_SERVER").unwrap_or_else(|| "smtp.gmail.com".to_string()),
            port: parse_or(lookup, "SMTP_PORT", 465)?,
            from_address: username.clone(),
            username,
            password: SecretString::from(password),
            to_address,
        }))
    }
}

/// Settings for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Messages fetched per run.
    pub max_count: usize,
    /// How far back to look.
    pub window: Duration,
    pub enricher: EnricherConfig,
    /// Ranked items in the text digest.
    pub text_cap: usize,
    /// Ranked items in the HTML digest.
    pub html_cap: usize,
    /// History ledger location.
    pub history_path: PathBuf,
    /// Where the text digest is written; `None` skips the file.
    pub digest_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_count: 10,
            window: Duration::from_secs(24 * 3600),
            enricher: EnricherConfig::default(),
            text_cap: TEXT_CAP,
            html_cap: HTML_CAP,
            history_path: PathBuf::from("history.csv"),
            digest_path: Some(PathBuf::from("digest.txt")),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: &impl Lookup) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_count = parse_or(lookup, "SMART_INBOX_MAX_COUNT", defaults.max_count)?;
        let workers = parse_or(lookup, "SMART_INBOX_WORKERS", defaults.enricher.workers)?;
        let timeout_secs = parse_or(
            lookup,
            "SMART_INBOX_INFERENCE_TIMEOUT_SECS",
            defaults.enricher.inference_timeout.as_secs(),
        )?;

        let config = Self {
            max_count,
            enricher: EnricherConfig {
                inference_timeout: Duration::from_secs(timeout_secs),
                workers,
            },
            history_path: lookup("SMART_INBOX_HISTORY")
                .map(PathBuf::from)
                .unwrap_or(defaults.history_path),
            digest_path: lookup("SMART_INBOX_DIGEST")
                .map(PathBuf::from)
                .or(defaults.digest_path),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Check bounds after overrides are applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_count == 0 || self.max_count > MAX_BATCH {
            return Err(ConfigError::InvalidValue {
                key: "max_count".into(),
                message: format!("must be between 1 and {MAX_BATCH}, got {}", self.max_count),
            });
        }
        if self.enricher.workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "workers".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.window.is_zero() || self.window > Duration::from_secs(MAX_WINDOW_HOURS * 3600) {
            return Err(ConfigError::InvalidValue {
                key: "window".into(),
                message: format!(
                    "must be between 1 hour and {MAX_WINDOW_HOURS} hours, got {:?}",
                    self.window
                ),
            });
        }
        if self.enricher.inference_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "inference_timeout".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Everything `main` needs, minus the IMAP section (only `run` needs it).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub smtp: Option<SmtpConfig>,
    pub llm: Option<LlmConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: &impl Lookup) -> Result<Self, ConfigError> {
        Ok(Self {
            pipeline: PipelineConfig::from_lookup(lookup)?,
            smtp: SmtpConfig::from_lookup(lookup)?,
            llm: LlmConfig::from_lookup(lookup),
        })
    }
}
