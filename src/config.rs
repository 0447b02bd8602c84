//!
//! Configuration management for the Highlight AI to OpenAI gateway.
//!
//! Handles loading configuration from environment variables with sensible
//! defaults. Follows Single Responsibility Principle - manages all
//! configuration concerns.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::env;
use std::path::PathBuf;

use crate::error::{HighlightError, Result};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Application configuration structure.
///
/// All values come from environment variables (with `.env` support via
/// dotenvy). The Highlight backend URL and user agent default to the values
/// the desktop client uses; everything else has operational defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /** Highlight chat-backend base URL */
    pub base_url: String,
    /** User-Agent header sent on every upstream request */
    pub user_agent: String,
    /** HTTP server port number */
    pub port: u16,
    /** application logging level */
    pub log_level: LogLevel,
    /** retry bound for transient upstream failures */
    pub max_retries: u32,
    /** content-signature match threshold (fraction of catalogue entry length) */
    pub match_success_len: f64,
    /** per-account concurrency slots (1 = fully serialized per account) */
    pub chat_semaphore: usize,
    /** process-wide fallback proxy URL for upstream calls */
    pub proxy: Option<String>,
    /** path of the persisted ban-signature catalogue */
    pub ban_contents_path: PathBuf,
    /** connect timeout for upstream calls, in seconds */
    pub connect_timeout_secs: u64,
    /** overall timeout for token refresh calls, in seconds */
    pub refresh_timeout_secs: u64,
    /** overall timeout for chat calls, in seconds */
    pub chat_timeout_secs: u64,
    /** timezone string forwarded in chat requests */
    pub request_timezone: String,
}

///
/// Logging level enumeration.
///
/// Defines available log levels with helper methods for level checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

///
/// Configuration validation issue.
///
/// Represents a single validation problem found during configuration check.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Configuration field name
    pub field: String,
    /// Severity of the issue
    pub severity: ValidationSeverity,
    /// Description of the issue
    pub message: String,
    /// Optional suggestion for fixing the issue
    pub suggestion: Option<String>,
}

///
/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Error - configuration is invalid and will cause failures
    Error,
    /// Warning - configuration may work but has potential issues
    Warning,
    /// Info - informational note about configuration
    Info,
}

/* --- constants ------------------------------------------------------------------------------ */

/** Default Highlight chat-backend base URL */
const DEFAULT_BASE_URL: &str = "https://chat-backend.highlightai.com";

/** User-Agent of the Highlight desktop client this gateway impersonates */
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Highlight/1.3.61 \
    Chrome/132.0.6834.210 Electron/34.5.8 Safari/537.36";

/** Default ban-signature catalogue location */
const DEFAULT_BAN_CONTENTS_PATH: &str = "config/ban_contents.json";

/* --- start of code -------------------------------------------------------------------------- */

impl LogLevel {
    ///
    /// Check if trace-level logging is enabled.
    ///
    /// Returns true for Trace and Debug levels, which enable logging of raw
    /// upstream stream lines.
    ///
    /// # Returns
    ///  * `true` if trace logging should be enabled
    ///  * `false` otherwise
    pub fn is_trace_enabled(self) -> bool {
        matches!(self, LogLevel::Trace | LogLevel::Debug)
    }
}

impl From<&str> for LogLevel {
    ///
    /// Convert string representation to LogLevel enum.
    ///
    /// Case-insensitive conversion with Info as the default fallback.
    ///
    /// # Arguments
    ///  * `s` - string representation of log level
    ///
    /// # Returns
    ///  * Corresponding LogLevel enum value
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl Config {
    ///
    /// Load configuration from environment variables.
    ///
    /// Attempts to load a .env file if present, then reads configuration
    /// from environment variables with sensible defaults.
    ///
    /// # Returns
    ///  * Configuration object with all settings loaded
    ///  * `HighlightError::Config` if a value is present but invalid
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Config {
            base_url: env_or("HIGHLIGHT_BASE_URL", DEFAULT_BASE_URL),
            user_agent: env_or("HIGHLIGHT_USER_AGENT", DEFAULT_USER_AGENT),
            port: Self::get_port()?,
            log_level: Self::get_log_level(),
            max_retries: parse_env("MAX_RETRIES", 1)?,
            match_success_len: parse_env("MATCH_SUCCESS_LEN", 0.5)?,
            chat_semaphore: parse_env("CHAT_SEMAPHORE", 1)?,
            proxy: env::var("PROXY").ok().filter(|p| !p.trim().is_empty()),
            ban_contents_path: PathBuf::from(env_or("BAN_CONTENTS_PATH", DEFAULT_BAN_CONTENTS_PATH)),
            connect_timeout_secs: parse_env("CONNECT_TIMEOUT_SECS", 10)?,
            refresh_timeout_secs: parse_env("REFRESH_TIMEOUT_SECS", 30)?,
            chat_timeout_secs: parse_env("CHAT_TIMEOUT_SECS", 300)?,
            request_timezone: env_or("REQUEST_TIMEZONE", "Asia/Hong_Kong"),
        })
    }

    ///
    /// Get the server port from environment or use default.
    ///
    /// # Returns
    ///  * Port number as u16
    ///  * `HighlightError::Config` if port value is invalid
    fn get_port() -> Result<u16> {
        env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|e| {
                HighlightError::Config(format!(
                    "Invalid PORT value: {}\n\
         \n\
         PORT must be a number between 1 and 65535.\n\
            Example: export PORT=3000\n\
         \n\
         Run 'highmux doctor' for more help.",
                    e
                ))
            })
    }

    ///
    /// Get the log level from environment or use default.
    ///
    /// # Returns
    ///  * LogLevel enum value
    fn get_log_level() -> LogLevel {
        let log_level_str = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        LogLevel::from(log_level_str.as_str())
    }

    ///
    /// Validate configuration and return detailed validation results.
    ///
    /// Checks all configuration values for correctness and provides helpful
    /// suggestions for any issues found.
    ///
    /// # Returns
    ///  * Vector of validation issues (empty if all valid)
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if !self.base_url.starts_with("https://") {
            issues.push(ValidationIssue {
                field: "HIGHLIGHT_BASE_URL".to_string(),
                severity: ValidationSeverity::Warning,
                message: format!("Base URL should use HTTPS: {}", self.base_url),
                suggestion: Some("Use https:// for secure connections".to_string()),
            });
        }

        if self.port == 0 {
            issues.push(ValidationIssue {
                field: "PORT".to_string(),
                severity: ValidationSeverity::Error,
                message: "Port cannot be 0".to_string(),
                suggestion: Some("Use a valid port number between 1 and 65535".to_string()),
            });
        }

        if self.chat_semaphore == 0 {
            issues.push(ValidationIssue {
                field: "CHAT_SEMAPHORE".to_string(),
                severity: ValidationSeverity::Error,
                message: "Per-account concurrency cannot be 0".to_string(),
                suggestion: Some("Use CHAT_SEMAPHORE=1 to fully serialize each account".to_string()),
            });
        }

        if self.match_success_len <= 0.0 || self.match_success_len > 1.0 {
            issues.push(ValidationIssue {
                field: "MATCH_SUCCESS_LEN".to_string(),
                severity: ValidationSeverity::Error,
                message: format!(
                    "Match threshold must be within (0, 1], got {}",
                    self.match_success_len
                ),
                suggestion: Some("The default 0.5 matches on half of a known signature".to_string()),
            });
        }

        if self.max_retries > 10 {
            issues.push(ValidationIssue {
                field: "MAX_RETRIES".to_string(),
                severity: ValidationSeverity::Warning,
                message: format!("MAX_RETRIES ({}) is very high", self.max_retries),
                suggestion: Some(
                    "Consider a lower value (1-3); every retry re-drives the account".to_string(),
                ),
            });
        }

        if self.chat_semaphore > 1 {
            issues.push(ValidationIssue {
                field: "CHAT_SEMAPHORE".to_string(),
                severity: ValidationSeverity::Info,
                message: format!(
                    "CHAT_SEMAPHORE={} allows overlapping sessions per account",
                    self.chat_semaphore
                ),
                suggestion: Some(
                    "Overlapping upstream sessions are what the vendor's abuse detection looks for"
                        .to_string(),
                ),
            });
        }

        issues
    }
}

///
/// Read an environment variable with a default fallback.
fn env_or(name: &str, default: &str) -> String {
    env::var(name).ok().filter(|v| !v.trim().is_empty()).unwrap_or_else(|| default.to_string())
}

///
/// Parse an environment variable into any FromStr type, with a default.
///
/// A present-but-unparsable value is a configuration error rather than a
/// silent fallback.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| {
            HighlightError::Config(format!(
                "Invalid {} value '{}': {}\n\nRun 'highmux doctor' for more help.",
                name, raw, e
            ))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_from_str_is_case_insensitive() {
        assert_eq!(LogLevel::from("DEBUG"), LogLevel::Debug);
        assert_eq!(LogLevel::from("warn"), LogLevel::Warn);
        assert_eq!(LogLevel::from("bogus"), LogLevel::Info);
    }

    #[test]
    fn trace_enabled_for_debug_and_trace() {
        assert!(LogLevel::Trace.is_trace_enabled());
        assert!(LogLevel::Debug.is_trace_enabled());
        assert!(!LogLevel::Info.is_trace_enabled());
    }

    #[test]
    fn validate_flags_zero_semaphore() {
        let mut config = test_config();
        config.chat_semaphore = 0;
        let issues = config.validate();
        assert!(issues.iter().any(|i| {
            i.field == "CHAT_SEMAPHORE" && i.severity == ValidationSeverity::Error
        }));
    }

    #[test]
    fn validate_flags_out_of_range_threshold() {
        let mut config = test_config();
        config.match_success_len = 1.5;
        let issues = config.validate();
        assert!(issues.iter().any(|i| i.field == "MATCH_SUCCESS_LEN"));
    }

    #[test]
    fn validate_accepts_defaults() {
        let issues = test_config().validate();
        assert!(
            issues.iter().all(|i| i.severity != ValidationSeverity::Error),
            "default config must have no errors: {:?}",
            issues
        );
    }

    fn test_config() -> Config {
        Config {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            port: 3000,
            log_level: LogLevel::Info,
            max_retries: 1,
            match_success_len: 0.5,
            chat_semaphore: 1,
            proxy: None,
            ban_contents_path: PathBuf::from(DEFAULT_BAN_CONTENTS_PATH),
            connect_timeout_secs: 10,
            refresh_timeout_secs: 30,
            chat_timeout_secs: 300,
            request_timezone: "Asia/Hong_Kong".to_string(),
        }
    }
}
