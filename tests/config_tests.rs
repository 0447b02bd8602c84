//! Configuration module tests
//!
//! Tests for configuration loading, validation, and parsing from environment variables.
//!
//! Uses temp-env to safely manage environment variables during tests, automatically
//! restoring them after each test completes.

use highmux::config::{Config, LogLevel};
use temp_env::with_vars;

/// Test that every variable has a working default
#[test]
fn test_defaults() {
    // Skip this test if .env file exists, as dotenv() will load vars from it
    if std::path::Path::new(".env").exists() {
        eprintln!("Skipping test_defaults: .env file exists");
        return;
    }

    with_vars(
        vec![
            ("HIGHLIGHT_BASE_URL", None::<&str>),
            ("PORT", None::<&str>),
            ("LOG_LEVEL", None::<&str>),
            ("MAX_RETRIES", None::<&str>),
            ("MATCH_SUCCESS_LEN", None::<&str>),
            ("CHAT_SEMAPHORE", None::<&str>),
            ("PROXY", None::<&str>),
        ],
        || {
            let config = Config::from_env().expect("Should load config with defaults");
            assert_eq!(config.base_url, "https://chat-backend.highlightai.com");
            assert_eq!(config.port, 3000, "Default port should be 3000");
            assert_eq!(config.log_level, LogLevel::Info);
            assert_eq!(config.max_retries, 1);
            assert_eq!(config.match_success_len, 0.5);
            assert_eq!(config.chat_semaphore, 1);
            assert!(config.proxy.is_none());
        },
    );
}

/// Test that custom port is parsed correctly
#[test]
fn test_custom_port() {
    with_vars(vec![("PORT", Some("8080"))], || {
        let config = Config::from_env().expect("Should load config");
        assert_eq!(config.port, 8080, "Should use custom port");
    });
}

/// Test that invalid port produces error
#[test]
fn test_invalid_port() {
    with_vars(vec![("PORT", Some("99999"))], || {
        let result = Config::from_env();
        assert!(result.is_err(), "Should fail with invalid port");
    });
}

/// Test log level parsing
#[test]
fn test_log_level_parsing() {
    let levels = vec!["trace", "debug", "info", "warn", "error"];
    for level in levels {
        with_vars(vec![("LOG_LEVEL", Some(level))], || {
            let config = Config::from_env().expect("Should load config");
            assert_eq!(
                format!("{:?}", config.log_level).to_lowercase(),
                level,
                "Should parse log level correctly"
            );
        });
    }
}

/// Test that an unknown log level falls back to info
#[test]
fn test_unknown_log_level_falls_back() {
    with_vars(vec![("LOG_LEVEL", Some("verbose"))], || {
        let config = Config::from_env().expect("Should load config");
        assert_eq!(config.log_level, LogLevel::Info);
    });
}

/// Test that the match threshold can be overridden
#[test]
fn test_custom_match_threshold() {
    with_vars(vec![("MATCH_SUCCESS_LEN", Some("0.75"))], || {
        let config = Config::from_env().expect("Should load config");
        assert_eq!(config.match_success_len, 0.75);
    });
}

/// Test that a non-numeric match threshold is a configuration error
#[test]
fn test_invalid_match_threshold() {
    with_vars(vec![("MATCH_SUCCESS_LEN", Some("half"))], || {
        let result = Config::from_env();
        assert!(result.is_err(), "Should fail with non-numeric threshold");
    });
}

/// Test that the per-account concurrency can be raised
#[test]
fn test_custom_chat_semaphore() {
    with_vars(vec![("CHAT_SEMAPHORE", Some("3"))], || {
        let config = Config::from_env().expect("Should load config");
        assert_eq!(config.chat_semaphore, 3);
    });
}

/// Test that a set-but-empty proxy counts as unset
#[test]
fn test_empty_proxy_is_none() {
    with_vars(vec![("PROXY", Some(""))], || {
        let config = Config::from_env().expect("Should load config");
        assert!(config.proxy.is_none());
    });
}

/// Test that the ban catalogue path can be moved
#[test]
fn test_custom_ban_contents_path() {
    with_vars(vec![("BAN_CONTENTS_PATH", Some("/tmp/highmux/bans.json"))], || {
        let config = Config::from_env().expect("Should load config");
        assert_eq!(config.ban_contents_path.to_str().unwrap(), "/tmp/highmux/bans.json");
    });
}

/// Test that validation accepts a default configuration
#[test]
fn test_validation_of_defaults() {
    // Validation operates on the loaded struct, no env needed
    if std::path::Path::new(".env").exists() {
        eprintln!("Skipping test_validation_of_defaults: .env file exists");
        return;
    }

    with_vars(vec![("MATCH_SUCCESS_LEN", None::<&str>), ("CHAT_SEMAPHORE", None::<&str>)], || {
        let config = Config::from_env().expect("Should load config");
        let issues = config.validate();
        assert!(
            issues
                .iter()
                .all(|i| i.severity != highmux::ValidationSeverity::Error),
            "Default configuration must validate cleanly: {:?}",
            issues
        );
    });
}
