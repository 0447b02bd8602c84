//! # HighMux - Highlight AI to OpenAI Gateway Server
//!
//! A proxy server that exposes the Highlight AI chat backend through an
//! OpenAI-compatible API. Accounts are addressed by self-describing API
//! keys carrying the long-lived refresh credential; the gateway manages
//! short-lived access tokens, serializes traffic per account, and detects
//! silently suspended accounts from the response stream itself.
//!
//! ## Features
//!
//! - **OpenAI-compatible API**: Drop-in replacement for OpenAI chat endpoints
//! - **Tool/Function Calling**: Pass-through of OpenAI tool definitions
//! - **Streaming Support**: Server-Sent Events (SSE) streaming responses
//! - **Account Sessions**: Cached access tokens with forced refresh on 401
//! - **Suspension Detection**: Content-signature and timing heuristics
//! - **Error Handling**: Stable OpenAI-style error envelopes
//! - **Configurable Logging**: Structured logging with tracing
//!
//! ## Quick Start
//!
//! ```bash
//! highmux                  # start the gateway on PORT (default 3000)
//! highmux doctor           # check configuration
//! highmux validate         # validate configuration and exit
//! ```
//!
//! ## Configuration
//!
//! Everything is driven by environment variables (a `.env` file works too):
//!
//! ```bash
//! export PORT=3000
//! export LOG_LEVEL=info
//! export MAX_RETRIES=1
//! export MATCH_SUCCESS_LEN=0.5
//! export CHAT_SEMAPHORE=1
//! export BAN_CONTENTS_PATH=config/ban_contents.json
//! ```
//!
//! ## API Usage
//!
//! ```bash
//! curl -X POST http://localhost:3000/v1/chat/completions \
//!   -H "Authorization: Bearer $HIGHMUX_API_KEY" \
//!   -H "Content-Type: application/json" \
//!   -d '{
//!     "model": "gpt-4o",
//!     "messages": [{"role": "user", "content": "Hello!"}],
//!     "stream": false
//!   }'
//! ```
//!
//! ## License
//!
//! Licensed under either of Apache License, Version 2.0 or MIT license at your option.
//!
//! Authors: Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp
//!

/* --- uses ------------------------------------------------------------------------------------ */

use std::env;

use axum::Router;
use tracing::{Level, info};

use highmux::config::{Config, LogLevel, ValidationSeverity};
use highmux::error::{HighlightError, Result};

/* --- constants ------------------------------------------------------------------------------ */

/** the version as defined in cargo.toml */
const VERSION: &str = env!("CARGO_PKG_VERSION");

/* --- start of code -------------------------------------------------------------------------- */

///
/// Main application entry point for the HighMux gateway server.
///
/// Initializes logging, loads configuration from environment variables,
/// creates the application, and starts the HTTP server.
#[tokio::main]
async fn main() {
    // Handle CLI arguments before config loading
    handle_cli_args();

    if let Err(e) = run().await {
        // Print error message line by line to ensure proper formatting
        let error_msg = format!("{}", e);
        eprintln!("Error:");
        for line in error_msg.lines() {
            eprintln!("{}", line);
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    initialize_logging(&config);

    let app = highmux::create_app(config.clone()).await?;

    start_server(&config, app).await
}

///
/// Handle command line arguments like --version and --help before config loading.
///
/// This ensures these commands work even without proper configuration.
fn handle_cli_args() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return; // No arguments, proceed with normal startup
    }

    match args[1].as_str() {
        "--version" | "-V" => {
            println!("highmux {}", VERSION);
            std::process::exit(0);
        }
        "--help" | "-h" => {
            print_help();
            std::process::exit(0);
        }
        "doctor" => {
            run_doctor();
            std::process::exit(0);
        }
        "validate" => {
            let exit_code = run_validate();
            std::process::exit(exit_code);
        }
        _ => {
            // Unknown command or option - show error and help
            if args[1].starts_with('-') {
                eprintln!("Error: Unknown option: {}", args[1]);
                eprintln!();
                print_help();
                std::process::exit(1);
            } else {
                eprintln!("Error: Unknown command: {}", args[1]);
                eprintln!();
                eprintln!("Available commands:");
                eprintln!("  doctor    - Run configuration health check");
                eprintln!("  validate  - Validate configuration");
                eprintln!();
                eprintln!("Available options:");
                eprintln!("  --version, -V  - Show version");
                eprintln!("  --help, -h     - Show help");
                eprintln!();
                eprintln!("Run 'highmux --help' for more information.");
                std::process::exit(1);
            }
        }
    }
}

///
/// Print help information for the HighMux CLI.
fn print_help() {
    println!("HighMux v{}", VERSION);
    println!("Gateway exposing the Highlight AI chat backend through an OpenAI-compatible API");
    println!();
    println!("USAGE:");
    println!("    highmux [COMMAND] [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    doctor              Check configuration and system health");
    println!("    validate            Validate configuration and exit");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help          Print help information");
    println!("    -V, --version       Print version information");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    HIGHLIGHT_BASE_URL        Backend base URL (default: chat-backend.highlightai.com)");
    println!("    HIGHLIGHT_USER_AGENT      Impersonated desktop-client User-Agent");
    println!("    PORT                      Server port (default: 3000)");
    println!(
        "    LOG_LEVEL                 Log level: trace, debug, info, warn, error (default: info)"
    );
    println!("    MAX_RETRIES               Transient retry bound (default: 1)");
    println!("    MATCH_SUCCESS_LEN         Ban-signature match threshold (default: 0.5)");
    println!("    CHAT_SEMAPHORE            Concurrency slots per account (default: 1)");
    println!("    BAN_CONTENTS_PATH         Ban-signature catalogue file (default: config/ban_contents.json)");
    println!("    PROXY                     Fallback egress proxy for upstream calls");
    println!();
    println!("EXAMPLES:");
    println!("    highmux                     Start the gateway server");
    println!("    highmux doctor              Check configuration");
    println!("    highmux validate            Validate and exit");
    println!();
    println!("For more information, visit: https://github.com/yarenty/highmux");
}

///
/// Run the doctor command to check configuration and system health.
///
/// Performs comprehensive checks and provides helpful diagnostics.
fn run_doctor() {
    // Load .env file first so we can check actual environment variables
    let _ = dotenvy::dotenv();

    println!("HighMux Doctor - Configuration Health Check");
    println!("{}", "=".repeat(60));
    println!();

    // Check for .env file
    let env_file_exists = std::path::Path::new(".env").exists();
    if env_file_exists {
        println!("[OK] Found .env file");
    } else {
        println!("[INFO] No .env file found (using environment variables)");
    }
    println!();

    // Every variable has a default; show which ones are overridden
    println!("Environment Overrides:");
    let known_vars = [
        "HIGHLIGHT_BASE_URL",
        "HIGHLIGHT_USER_AGENT",
        "PORT",
        "LOG_LEVEL",
        "MAX_RETRIES",
        "MATCH_SUCCESS_LEN",
        "CHAT_SEMAPHORE",
        "BAN_CONTENTS_PATH",
        "PROXY",
        "CONNECT_TIMEOUT_SECS",
        "REFRESH_TIMEOUT_SECS",
        "CHAT_TIMEOUT_SECS",
        "REQUEST_TIMEZONE",
    ];
    let mut any_override = false;
    for var in &known_vars {
        if let Ok(val) = std::env::var(var) {
            any_override = true;
            println!("  [SET] {}: {}", var, val);
        }
    }
    if !any_override {
        println!("  [INFO] None set - running with built-in defaults");
    }
    println!();

    // Try to load and validate config
    println!("Configuration Validation:");
    match Config::from_env() {
        Ok(config) => {
            println!("  [OK] Configuration loaded successfully");
            println!();

            let issues = config.validate();
            if issues.is_empty() {
                println!("  [OK] No validation issues found");
                println!();
                println!("[SUCCESS] Configuration looks good! You're ready to run HighMux.");
            } else {
                let errors: Vec<_> = issues
                    .iter()
                    .filter(|i| i.severity == ValidationSeverity::Error)
                    .collect();
                let warnings: Vec<_> = issues
                    .iter()
                    .filter(|i| i.severity == ValidationSeverity::Warning)
                    .collect();
                let infos: Vec<_> = issues
                    .iter()
                    .filter(|i| i.severity == ValidationSeverity::Info)
                    .collect();

                if !errors.is_empty() {
                    println!("  [ERROR] Found {} error(s):", errors.len());
                    for issue in &errors {
                        println!("     • {}: {}", issue.field, issue.message);
                        if let Some(suggestion) = &issue.suggestion {
                            println!("       [TIP] {}", suggestion);
                        }
                    }
                    println!();
                }

                if !warnings.is_empty() {
                    println!("  [WARNING] Found {} warning(s):", warnings.len());
                    for issue in &warnings {
                        println!("     • {}: {}", issue.field, issue.message);
                        if let Some(suggestion) = &issue.suggestion {
                            println!("       [TIP] {}", suggestion);
                        }
                    }
                    println!();
                }

                if !infos.is_empty() {
                    println!("  [INFO] Found {} info message(s):", infos.len());
                    for issue in &infos {
                        println!("     • {}: {}", issue.field, issue.message);
                        if let Some(suggestion) = &issue.suggestion {
                            println!("       [TIP] {}", suggestion);
                        }
                    }
                    println!();
                }

                if errors.is_empty() {
                    println!(
                        "[SUCCESS] Configuration has warnings but should work. Review suggestions above."
                    );
                } else {
                    println!(
                        "[ERROR] Configuration has errors. Please fix them before running HighMux."
                    );
                }
            }
        }
        Err(e) => {
            println!("  [ERROR] Failed to load configuration:");
            println!("     {}", e);
        }
    }
}

///
/// Run the validate command to validate configuration and exit.
///
/// Returns exit code 0 if valid, 1 if invalid.
fn run_validate() -> i32 {
    match Config::from_env() {
        Ok(config) => {
            let issues = config.validate();
            let errors: Vec<_> =
                issues.iter().filter(|i| i.severity == ValidationSeverity::Error).collect();

            if errors.is_empty() {
                println!("[OK] Configuration is valid");
                0
            } else {
                eprintln!("[ERROR] Configuration validation failed:");
                for issue in &errors {
                    eprintln!("  • {}: {}", issue.field, issue.message);
                    if let Some(suggestion) = &issue.suggestion {
                        eprintln!("    Suggestion: {}", suggestion);
                    }
                }
                1
            }
        }
        Err(e) => {
            eprintln!("[ERROR] Configuration error: {}", e);
            1
        }
    }
}

///
/// Initialize logging with the specified log level.
///
/// Sets up tracing subscriber with appropriate log level based on configuration.
///
/// # Arguments
///  * `config` - application configuration containing log level settings
fn initialize_logging(config: &Config) {
    let log_level = match config.log_level {
        LogLevel::Trace => Level::TRACE,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    };

    tracing_subscriber::fmt().with_max_level(log_level).with_target(false).init();
}

///
/// Start the HTTP server and log startup information.
///
/// Binds to the configured port and starts serving requests. Logs important
/// information about the server configuration and available endpoints.
///
/// # Arguments
///  * `config` - application configuration
///  * `app` - configured Axum application
///
/// # Returns
///  * `Ok(())` when server shuts down gracefully
///  * `HighlightError::Http` if server binding or startup fails
async fn start_server(config: &Config, app: Router) -> Result<()> {
    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await.map_err(|e| {
            let error_msg = format!("Failed to bind to port {}: {}", config.port, e);

            // Check if it's an "Address already in use" error and provide helpful suggestions
            let error_str = e.to_string();
            if error_str.contains("Address already in use")
                || error_str.contains("address already in use")
            {
                let suggestions = format!(
                    "{}\n\n\
                    Port {} is already in use. Here are some solutions:\n\n\
                    1. Close the other instance:\n\
                       • Find the process using port {}:\n\
                         lsof -i :{}\n\
                       • Kill the process:\n\
                         kill -9 <PID>\n\n\
                    2. Use killport (if installed):\n\
                       killport {}\n\n\
                    3. Change the port:\n\
                       export PORT=3001\n\
                       highmux\n\n\
                    Run 'highmux doctor' for more help.",
                    error_msg, config.port, config.port, config.port, config.port
                );
                HighlightError::Http(suggestions)
            } else {
                HighlightError::Http(format!(
                    "{}\n\n\
                    To fix this:\n\
                    • Check if the port is valid (1-65535)\n\
                    • Ensure you have permission to bind to the port\n\
                    • Try a different port: export PORT=3001\n\n\
                    Run 'highmux doctor' for more help.",
                    error_msg
                ))
            }
        })?;

    log_startup_info(config);

    axum::serve(listener, app)
        .await
        .map_err(|e| HighlightError::Http(format!("Server error: {}", e)))?;

    Ok(())
}

///
/// Log startup information and configuration details.
///
/// # Arguments
///  * `config` - application configuration
fn log_startup_info(config: &Config) {
    info!("HighMux v{} running on port {}", VERSION, config.port);
    info!("Per-account concurrency: {} slot(s)", config.chat_semaphore);
    info!("OpenAI-compatible endpoint: http://localhost:{}/v1", config.port);

    if config.log_level.is_trace_enabled() {
        info!(
            "[TRACE] Trace logging is ENABLED (LOG_LEVEL={:?}) - raw upstream stream lines will \
       be logged",
            config.log_level
        );
    }
}
