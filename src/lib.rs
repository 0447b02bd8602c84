//! # HighMux - Highlight AI to OpenAI Gateway Library
//!
//! This crate exposes the Highlight AI chat backend through an
//! OpenAI-compatible API. While primarily designed as a binary application,
//! the library exposes its core functionality for programmatic use.
//!
//! ## Library Usage
//!
//! ```rust,no_run
//! use highmux::{Config, create_app};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load configuration
//!     let config = Config::from_env()?;
//!
//!     // Create the application
//!     let app = create_app(config).await?;
//!
//!     // Start server
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Configuration management and environment variable handling
//! - [`auth`] - API-key parsing and upstream identifier derivation
//! - [`session`] - Per-account access-token cache with suspension flags
//! - [`upstream`] - HTTP client for the Highlight backend
//! - [`ban`] - Silent-suspension detectors (content signatures + timing)
//! - [`gate`] - Per-account serialization, retry, and failure classification
//! - [`converter`] - Format conversion between OpenAI and Highlight formats
//! - [`catalog`] - Model name resolution and caching
//! - [`files`] - Image attachment uploads
//! - [`login`] - Deeplink login flow and API-key minting
//! - [`server`] - HTTP server setup and route handlers
//! - [`error`] - Error types and handling

pub mod auth;
pub mod ban;
pub mod catalog;
pub mod config;
pub mod converter;
pub mod error;
pub mod files;
pub mod gate;
pub mod login;
pub mod server;
pub mod session;
pub mod upstream;

// Re-export commonly used types
pub use config::{Config, ValidationIssue, ValidationSeverity};
pub use error::HighlightError;

/// Creates a new HighMux application with the given configuration.
///
/// This is a convenience function that sets up the full application stack
/// including the session store, ban-signature catalogue, routing, and
/// middleware.
///
/// # Arguments
///
/// * `config` - Application configuration
///
/// # Returns
///
/// Returns an Axum Router that can be served directly.
///
/// # Errors
///
/// Returns a `HighlightError` if the ban-signature catalogue cannot be
/// loaded or other initialization issues occur.
///
/// # Examples
///
/// ```rust,no_run
/// use highmux::{Config, create_app};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_env()?;
///     let app = create_app(config).await?;
///
///     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
///     axum::serve(listener, app).await?;
///     Ok(())
/// }
/// ```
pub async fn create_app(config: Config) -> Result<axum::Router, HighlightError> {
    use axum::Router;
    use axum::routing::{get, post};
    use std::sync::Arc;
    use tower_http::cors::CorsLayer;
    use tower_http::trace::TraceLayer;

    let app_state = Arc::new(server::AppState::new(config).await?);

    Ok(Router::new()
        .route("/v1/chat/completions", post(server::chat_completions))
        .route("/v1/models", get(server::models))
        .route("/health", get(server::health))
        .route("/highlight_login_api", post(server::login))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state))
}
