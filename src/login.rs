//!
//! Login flow: exchanging a Highlight deeplink for a gateway API key.
//!
//! The user signs in through the vendor's browser flow and receives a
//! deeplink of the form `https://highlightai.com/deeplink?code=...`. This
//! module exchanges that code for tokens, registers a fresh client uuid,
//! fetches the account profile, and mints the self-describing API key the
//! gateway accepts as a Bearer token.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::error::{HighlightError, Result};
use crate::upstream::UpstreamClient;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /** deeplink URL copied from the browser, `...?code=...` */
    pub login_link: String,
    /** optional proxy to bake into the minted key */
    pub proxy: Option<String>,
}

///
/// Login response body.
///
/// Failures are reported in-band (`success: false`) rather than as HTTP
/// errors, so the login page can render the message directly.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Value>,
}

///
/// Outcome of a successful login.
#[derive(Debug)]
pub struct MintedKey {
    /** base64url API key for the gateway */
    pub api_key: String,
    /** account details for display */
    pub user_info: Value,
}

/* --- start of code -------------------------------------------------------------------------- */

///
/// Run the full login exchange and mint an API key.
///
/// # Arguments
///  * `upstream` - vendor HTTP client
///  * `login_link` - deeplink URL containing the authorization code
///  * `proxy` - optional proxy for the exchange and for the minted key
///
/// # Returns
///  * Minted key and profile details
///  * `HighlightError::CallerInput` if the link carries no code
///  * `HighlightError::UpstreamAuth` if any exchange step fails
pub async fn process_login(
    upstream: &UpstreamClient,
    login_link: &str,
    proxy: Option<&str>,
) -> Result<MintedKey> {
    let code = extract_code(login_link).ok_or_else(|| {
        HighlightError::CallerInput("Login link carries no code parameter".to_string())
    })?;

    let amplitude_device_id = Uuid::new_v4().to_string();
    let client_uuid = Uuid::new_v4().to_string();

    let tokens = upstream.exchange_code(code, &amplitude_device_id, proxy).await?;
    upstream.register_client(&tokens.access_token, &client_uuid, proxy).await?;
    let profile = upstream.fetch_profile(&tokens.access_token, proxy).await?;

    info!(user_id = %profile.id, "login exchange completed");

    let api_key = mint_api_key(
        &tokens.refresh_token,
        &profile.id,
        &profile.email,
        &client_uuid,
        proxy,
    );

    Ok(MintedKey {
        api_key,
        user_info: json!({
            "user_id": profile.id,
            "email": profile.email,
            "client_uuid": client_uuid,
        }),
    })
}

///
/// Extract the authorization code from a deeplink URL.
///
/// Everything after the first `code=` counts, matching what the desktop
/// client itself does.
pub fn extract_code(login_link: &str) -> Option<&str> {
    let (_, rest) = login_link.split_once("code=")?;
    if rest.is_empty() { None } else { Some(rest) }
}

///
/// Encode the self-describing API key.
///
/// The key is base64url-encoded JSON carrying everything a later request
/// needs: the refresh credential, user id, email, client uuid, and the
/// optional proxy.
fn mint_api_key(
    rt: &str,
    user_id: &str,
    email: &str,
    client_uuid: &str,
    proxy: Option<&str>,
) -> String {
    let payload = json!({
        "rt": rt,
        "user_id": user_id,
        "email": email,
        "client_uuid": client_uuid,
        "proxy": proxy,
    });
    URL_SAFE.encode(payload.to_string().as_bytes())
}
