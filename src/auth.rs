//!
//! Caller credential parsing for the Highlight AI gateway.
//!
//! The API key presented as a Bearer token is self-describing: either a
//! base64-encoded JSON object carrying the account's refresh credential and
//! client identity, or a JWT whose payload carries the same fields. The
//! gateway does not validate authenticity - the refresh credential is proven
//! against the upstream on first use.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{HighlightError, Result};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Identity resolved from a caller's API key.
///
/// `rt` is the long-lived refresh credential and the account's primary key.
/// `user_id` and `client_uuid` are required for chat calls (they form the
/// upstream request identifier) but not for listing models.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    /** opaque refresh credential, primary account identity */
    pub rt: String,
    /** upstream user id */
    pub user_id: Option<String>,
    /** registered desktop-client uuid */
    pub client_uuid: Option<String>,
    /** account email, informational only */
    pub email: Option<String>,
    /** per-account proxy URL for upstream calls */
    pub proxy: Option<String>,
}

/* --- start of code -------------------------------------------------------------------------- */

///
/// Resolve caller identity from the Bearer token value.
///
/// Tries the base64-JSON form first (the form minted by the login flow),
/// then falls back to extracting the payload of a JWT. Either way the
/// decoded object must carry an `rt` field.
///
/// # Arguments
///  * `token` - raw Bearer token value
///
/// # Returns
///  * Parsed `UserInfo`
///  * `HighlightError::Credential` if neither form decodes
pub fn user_info_from_token(token: &str) -> Result<UserInfo> {
    if let Some(info) = parse_api_key(token) {
        return Ok(info);
    }

    if let Some(info) = parse_jwt_payload(token) {
        return Ok(info);
    }

    Err(HighlightError::Credential("Invalid authorization token format".to_string()))
}

///
/// Ensure the identity carries the fields a chat call needs.
///
/// # Arguments
///  * `info` - parsed caller identity
///
/// # Returns
///  * `(user_id, client_uuid)` on success
///  * `HighlightError::Credential` if either field is missing
pub fn require_chat_identity(info: &UserInfo) -> Result<(&str, &str)> {
    match (info.user_id.as_deref(), info.client_uuid.as_deref()) {
        (Some(user_id), Some(client_uuid)) => Ok((user_id, client_uuid)),
        _ => Err(HighlightError::Credential(
            "Invalid authorization token - missing required fields".to_string(),
        )),
    }
}

///
/// Derive the upstream request identifier for an account.
///
/// The desktop client derives an opaque identifier from the user id and the
/// registered client uuid; the backend only checks stability per client, so
/// a SHA-256 over both fields serves as that identifier here.
///
/// # Arguments
///  * `user_id` - upstream user id
///  * `client_uuid` - registered client uuid
///
/// # Returns
///  * Lowercase hex identifier string
pub fn derive_identifier(user_id: &str, client_uuid: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(client_uuid.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

///
/// Try to parse the token as base64-encoded JSON.
///
/// The login flow mints url-safe base64; hand-built keys are often standard
/// base64, so both alphabets are accepted.
fn parse_api_key(token: &str) -> Option<UserInfo> {
    let decoded = decode_base64_padded(token)?;
    serde_json::from_slice::<UserInfo>(&decoded).ok()
}

///
/// Try to parse the token as a JWT and read identity from its payload.
///
/// Only the payload section is inspected; the signature is not verified
/// (authenticity comes from the upstream rejecting an invalid `rt`).
fn parse_jwt_payload(token: &str) -> Option<UserInfo> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let payload = decode_base64_padded(parts[1])?;
    serde_json::from_slice::<UserInfo>(&payload).ok()
}

///
/// Decode base64 input whose padding may have been stripped.
///
/// Tries url-safe and standard alphabets, restoring `=` padding first.
fn decode_base64_padded(data: &str) -> Option<Vec<u8>> {
    let mut padded = data.trim().to_string();
    let missing = padded.len() % 4;
    if missing != 0 {
        padded.push_str(&"=".repeat(4 - missing));
    }

    URL_SAFE
        .decode(padded.as_bytes())
        .or_else(|_| STANDARD.decode(padded.as_bytes()))
        .ok()
}
