//!
//! HTTP client for the Highlight AI chat backend.
//!
//! Single place that talks to the vendor: token refresh, the streaming chat
//! call, the model listing, the two-step file upload, and the login/exchange
//! flow all go through here with the same impersonated User-Agent, timeouts,
//! and optional per-account proxy.
//!
//! The chat call returns the raw streaming response; the session gate
//! inspects the status (401 means an expired token and is worth exactly one
//! forced refresh) and hands the body to the stream translator.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::catalog::ModelSource;
use crate::config::Config;
use crate::error::{HighlightError, Result};
use crate::gate::{ChatByteStream, ChatUpstream};
use crate::session::{RefreshedToken, TokenRefresher};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Client for all Highlight backend endpoints.
///
/// Holds one default HTTP client plus a small cache of proxied clients
/// (accounts may pin their own egress proxy). Clients are cheap to clone;
/// building one per proxy URL happens at most once.
pub struct UpstreamClient {
    /** backend base URL */
    base_url: String,
    /** impersonated desktop-client User-Agent */
    user_agent: String,
    /** overall timeout for token refresh and other short calls */
    short_timeout: Duration,
    /** overall timeout for chat calls */
    chat_timeout: Duration,
    /** direct (proxyless) client */
    client: Client,
    /** clients keyed by proxy URL */
    proxied: Mutex<HashMap<String, Client>>,
    /** connect timeout used for every client built here */
    connect_timeout: Duration,
}

///
/// Generic vendor response envelope: `{"success": bool, "data": ...}`.
#[derive(Debug, Deserialize)]
struct VendorEnvelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
}

///
/// Payload of a successful token refresh.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
    access_token: String,
    expires_in: Option<u64>,
}

///
/// One model as listed by the vendor.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamModel {
    /** upstream model identifier used in chat requests */
    pub id: String,
    /** human-facing model name, the key callers use */
    pub name: String,
    /** provider label (openai, anthropic, ...) */
    pub provider: String,
    /** pricing block, only `isFree` is interesting */
    #[serde(default)]
    pub pricing: Option<ModelPricing>,
}

///
/// Pricing block of a model listing entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPricing {
    #[serde(default)]
    pub is_free: bool,
}

///
/// Payload of a successful file-prepare call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedUpload {
    /** vendor file id to reference in `attachedContext` */
    pub id: String,
    /** pre-signed target for the PUT upload */
    pub upload_url: String,
}

///
/// Tokens minted by the login code exchange.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

///
/// Account profile as returned by the vendor.
#[derive(Debug, Deserialize)]
pub struct UpstreamProfile {
    pub id: String,
    pub email: String,
}

/* --- constants ------------------------------------------------------------------------------ */

/** default token lifetime when the refresh response omits `expiresIn` */
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/** api-version header required by the model listing endpoint */
const MODELS_API_VERSION: &str = "2025-07-22";

/** marker of an anti-bot challenge page served instead of an API error */
const CLOUDFLARE_MARKER: &str = "Attention Required! | Cloudflare";

/* --- start of code -------------------------------------------------------------------------- */

impl UpstreamClient {
    ///
    /// Build the client from configuration.
    ///
    /// # Arguments
    ///  * `config` - application configuration
    ///
    /// # Returns
    ///  * Ready client
    ///  * `HighlightError::Config` if the HTTP client cannot be built
    pub fn new(config: &Config) -> Result<Self> {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| HighlightError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            short_timeout: Duration::from_secs(config.refresh_timeout_secs),
            chat_timeout: Duration::from_secs(config.chat_timeout_secs),
            client,
            proxied: Mutex::new(HashMap::new()),
            connect_timeout,
        })
    }

    ///
    /// Pick the HTTP client for an optional proxy URL, building and caching
    /// a proxied client on first use.
    fn client_for(&self, proxy: Option<&str>) -> Result<Client> {
        let Some(proxy_url) = proxy.filter(|p| !p.trim().is_empty()) else {
            return Ok(self.client.clone());
        };

        let mut proxied = self.proxied.lock().expect("proxy client cache poisoned");
        if let Some(client) = proxied.get(proxy_url) {
            return Ok(client.clone());
        }

        let built = Client::builder()
            .connect_timeout(self.connect_timeout)
            .proxy(
                reqwest::Proxy::all(proxy_url)
                    .map_err(|e| HighlightError::Config(format!("Invalid proxy URL: {}", e)))?,
            )
            .build()
            .map_err(|e| HighlightError::Config(format!("Failed to create proxied client: {}", e)))?;
        proxied.insert(proxy_url.to_string(), built.clone());
        Ok(built)
    }

    ///
    /// Exchange a refresh credential for a new access token.
    ///
    /// Any non-success HTTP status, or a response body without the success
    /// flag, is an `UpstreamAuth` failure - the caller decides whether the
    /// credential itself is dead.
    ///
    /// # Arguments
    ///  * `rt` - refresh credential
    ///  * `proxy` - optional per-account proxy URL
    ///
    /// # Returns
    ///  * New token and its server-declared lifetime
    pub async fn refresh(&self, rt: &str, proxy: Option<&str>) -> Result<RefreshedToken> {
        let url = format!("{}/api/v1/auth/refresh", self.base_url);
        let response = self
            .client_for(proxy)?
            .post(&url)
            .timeout(self.short_timeout)
            .header("User-Agent", &self.user_agent)
            .json(&serde_json::json!({ "refreshToken": rt }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HighlightError::UpstreamAuth(format!(
                "Failed to refresh access token, response: {} {}",
                status.as_u16(),
                body
            )));
        }

        let envelope: VendorEnvelope<RefreshPayload> = response.json().await?;
        let payload = match envelope {
            VendorEnvelope { success: true, data: Some(payload) } => payload,
            _ => {
                return Err(HighlightError::UpstreamAuth(
                    "Failed to refresh access token, response missing success flag".to_string(),
                ));
            }
        };

        Ok(RefreshedToken {
            access_token: payload.access_token,
            expires_in_secs: payload.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        })
    }

    ///
    /// Open the streaming chat call.
    ///
    /// Returns the raw response on 200. A 401 surfaces as `UpstreamAuth`
    /// (the caller force-refreshes and retries once); any other non-200 is a
    /// hard upstream failure with the body text normalized (an anti-bot
    /// challenge page is collapsed to a short reason).
    ///
    /// # Arguments
    ///  * `access_token` - current bearer token
    ///  * `identifier` - per-account request identifier header value
    ///  * `body` - vendor-shaped chat request
    ///  * `proxy` - optional per-account proxy URL
    ///
    /// # Returns
    ///  * Raw streaming response ready for line-by-line consumption
    pub async fn open_chat(
        &self,
        access_token: &str,
        identifier: &str,
        body: &Value,
        proxy: Option<&str>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/api/v1/chat", self.base_url);
        let response = self
            .client_for(proxy)?
            .post(&url)
            .timeout(self.chat_timeout)
            .bearer_auth(access_token)
            .header("User-Agent", &self.user_agent)
            .header("x-highlight-identifier", identifier)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(HighlightError::UpstreamAuth("chat call returned 401".to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HighlightError::UpstreamProtocol {
                status: status.as_u16(),
                message: normalize_upstream_error(&text),
            });
        }

        Ok(response)
    }

    ///
    /// Fetch the vendor model listing.
    ///
    /// # Arguments
    ///  * `access_token` - current bearer token
    ///  * `proxy` - optional per-account proxy URL
    ///
    /// # Returns
    ///  * All models the account can use
    pub async fn fetch_models(
        &self,
        access_token: &str,
        proxy: Option<&str>,
    ) -> Result<Vec<UpstreamModel>> {
        let url = format!("{}/api/v1/models", self.base_url);
        let response = self
            .client_for(proxy)?
            .get(&url)
            .timeout(self.short_timeout)
            .bearer_auth(access_token)
            .header("User-Agent", &self.user_agent)
            .header("api-version", MODELS_API_VERSION)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HighlightError::UpstreamProtocol {
                status: status.as_u16(),
                message: "Failed to fetch model list".to_string(),
            });
        }

        let envelope: VendorEnvelope<Vec<UpstreamModel>> = response.json().await?;
        match envelope {
            VendorEnvelope { success: true, data: Some(models) } => Ok(models),
            _ => Err(HighlightError::UpstreamProtocol {
                status: status.as_u16(),
                message: "Model list response missing success flag".to_string(),
            }),
        }
    }

    ///
    /// Download an image by URL (for caller-supplied `image_url` blocks).
    pub async fn download(&self, url: &str, proxy: Option<&str>) -> Result<bytes::Bytes> {
        let response = self
            .client_for(proxy)?
            .get(url)
            .timeout(self.short_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }

    ///
    /// Ask the vendor for an upload slot for a file.
    ///
    /// # Arguments
    ///  * `access_token` - current bearer token
    ///  * `file_name` - name to register
    ///  * `mime_type` - detected content type
    ///  * `size` - file size in bytes
    ///  * `proxy` - optional per-account proxy URL
    pub async fn prepare_upload(
        &self,
        access_token: &str,
        file_name: &str,
        mime_type: &str,
        size: usize,
        proxy: Option<&str>,
    ) -> Result<PreparedUpload> {
        let url = format!("{}/api/v1/files/prepare", self.base_url);
        let response = self
            .client_for(proxy)?
            .post(&url)
            .timeout(self.short_timeout)
            .bearer_auth(access_token)
            .header("User-Agent", &self.user_agent)
            .json(&serde_json::json!({ "name": file_name, "type": mime_type, "size": size }))
            .send()
            .await?
            .error_for_status()?;

        let envelope: VendorEnvelope<PreparedUpload> = response.json().await?;
        match envelope {
            VendorEnvelope { success: true, data: Some(prepared) } => Ok(prepared),
            _ => Err(HighlightError::UpstreamProtocol {
                status: 200,
                message: "File prepare response missing success flag".to_string(),
            }),
        }
    }

    ///
    /// PUT the file bytes to a prepared upload URL.
    pub async fn upload_bytes(
        &self,
        upload_url: &str,
        bytes: Vec<u8>,
        access_token: &str,
    ) -> Result<()> {
        let response = self
            .client
            .put(upload_url)
            .timeout(self.chat_timeout)
            .bearer_auth(access_token)
            .header("User-Agent", &self.user_agent)
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;

        let envelope: VendorEnvelope<Value> = response.json().await?;
        if !envelope.success {
            return Err(HighlightError::UpstreamProtocol {
                status: 200,
                message: "File upload response missing success flag".to_string(),
            });
        }
        Ok(())
    }

    ///
    /// Exchange a login deeplink code for an access/refresh token pair.
    ///
    /// # Arguments
    ///  * `code` - code extracted from the deeplink URL
    ///  * `amplitude_device_id` - fresh device id registered with the exchange
    ///  * `proxy` - optional proxy URL
    pub async fn exchange_code(
        &self,
        code: &str,
        amplitude_device_id: &str,
        proxy: Option<&str>,
    ) -> Result<ExchangedTokens> {
        let url = format!("{}/api/v1/auth/exchange", self.base_url);
        let response = self
            .client_for(proxy)?
            .post(&url)
            .timeout(self.short_timeout)
            .header("User-Agent", &self.user_agent)
            .json(&serde_json::json!({ "code": code, "amplitudeDeviceId": amplitude_device_id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HighlightError::UpstreamAuth(format!(
                "Login failed: {} {}",
                status.as_u16(),
                body
            )));
        }

        let envelope: VendorEnvelope<ExchangedTokens> = response.json().await?;
        match envelope {
            VendorEnvelope { success: true, data: Some(tokens) } => Ok(tokens),
            _ => Err(HighlightError::UpstreamAuth(
                "Login failed: exchange response missing success flag".to_string(),
            )),
        }
    }

    ///
    /// Register a client uuid for a freshly logged-in account.
    ///
    /// Best-effort in spirit but failures propagate - a key minted without a
    /// registered client cannot chat.
    pub async fn register_client(
        &self,
        access_token: &str,
        client_uuid: &str,
        proxy: Option<&str>,
    ) -> Result<()> {
        let url = format!("{}/api/v1/users/me/client", self.base_url);
        self.client_for(proxy)?
            .post(&url)
            .timeout(self.short_timeout)
            .bearer_auth(access_token)
            .header("User-Agent", &self.user_agent)
            .json(&serde_json::json!({ "client_uuid": client_uuid }))
            .send()
            .await?;
        Ok(())
    }

    ///
    /// Fetch the account profile of a freshly logged-in user.
    pub async fn fetch_profile(
        &self,
        access_token: &str,
        proxy: Option<&str>,
    ) -> Result<UpstreamProfile> {
        let url = format!("{}/api/v1/auth/profile", self.base_url);
        let response = self
            .client_for(proxy)?
            .get(&url)
            .timeout(self.short_timeout)
            .bearer_auth(access_token)
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HighlightError::UpstreamAuth(format!(
                "Failed to fetch profile: {}",
                status.as_u16()
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl TokenRefresher for UpstreamClient {
    async fn refresh_token(&self, rt: &str, proxy: Option<&str>) -> Result<RefreshedToken> {
        debug!("refreshing token for account");
        self.refresh(rt, proxy).await
    }
}

#[async_trait]
impl ModelSource for UpstreamClient {
    async fn list_models(
        &self,
        access_token: &str,
        proxy: Option<&str>,
    ) -> Result<Vec<UpstreamModel>> {
        self.fetch_models(access_token, proxy).await
    }
}

#[async_trait]
impl ChatUpstream for UpstreamClient {
    async fn open_chat_stream(
        &self,
        access_token: &str,
        identifier: &str,
        body: &Value,
        proxy: Option<&str>,
    ) -> Result<ChatByteStream> {
        let response = self.open_chat(access_token, identifier, body, proxy).await?;
        Ok(response.bytes_stream().map_err(HighlightError::from).boxed())
    }
}

///
/// Normalize an upstream error body to a short human-readable reason.
///
/// The vendor's edge sometimes answers with a full Cloudflare challenge page
/// instead of an API error; the page is collapsed to a recognizable marker.
pub fn normalize_upstream_error(text: &str) -> String {
    if text.contains(CLOUDFLARE_MARKER) {
        return "Cloudflare 403".to_string();
    }
    text.to_string()
}
