//!
//! HTTP server implementation for the Highlight AI to OpenAI gateway.
//!
//! Handles incoming OpenAI-compatible requests, resolves the caller's
//! account identity, and routes chat traffic through the session gate.
//! Implements both streaming and non-streaming responses with the OpenAI
//! error envelope on every failure path.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use futures::StreamExt;
use serde::Serialize;
use serde_json::{Value, json};

use crate::auth::{derive_identifier, require_chat_identity, user_info_from_token};
use crate::ban::SignatureCatalog;
use crate::catalog::ModelCatalog;
use crate::config::Config;
use crate::converter::{
    ChatCompletionRequest, build_chat_body, collect_image_urls, format_messages_to_prompt,
    format_tools,
};
use crate::error::{HighlightError, Result};
use crate::files::ImageUploader;
use crate::gate::{ChatInvocation, PrimedStream, SessionGate};
use crate::login::{LoginRequest, LoginResponse, process_login};
use crate::session::SessionStore;
use crate::upstream::UpstreamClient;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Application state containing all dependencies.
///
/// The stores are explicit injectable objects owned here and passed by
/// handle through the call chain - there are no module-level globals.
pub struct AppState {
    /** application configuration */
    pub config: Config,
    /** per-account token cache and suspension flags */
    pub sessions: Arc<SessionStore>,
    /** vendor HTTP client */
    pub upstream: Arc<UpstreamClient>,
    /** per-account serialization, retry, and failure classification */
    pub gate: SessionGate,
    /** caller model name → upstream model resolution */
    pub catalog: ModelCatalog,
    /** content-addressed image uploads */
    pub uploader: ImageUploader,
    /** metrics for monitoring */
    pub metrics: AppMetrics,
}

///
/// Application metrics for monitoring and observability.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /** total number of requests processed */
    pub total_requests: AtomicU64,
    /** total number of successful requests */
    pub successful_requests: AtomicU64,
    /** total number of failed requests */
    pub failed_requests: AtomicU64,
    /** number of requests that ended in an account suspension verdict */
    pub suspension_hits: AtomicU64,
}

///
/// Model listing response in OpenAI format.
#[derive(Debug, Serialize)]
struct ModelsResponse {
    object: String,
    data: Vec<ModelListing>,
}

///
/// One model of the listing response.
#[derive(Debug, Serialize)]
struct ModelListing {
    id: String,
    object: String,
    created: i64,
    owned_by: String,
}

/* --- start of code -------------------------------------------------------------------------- */

impl AppState {
    ///
    /// Create new application state with all dependencies.
    ///
    /// Loads the ban-signature catalogue from disk and wires the session
    /// store, gate, model catalogue and uploader around one shared upstream
    /// client.
    ///
    /// # Arguments
    ///  * `config` - application configuration
    ///
    /// # Returns
    ///  * Application state with initialized dependencies
    ///  * `HighlightError` if initialization fails
    pub async fn new(config: Config) -> Result<Self> {
        let upstream = Arc::new(UpstreamClient::new(&config)?);
        let sessions = Arc::new(SessionStore::new(upstream.clone()));
        let signatures = Arc::new(
            SignatureCatalog::load(config.ban_contents_path.clone(), config.match_success_len)
                .await?,
        );
        let gate = SessionGate::new(
            sessions.clone(),
            upstream.clone(),
            signatures,
            config.chat_semaphore,
            config.max_retries,
            config.log_level.is_trace_enabled(),
        );
        let catalog = ModelCatalog::new(upstream.clone());
        let uploader = ImageUploader::new(upstream.clone());

        Ok(Self {
            config,
            sessions,
            upstream,
            gate,
            catalog,
            uploader,
            metrics: AppMetrics::default(),
        })
    }
}

///
/// Handle OpenAI-compatible chat completions endpoint.
///
/// Resolves the caller identity from the Bearer API key, prepares the
/// Highlight chat invocation, and runs it through the session gate.
/// Supports both streaming and non-streaming responses.
///
/// # Arguments
///  * `state` - shared application state
///  * `headers` - request headers carrying the Bearer API key
///  * `request` - OpenAI format request JSON
///
/// # Returns
///  * HTTP response with OpenAI format completion or error envelope
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);

    match process_chat_completion(state.clone(), request, &headers).await {
        Ok(response) => {
            state.metrics.successful_requests.fetch_add(1, Ordering::Relaxed);
            response
        }
        Err(e) => {
            state.metrics.failed_requests.fetch_add(1, Ordering::Relaxed);
            if matches!(e, HighlightError::AccountSuspended) {
                state.metrics.suspension_hits.fetch_add(1, Ordering::Relaxed);
            }
            create_error_response(&e)
        }
    }
}

///
/// Process chat completion request end-to-end.
async fn process_chat_completion(
    state: Arc<AppState>,
    request: Value,
    headers: &HeaderMap,
) -> Result<Response> {
    let info = user_info_from_token(bearer_token(headers)?)?;
    let (user_id, client_uuid) = require_chat_identity(&info)?;
    let identifier = derive_identifier(user_id, client_uuid);
    let proxy = info.proxy.clone().or_else(|| state.config.proxy.clone());

    let request: ChatCompletionRequest = serde_json::from_value(request)
        .map_err(|e| HighlightError::CallerInput(format!("Invalid request format: {}", e)))?;

    // auxiliary vendor calls (catalogue, uploads) fail fast on suspension
    // because this token fetch does
    let access_token = state.sessions.access_token(&info.rt, proxy.as_deref()).await?;
    let model = state.catalog.resolve(&access_token, proxy.as_deref(), &request.model).await?;

    let prompt = format_messages_to_prompt(&request.messages);
    let tools = format_tools(&request.tools);
    let image_urls = collect_image_urls(&request.messages);
    let attachments =
        state.uploader.prepare_attachments(&image_urls, &access_token, proxy.as_deref()).await;

    let body = build_chat_body(
        &prompt,
        &attachments,
        &model.id,
        tools,
        &state.config.request_timezone,
    );

    let invocation = ChatInvocation {
        rt: info.rt.clone(),
        proxy,
        identifier,
        model: request.model.clone(),
        body,
    };

    if request.stream {
        let primed = state.gate.stream_chat(invocation).await?;
        Ok(sse_response(primed))
    } else {
        let response = state.gate.complete_chat(invocation).await?;
        Ok(Json(response).into_response())
    }
}

///
/// Turn a primed chunk stream into the SSE response.
///
/// Mid-stream failures are delivered as one error-envelope data event; the
/// stream ends right after. Chunks that fail to serialize are logged and
/// skipped.
fn sse_response(primed: PrimedStream) -> Response {
    use crate::converter::StreamItem;

    let stream = primed.filter_map(|item| async move {
        match item {
            Ok(StreamItem::Chunk(chunk)) => match serde_json::to_string(&chunk) {
                Ok(json) => Some(Ok::<_, Infallible>(Event::default().data(json))),
                Err(e) => {
                    tracing::error!("Failed to serialize chunk: {}", e);
                    None
                }
            },
            Ok(StreamItem::Done) => Some(Ok(Event::default().data("[DONE]"))),
            Err(e) => Some(Ok(Event::default().data(error_envelope(&e).to_string()))),
        }
    });

    Sse::new(stream).into_response()
}

///
/// Handle models listing endpoint for OpenAI compatibility.
///
/// The listing requires a valid API key - the vendor scopes available
/// models per account.
///
/// # Arguments
///  * `state` - shared application state
///  * `headers` - request headers carrying the Bearer API key
///
/// # Returns
///  * JSON response with the model list or error envelope
pub async fn models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match list_models(state, &headers).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => create_error_response(&e),
    }
}

async fn list_models(state: Arc<AppState>, headers: &HeaderMap) -> Result<ModelsResponse> {
    let info = user_info_from_token(bearer_token(headers)?)?;
    let proxy = info.proxy.clone().or_else(|| state.config.proxy.clone());
    let access_token = state.sessions.access_token(&info.rt, proxy.as_deref()).await?;

    let created = chrono::Utc::now().timestamp();
    let data = state
        .catalog
        .all(&access_token, proxy.as_deref())
        .await?
        .into_iter()
        .map(|m| ModelListing {
            id: m.name,
            object: "model".to_string(),
            created,
            owned_by: m.provider,
        })
        .collect();

    Ok(ModelsResponse { object: "list".to_string(), data })
}

///
/// Handle the login endpoint that mints gateway API keys.
///
/// # Arguments
///  * `state` - shared application state
///  * `request` - login request with the browser deeplink
///
/// # Returns
///  * In-band success or failure report
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Json<LoginResponse> {
    let proxy = request.proxy.clone().or_else(|| state.config.proxy.clone());

    match process_login(&state.upstream, &request.login_link, proxy.as_deref()).await {
        Ok(minted) => Json(LoginResponse {
            success: true,
            message: "Login successful".to_string(),
            api_key: Some(minted.api_key),
            user_info: Some(minted.user_info),
        }),
        Err(e) => Json(LoginResponse {
            success: false,
            message: format!("Login failed: {}", e),
            api_key: None,
            user_info: None,
        }),
    }
}

///
/// Handle health check endpoint.
///
/// Returns a simple health status for service monitoring with basic metrics.
///
/// # Arguments
///  * `state` - shared application state with metrics
///
/// # Returns
///  * JSON response with health status and metrics
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let total_requests = state.metrics.total_requests.load(Ordering::Relaxed);
    let successful_requests = state.metrics.successful_requests.load(Ordering::Relaxed);
    let failed_requests = state.metrics.failed_requests.load(Ordering::Relaxed);
    let suspension_hits = state.metrics.suspension_hits.load(Ordering::Relaxed);

    Json(json!({
      "status": "healthy",
      "timestamp": chrono::Utc::now().timestamp(),
      "metrics": {
        "total_requests": total_requests,
        "successful_requests": successful_requests,
        "failed_requests": failed_requests,
        "suspension_hits": suspension_hits,
        "success_rate": if total_requests > 0 {
          (successful_requests as f64 / total_requests as f64 * 100.0).round()
        } else {
          100.0
        }
      }
    }))
}

///
/// Extract the Bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HighlightError::Credential("Missing Bearer authorization".to_string()))
}

///
/// The OpenAI-style error envelope for a failure.
fn error_envelope(error: &HighlightError) -> Value {
    json!({
      "error": {
        "message": error.to_string(),
        "type": error.error_type(),
        "code": error.error_type()
      }
    })
}

///
/// Create an error response with the envelope and mapped status code.
///
/// # Arguments
///  * `error` - error to convert to HTTP response
///
/// # Returns
///  * HTTP error response with JSON error details
fn create_error_response(error: &HighlightError) -> Response {
    let status = axum::http::StatusCode::from_u16(error.http_status())
        .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error_envelope(error))).into_response()
}
