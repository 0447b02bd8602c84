//!
//! Per-account session gate: serialization, retry, and failure classification.
//!
//! Every chat invocation passes through here. The gate acquires the
//! account's concurrency slot before any upstream work (overlapping upstream
//! sessions are what the vendor's abuse detection looks for), obtains a
//! valid access token, opens the chat stream, and hands the body to the
//! stream translator.
//!
//! Failure policy: an unauthorized response is answered with exactly one
//! forced token refresh and one retry; a confirmed suspension short-circuits
//! everything; transient-class failures are retried up to the configured
//! bound; anything else surfaces immediately.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::ban::SignatureCatalog;
use crate::converter::highlight_to_openai::{ChatCompletionResponse, StreamItem, StreamTranslator};
use crate::error::{HighlightError, Result};
use crate::session::SessionStore;

/* --- types ----------------------------------------------------------------------------------- */

/// Boxed byte stream of a successfully opened chat response body.
pub type ChatByteStream = futures::stream::BoxStream<'static, Result<Bytes>>;

///
/// Seam for opening the vendor chat stream.
///
/// Implemented by the upstream client. The implementation validates the
/// response status: 401 becomes `UpstreamAuth`, other non-200 a hard
/// upstream failure; only a 200 body stream comes back through here.
#[async_trait]
pub trait ChatUpstream: Send + Sync {
    ///
    /// Open the streaming chat call and return its body stream.
    async fn open_chat_stream(
        &self,
        access_token: &str,
        identifier: &str,
        body: &Value,
        proxy: Option<&str>,
    ) -> Result<ChatByteStream>;
}

///
/// Everything one chat invocation needs, resolved by the HTTP layer.
#[derive(Debug, Clone)]
pub struct ChatInvocation {
    /** account refresh credential */
    pub rt: String,
    /** optional per-account proxy URL */
    pub proxy: Option<String>,
    /** per-account request identifier header value */
    pub identifier: String,
    /** caller-facing model name echoed in responses */
    pub model: String,
    /** vendor-shaped chat request body */
    pub body: Value,
}

///
/// Gatekeeper for all chat traffic.
pub struct SessionGate {
    /** token cache and suspension flags */
    sessions: Arc<SessionStore>,
    /** chat-stream opener */
    upstream: Arc<dyn ChatUpstream>,
    /** known suspension messages, shared with the translators */
    signatures: Arc<SignatureCatalog>,
    /** per-`rt` concurrency slots, created lazily */
    slots: Mutex<HashMap<String, Arc<Semaphore>>>,
    /** slots per account (1 = fully serialized) */
    capacity: usize,
    /** retry bound for transient-class failures */
    max_retries: u32,
    /** forward raw-line tracing into the translators */
    trace_lines: bool,
}

///
/// A live, already-primed completion chunk stream.
///
/// The first item was received before this struct was handed out, so any
/// failure that happens before output starts is reported as a plain error
/// response instead of a broken SSE stream. The account's concurrency
/// permit rides along and is released when the stream is dropped.
#[derive(Debug)]
pub struct PrimedStream {
    /** first item, taken on first poll */
    first: Option<Result<StreamItem>>,
    /** remaining translated items */
    rest: ReceiverStream<Result<StreamItem>>,
    /** held for the whole life of the stream */
    _permit: OwnedSemaphorePermit,
}

/* --- constants ------------------------------------------------------------------------------ */

/** Channel buffer size for streaming responses */
const STREAMING_CHANNEL_BUFFER: usize = 100;

/* --- start of code -------------------------------------------------------------------------- */

impl SessionGate {
    ///
    /// Create the gate.
    ///
    /// # Arguments
    ///  * `sessions` - shared session store
    ///  * `upstream` - chat-stream opener
    ///  * `signatures` - shared signature catalogue
    ///  * `capacity` - concurrency slots per account
    ///  * `max_retries` - transient retry bound
    ///  * `trace_lines` - log raw upstream lines at debug level
    pub fn new(
        sessions: Arc<SessionStore>,
        upstream: Arc<dyn ChatUpstream>,
        signatures: Arc<SignatureCatalog>,
        capacity: usize,
        max_retries: u32,
        trace_lines: bool,
    ) -> Self {
        Self {
            sessions,
            upstream,
            signatures,
            slots: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            max_retries,
            trace_lines,
        }
    }

    ///
    /// Run a streaming chat invocation.
    ///
    /// Acquires the account slot, opens the upstream stream (with the
    /// 401-refresh-retry and transient retry policies), and primes the
    /// translated stream by waiting for its first item. The returned stream
    /// carries the slot permit until it is dropped.
    ///
    /// # Arguments
    ///  * `invocation` - resolved chat invocation
    ///
    /// # Returns
    ///  * Primed chunk stream on success
    ///  * Classified error once retries are exhausted
    pub async fn stream_chat(&self, invocation: ChatInvocation) -> Result<PrimedStream> {
        let permit = self.acquire_slot(&invocation.rt).await?;

        let mut attempt: u32 = 0;
        loop {
            match self.try_stream(&invocation).await {
                Ok((first, rx)) => {
                    return Ok(PrimedStream {
                        first: Some(first),
                        rest: ReceiverStream::new(rx),
                        _permit: permit,
                    });
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "chat stream failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    ///
    /// Run a non-streaming chat invocation to a single aggregated response.
    ///
    /// Same slot and retry policy as the streaming path, but the whole
    /// stream is consumed and both ban detectors judge the completed buffer
    /// before anything is returned.
    ///
    /// # Arguments
    ///  * `invocation` - resolved chat invocation
    ///
    /// # Returns
    ///  * Aggregated OpenAI completion
    ///  * Classified error once retries are exhausted
    pub async fn complete_chat(&self, invocation: ChatInvocation) -> Result<ChatCompletionResponse> {
        let _permit = self.acquire_slot(&invocation.rt).await?;

        let mut attempt: u32 = 0;
        loop {
            let result = async {
                let body = self.open_authorized(&invocation).await?;
                self.translator(&invocation).aggregate(body).await
            }
            .await;

            match result {
                Ok(response) => return Ok(response),
                // a confirmed ban must never be replayed against the account
                Err(HighlightError::AccountSuspended) => {
                    return Err(HighlightError::AccountSuspended);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "chat completion failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    ///
    /// One streaming attempt: open upstream, spawn the translator, wait for
    /// its first item.
    async fn try_stream(
        &self,
        invocation: &ChatInvocation,
    ) -> Result<(Result<StreamItem>, mpsc::Receiver<Result<StreamItem>>)> {
        let body = self.open_authorized(invocation).await?;
        let translator = self.translator(invocation);

        let (tx, mut rx) = mpsc::channel(STREAMING_CHANNEL_BUFFER);
        tokio::spawn(async move {
            translator.run(body, tx).await;
        });

        match rx.recv().await {
            Some(Ok(item)) => Ok((Ok(item), rx)),
            Some(Err(e)) => Err(e),
            None => Err(HighlightError::Http("translator produced no output".to_string())),
        }
    }

    ///
    /// Open the chat stream with a valid token, refreshing once on 401.
    ///
    /// The second unauthorized response is terminal - it propagates as
    /// `UpstreamAuth`, which the outer retry loop does not touch.
    async fn open_authorized(&self, invocation: &ChatInvocation) -> Result<ChatByteStream> {
        let proxy = invocation.proxy.as_deref();
        let mut token = self.sessions.access_token(&invocation.rt, proxy).await?;
        let mut refreshed = false;

        loop {
            match self
                .upstream
                .open_chat_stream(&token, &invocation.identifier, &invocation.body, proxy)
                .await
            {
                Err(HighlightError::UpstreamAuth(msg)) if !refreshed => {
                    warn!(reason = %msg, "unauthorized chat call, forcing token refresh");
                    refreshed = true;
                    token = self.sessions.force_refresh(&invocation.rt, proxy).await?;
                }
                other => return other,
            }
        }
    }

    ///
    /// Acquire the account's concurrency slot, creating it on first use.
    async fn acquire_slot(&self, rt: &str) -> Result<OwnedSemaphorePermit> {
        let semaphore = {
            let mut slots = self.slots.lock().await;
            slots
                .entry(rt.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.capacity)))
                .clone()
        };

        semaphore
            .acquire_owned()
            .await
            .map_err(|_| HighlightError::Http("account slot closed".to_string()))
    }

    fn translator(&self, invocation: &ChatInvocation) -> StreamTranslator {
        StreamTranslator::new(
            self.sessions.clone(),
            self.signatures.clone(),
            invocation.rt.clone(),
            invocation.model.clone(),
            self.trace_lines,
        )
    }
}

impl Stream for PrimedStream {
    type Item = Result<StreamItem>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(first) = this.first.take() {
            return Poll::Ready(Some(first));
        }
        Pin::new(&mut this.rest).poll_next(cx)
    }
}
