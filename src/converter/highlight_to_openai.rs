//!
//! Highlight to OpenAI stream translation.
//!
//! Consumes the vendor's SSE event stream and produces OpenAI completion
//! chunks (streaming) or one aggregated completion object (non-streaming).
//! Every text fragment is fed to the content-signature detector against the
//! accumulated response, and every arrival is timed for the post-stream
//! throttling check. A confirmed suspension aborts the stream and
//! quarantines the account's session.
//!
//! The translator is a small state machine: before the first text fragment
//! no chunk has been emitted; fragments the signature detector cannot yet
//! judge are withheld and prefixed to the next emitted chunk; a vendor
//! `error` event or an exhausted stream ends it.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::ban::{MatchOutcome, SignatureCatalog, StreamTiming};
use crate::error::{HighlightError, Result};
use crate::session::SessionStore;

/* --- types ----------------------------------------------------------------------------------- */

///
/// One event from the Highlight chat stream.
///
/// Lines that do not parse into one of these shapes are skipped - the
/// vendor interleaves keep-alives and other noise with the data events.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum HighlightStreamEvent {
    /** incremental text content */
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        content: String,
    },
    /** a tool invocation requested by the model */
    #[serde(rename = "toolUse")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(rename = "toolId", default)]
        tool_id: String,
        #[serde(default)]
        input: Value,
    },
    /** terminal error reported inside an otherwise-200 stream */
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Value,
    },
}

///
/// OpenAI streaming chunk.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiStreamChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<OpenAiStreamChoice>,
}

///
/// Single choice within a streaming chunk.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiStreamChoice {
    pub index: u32,
    pub delta: OpenAiStreamDelta,
    pub finish_reason: Option<String>,
}

///
/// Delta payload of a streaming chunk.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OpenAiStreamDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

///
/// Tool-call delta within a streaming chunk.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiStreamToolCall {
    pub index: u32,
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: OpenAiFunctionCall,
}

///
/// Function name/arguments pair of a tool call.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

///
/// Aggregated (non-streaming) completion response.
#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ResponseChoice>,
    pub usage: Usage,
}

///
/// Single choice of an aggregated response.
#[derive(Debug, Serialize)]
pub struct ResponseChoice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: String,
}

///
/// Assistant message of an aggregated response.
#[derive(Debug, Serialize)]
pub struct ResponseMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

///
/// Token usage block. The vendor exposes no counts, so this is all zeros.
#[derive(Debug, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

///
/// One item of the translated stream, as delivered to the HTTP layer.
#[derive(Debug)]
pub enum StreamItem {
    /** a completion chunk to serialize onto the SSE response */
    Chunk(OpenAiStreamChunk),
    /** the terminal `[DONE]` sentinel */
    Done,
}

///
/// Per-stream translation state machine.
///
/// Owns the identity of one completion (response id, created timestamp,
/// caller-facing model name) plus handles to the session store and the
/// signature catalogue for quarantine decisions.
pub struct StreamTranslator {
    /** session store, for quarantining on a ban verdict */
    sessions: Arc<SessionStore>,
    /** known suspension messages */
    signatures: Arc<SignatureCatalog>,
    /** refresh credential of the account this stream belongs to */
    rt: String,
    /** caller-facing model name echoed in every chunk */
    model: String,
    /** completion id shared by all chunks of this stream */
    response_id: String,
    /** creation timestamp shared by all chunks */
    created: i64,
    /** whether raw stream lines are logged */
    trace_lines: bool,
}

/* --- start of code -------------------------------------------------------------------------- */

impl StreamTranslator {
    ///
    /// Create the translator for one chat invocation.
    ///
    /// # Arguments
    ///  * `sessions` - shared session store
    ///  * `signatures` - shared signature catalogue
    ///  * `rt` - account refresh credential
    ///  * `model` - caller-facing model name
    ///  * `trace_lines` - log every raw upstream line at debug level
    pub fn new(
        sessions: Arc<SessionStore>,
        signatures: Arc<SignatureCatalog>,
        rt: String,
        model: String,
        trace_lines: bool,
    ) -> Self {
        Self {
            sessions,
            signatures,
            rt,
            model,
            response_id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            trace_lines,
        }
    }

    ///
    /// Translate the vendor stream into completion chunks, live.
    ///
    /// Emits one role-announcement chunk before the first content chunk,
    /// then content and tool-call deltas as they arrive, then the
    /// `finish="stop"` chunk and the `[DONE]` sentinel. Fragments the
    /// signature detector marks `NeedMoreContent` are withheld and prefixed
    /// to the next emitted chunk.
    ///
    /// A confirmed suspension, an in-stream `error` event, a transport
    /// failure, or an entirely empty stream all surface as an `Err` item;
    /// nothing further follows an error. A failed send (the caller went
    /// away) aborts translation, which drops the upstream response and
    /// closes the connection.
    ///
    /// After a normal end the timing detector runs over the whole stream;
    /// a match quarantines the account for future requests but the chunks
    /// already delivered stand.
    ///
    /// # Arguments
    ///  * `body` - byte stream of the 200 chat response
    ///  * `tx` - channel towards the HTTP response
    pub async fn run<S, E>(self, body: S, tx: mpsc::Sender<Result<StreamItem>>)
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Into<HighlightError>,
    {
        let mut body = Box::pin(body);

        let mut line_buffer = String::new();
        let mut full_content = String::new();
        let mut withheld = String::new();
        let mut timing = StreamTiming::new();
        let mut sent_role_chunk = false;
        let mut has_tool_use = false;
        let mut tool_call_idx: u32 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    // Mid-stream transport failure: the partial output stands,
                    // the stream ends in a failure state, no retry.
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };

            let text = String::from_utf8_lossy(&chunk);
            let combined = format!("{}{}", line_buffer, text);
            let (lines, rest) = split_sse_lines(&combined);
            line_buffer = rest;

            for line in lines {
                if self.trace_lines {
                    debug!(response_id = %self.response_id, line, "upstream line");
                }

                let Some(data) = extract_sse_data(line) else { continue };
                if data.trim().is_empty() {
                    continue;
                }
                let Ok(event) = serde_json::from_str::<HighlightStreamEvent>(data) else {
                    continue;
                };

                match event {
                    HighlightStreamEvent::Text { content } if !content.is_empty() => {
                        full_content.push_str(&content);
                        timing.observe(&content);

                        match self.signatures.match_content(&full_content) {
                            MatchOutcome::MatchSuccess => {
                                self.sessions.mark_suspended(&self.rt).await;
                                let _ = tx.send(Err(HighlightError::AccountSuspended)).await;
                                return;
                            }
                            MatchOutcome::NeedMoreContent => {
                                withheld.push_str(&content);
                                continue;
                            }
                            MatchOutcome::NoMatch => {}
                        }

                        if !sent_role_chunk {
                            if tx.send(Ok(StreamItem::Chunk(self.role_chunk()))).await.is_err() {
                                return;
                            }
                            sent_role_chunk = true;
                        }

                        let emit = format!("{}{}", std::mem::take(&mut withheld), content);
                        if tx.send(Ok(StreamItem::Chunk(self.content_chunk(emit)))).await.is_err() {
                            return;
                        }
                    }
                    HighlightStreamEvent::Text { .. } => {}
                    HighlightStreamEvent::ToolUse { name, tool_id, input } => {
                        has_tool_use = true;
                        if name.is_empty() {
                            continue;
                        }
                        let chunk =
                            self.tool_chunk(tool_call_idx, tool_id, name, stringify_input(&input));
                        tool_call_idx += 1;
                        if tx.send(Ok(StreamItem::Chunk(chunk))).await.is_err() {
                            return;
                        }
                    }
                    HighlightStreamEvent::Error { error: message } => {
                        let _ = tx
                            .send(Err(HighlightError::UpstreamProtocol {
                                status: 200,
                                message: stringify_input(&message),
                            }))
                            .await;
                        return;
                    }
                }
            }
        }

        if full_content.is_empty() && !has_tool_use {
            let _ = tx.send(Err(HighlightError::EmptyUpstreamResponse)).await;
            return;
        }

        if tx.send(Ok(StreamItem::Chunk(self.finish_chunk()))).await.is_err() {
            return;
        }
        let _ = tx.send(Ok(StreamItem::Done)).await;

        // Delivered content is not revoked; the verdict only affects future
        // requests for this account.
        if timing.is_suspicious() {
            self.sessions.mark_suspended(&self.rt).await;
            if let Err(e) = self.signatures.append(timing.concatenated()).await {
                error!(error = %e, "failed to persist new ban signature");
            }
        }
    }

    ///
    /// Consume the whole vendor stream and build one aggregated response.
    ///
    /// Both detectors run on the completed buffer before anything is
    /// returned; either one firing discards the aggregate and fails with a
    /// suspension error instead.
    ///
    /// # Arguments
    ///  * `body` - byte stream of the 200 chat response
    ///
    /// # Returns
    ///  * Aggregated OpenAI completion
    ///  * `HighlightError::EmptyUpstreamResponse` for content-free streams
    ///  * `HighlightError::AccountSuspended` on either detector firing
    pub async fn aggregate<S, E>(self, body: S) -> Result<ChatCompletionResponse>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Into<HighlightError>,
    {
        let mut body = Box::pin(body);

        let mut line_buffer = String::new();
        let mut full_content = String::new();
        let mut timing = StreamTiming::new();
        let mut tool_calls: Vec<OpenAiStreamToolCall> = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(Into::into)?;
            let text = String::from_utf8_lossy(&chunk);
            let combined = format!("{}{}", line_buffer, text);
            let (lines, rest) = split_sse_lines(&combined);
            line_buffer = rest;

            for line in lines {
                if self.trace_lines {
                    debug!(response_id = %self.response_id, line, "upstream line");
                }

                let Some(data) = extract_sse_data(line) else { continue };
                if data.trim().is_empty() {
                    continue;
                }
                let Ok(event) = serde_json::from_str::<HighlightStreamEvent>(data) else {
                    continue;
                };

                match event {
                    HighlightStreamEvent::Text { content } => {
                        timing.observe(&content);
                        full_content.push_str(&content);
                    }
                    HighlightStreamEvent::ToolUse { name, tool_id, input } => {
                        if name.is_empty() {
                            continue;
                        }
                        let index = tool_calls.len() as u32;
                        tool_calls.push(OpenAiStreamToolCall {
                            index,
                            id: tool_id,
                            call_type: "function".to_string(),
                            function: OpenAiFunctionCall {
                                name,
                                arguments: stringify_input(&input),
                            },
                        });
                    }
                    HighlightStreamEvent::Error { error: message } => {
                        return Err(HighlightError::UpstreamProtocol {
                            status: 200,
                            message: stringify_input(&message),
                        });
                    }
                }
            }
        }

        if tool_calls.is_empty() && full_content.is_empty() {
            return Err(HighlightError::EmptyUpstreamResponse);
        }

        if timing.is_suspicious() {
            self.sessions.mark_suspended(&self.rt).await;
            if let Err(e) = self.signatures.append(timing.concatenated()).await {
                error!(error = %e, "failed to persist new ban signature");
            }
            return Err(HighlightError::AccountSuspended);
        }

        if self.signatures.match_content(&full_content) == MatchOutcome::MatchSuccess {
            self.sessions.mark_suspended(&self.rt).await;
            return Err(HighlightError::AccountSuspended);
        }

        Ok(ChatCompletionResponse {
            id: self.response_id,
            object: "chat.completion".to_string(),
            created: self.created,
            model: self.model,
            choices: vec![ResponseChoice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant".to_string(),
                    content: (!full_content.is_empty()).then_some(full_content),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                },
                finish_reason: "stop".to_string(),
            }],
            usage: Usage { prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 },
        })
    }

    ///
    /// The one role-announcement chunk preceding all content.
    fn role_chunk(&self) -> OpenAiStreamChunk {
        self.chunk(OpenAiStreamDelta { role: Some("assistant".to_string()), ..Default::default() }, None)
    }

    ///
    /// A content delta chunk.
    fn content_chunk(&self, content: String) -> OpenAiStreamChunk {
        self.chunk(OpenAiStreamDelta { content: Some(content), ..Default::default() }, None)
    }

    ///
    /// A tool-call delta chunk with its per-stream index.
    fn tool_chunk(&self, index: u32, id: String, name: String, arguments: String) -> OpenAiStreamChunk {
        self.chunk(
            OpenAiStreamDelta {
                tool_calls: Some(vec![OpenAiStreamToolCall {
                    index,
                    id,
                    call_type: "function".to_string(),
                    function: OpenAiFunctionCall { name, arguments },
                }]),
                ..Default::default()
            },
            None,
        )
    }

    ///
    /// The terminal chunk closing a successful stream.
    fn finish_chunk(&self) -> OpenAiStreamChunk {
        self.chunk(OpenAiStreamDelta::default(), Some("stop".to_string()))
    }

    fn chunk(&self, delta: OpenAiStreamDelta, finish_reason: Option<String>) -> OpenAiStreamChunk {
        OpenAiStreamChunk {
            id: self.response_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![OpenAiStreamChoice { index: 0, delta, finish_reason }],
        }
    }
}

///
/// Split content into complete SSE lines and the remaining partial line.
///
/// # Arguments
///  * `content` - buffered content to split
///
/// # Returns
///  * Tuple of (complete lines, remaining buffer)
fn split_sse_lines(content: &str) -> (Vec<&str>, String) {
    let mut lines_to_process = Vec::new();
    let mut new_buffer = String::new();

    let ends_with_newline = content.ends_with('\n');
    let all_lines: Vec<&str> = content.lines().collect();
    let line_count = all_lines.len();

    for (i, line) in all_lines.into_iter().enumerate() {
        let is_last = i == line_count - 1;
        if is_last && !ends_with_newline {
            new_buffer = line.to_string();
        } else {
            lines_to_process.push(line);
        }
    }

    (lines_to_process, new_buffer)
}

///
/// Extract the payload of an SSE data line.
fn extract_sse_data(line: &str) -> Option<&str> {
    line.trim_start().strip_prefix("data: ")
}

///
/// Render a tool input (or error payload) as the string OpenAI expects.
fn stringify_input(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::session::{RefreshedToken, TokenRefresher};

    struct NoopRefresher;

    #[async_trait]
    impl TokenRefresher for NoopRefresher {
        async fn refresh_token(
            &self,
            _rt: &str,
            _proxy: Option<&str>,
        ) -> Result<RefreshedToken> {
            Ok(RefreshedToken { access_token: "at_test".into(), expires_in_secs: 3600 })
        }
    }

    struct Fixture {
        sessions: Arc<SessionStore>,
        signatures: Arc<SignatureCatalog>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(entries: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ban_contents.json");
        let seeded: Vec<String> = entries.iter().map(|s| s.to_string()).collect();
        tokio::fs::write(&path, serde_json::to_string(&seeded).unwrap()).await.unwrap();
        Fixture {
            sessions: Arc::new(SessionStore::new(Arc::new(NoopRefresher))),
            signatures: Arc::new(SignatureCatalog::load(path, 0.5).await.unwrap()),
            _dir: dir,
        }
    }

    fn translator(fx: &Fixture) -> StreamTranslator {
        StreamTranslator::new(
            fx.sessions.clone(),
            fx.signatures.clone(),
            "rt_test".to_string(),
            "gpt-4o".to_string(),
            false,
        )
    }

    fn sse_body(events: &[&str]) -> Vec<std::result::Result<Bytes, HighlightError>> {
        events
            .iter()
            .map(|e| Ok(Bytes::from(format!("data: {}\n\n", e))))
            .collect()
    }

    async fn run_collect(
        translator: StreamTranslator,
        body: Vec<std::result::Result<Bytes, HighlightError>>,
    ) -> Vec<Result<StreamItem>> {
        let (tx, mut rx) = mpsc::channel(64);
        translator.run(futures::stream::iter(body), tx).await;
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn text_stream_produces_role_content_finish_done() {
        let fx = fixture(&[]).await;
        let items = run_collect(
            translator(&fx),
            sse_body(&[
                r#"{"type":"text","content":"Hello"}"#,
                r#"{"type":"text","content":" world"}"#,
            ]),
        )
        .await;

        assert_eq!(items.len(), 5);

        let chunks: Vec<&OpenAiStreamChunk> = items
            .iter()
            .filter_map(|i| match i {
                Ok(StreamItem::Chunk(c)) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("Hello"));
        assert_eq!(chunks[2].choices[0].delta.content.as_deref(), Some(" world"));
        assert_eq!(chunks[3].choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(matches!(items.last().unwrap(), Ok(StreamItem::Done)));

        // all chunks share the completion identity
        assert!(chunks.iter().all(|c| c.id == chunks[0].id));
        assert!(chunks[0].id.starts_with("chatcmpl-"));
    }

    #[tokio::test]
    async fn known_signature_aborts_and_quarantines() {
        let fx = fixture(&["ABCDEFGHIJ"]).await;
        let items = run_collect(
            translator(&fx),
            sse_body(&[r#"{"type":"text","content":"ABCDE"}"#]),
        )
        .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(HighlightError::AccountSuspended)));
        assert!(fx.sessions.is_suspended("rt_test").await);
    }

    #[tokio::test]
    async fn undecided_prefix_is_withheld_then_replayed() {
        let fx = fixture(&["ABCDEFGHIJ"]).await;
        let items = run_collect(
            translator(&fx),
            sse_body(&[
                r#"{"type":"text","content":"AB"}"#,
                r#"{"type":"text","content":"CX"}"#,
            ]),
        )
        .await;

        // "AB" is a too-short prefix (withheld); "ABCX" diverges, so both
        // fragments arrive in one chunk.
        let contents: Vec<String> = items
            .iter()
            .filter_map(|i| match i {
                Ok(StreamItem::Chunk(c)) => c.choices[0].delta.content.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(contents, vec!["ABCX"]);
        assert!(!fx.sessions.is_suspended("rt_test").await);
    }

    #[tokio::test]
    async fn tool_calls_get_increasing_indices_and_unnamed_are_dropped() {
        let fx = fixture(&[]).await;
        let items = run_collect(
            translator(&fx),
            sse_body(&[
                r#"{"type":"toolUse","name":"get_weather","toolId":"t1","input":"{\"city\":\"HK\"}"}"#,
                r#"{"type":"toolUse","toolId":"t2","input":""}"#,
                r#"{"type":"toolUse","name":"get_time","toolId":"t3","input":{"tz":"UTC"}}"#,
            ]),
        )
        .await;

        let tool_chunks: Vec<&OpenAiStreamToolCall> = items
            .iter()
            .filter_map(|i| match i {
                Ok(StreamItem::Chunk(c)) => c.choices[0].delta.tool_calls.as_ref(),
                _ => None,
            })
            .flatten()
            .collect();

        assert_eq!(tool_chunks.len(), 2);
        assert_eq!(tool_chunks[0].index, 0);
        assert_eq!(tool_chunks[0].function.name, "get_weather");
        assert_eq!(tool_chunks[1].index, 1);
        assert_eq!(tool_chunks[1].function.arguments, r#"{"tz":"UTC"}"#);

        // a tool-only stream still finishes cleanly
        assert!(items.iter().any(|i| matches!(i, Ok(StreamItem::Done))));
    }

    #[tokio::test]
    async fn error_event_is_terminal_upstream_failure() {
        let fx = fixture(&[]).await;
        let items = run_collect(
            translator(&fx),
            sse_body(&[
                r#"{"type":"text","content":"partial"}"#,
                r#"{"type":"error","error":"model crashed"}"#,
            ]),
        )
        .await;

        match items.last().unwrap() {
            Err(HighlightError::UpstreamProtocol { status, message }) => {
                assert_eq!(*status, 200);
                assert_eq!(message, "model crashed");
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
        // an error event is not a ban
        assert!(!fx.sessions.is_suspended("rt_test").await);
    }

    #[tokio::test]
    async fn empty_stream_is_a_failure_not_a_success() {
        let fx = fixture(&[]).await;
        let items = run_collect(translator(&fx), sse_body(&[])).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(HighlightError::EmptyUpstreamResponse)));
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped_silently() {
        let fx = fixture(&[]).await;
        let body = vec![
            Ok::<_, HighlightError>(Bytes::from("event: ping\n")),
            Ok(Bytes::from("data: {not json}\n")),
            Ok(Bytes::from("random noise\n")),
            Ok(Bytes::from("data: {\"type\":\"text\",\"content\":\"ok\"}\n")),
        ];
        let items = run_collect(translator(&fx), body).await;

        let contents: Vec<String> = items
            .iter()
            .filter_map(|i| match i {
                Ok(StreamItem::Chunk(c)) => c.choices[0].delta.content.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(contents, vec!["ok"]);
    }

    #[tokio::test]
    async fn split_lines_across_chunk_boundaries() {
        let fx = fixture(&[]).await;
        let body = vec![
            Ok::<_, HighlightError>(Bytes::from("data: {\"type\":\"te")),
            Ok(Bytes::from("xt\",\"content\":\"joined\"}\n")),
        ];
        let items = run_collect(translator(&fx), body).await;

        let contents: Vec<String> = items
            .iter()
            .filter_map(|i| match i {
                Ok(StreamItem::Chunk(c)) => c.choices[0].delta.content.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(contents, vec!["joined"]);
    }

    #[tokio::test]
    async fn aggregate_combines_text_and_tools() {
        let fx = fixture(&[]).await;
        let response = translator(&fx)
            .aggregate(futures::stream::iter(sse_body(&[
                r#"{"type":"text","content":"The answer"}"#,
                r#"{"type":"text","content":" is 42."}"#,
                r#"{"type":"toolUse","name":"save","toolId":"t1","input":"{}"}"#,
            ])))
            .await
            .unwrap();

        assert_eq!(response.object, "chat.completion");
        let choice = &response.choices[0];
        assert_eq!(choice.finish_reason, "stop");
        assert_eq!(choice.message.content.as_deref(), Some("The answer is 42."));
        assert_eq!(choice.message.tool_calls.as_ref().unwrap().len(), 1);
        assert_eq!(response.usage.total_tokens, 0);
    }

    #[tokio::test]
    async fn aggregate_rejects_empty_streams() {
        let fx = fixture(&[]).await;
        let err = translator(&fx)
            .aggregate(futures::stream::iter(sse_body(&[])))
            .await
            .unwrap_err();
        assert!(matches!(err, HighlightError::EmptyUpstreamResponse));
    }

    #[tokio::test]
    async fn aggregate_discards_response_on_signature_match() {
        let fx = fixture(&["ABCDEFGHIJ"]).await;
        let err = translator(&fx)
            .aggregate(futures::stream::iter(sse_body(&[
                r#"{"type":"text","content":"ABCDEFGHIJ"}"#,
            ])))
            .await
            .unwrap_err();

        assert!(matches!(err, HighlightError::AccountSuspended));
        assert!(fx.sessions.is_suspended("rt_test").await);
    }

    #[tokio::test]
    async fn aggregate_surfaces_error_events() {
        let fx = fixture(&[]).await;
        let err = translator(&fx)
            .aggregate(futures::stream::iter(sse_body(&[
                r#"{"type":"error","error":{"code":"overloaded"}}"#,
            ])))
            .await
            .unwrap_err();
        assert!(matches!(err, HighlightError::UpstreamProtocol { .. }));
    }

    #[test]
    fn delta_serialization_omits_absent_fields() {
        let delta = OpenAiStreamDelta { content: Some("hi".to_string()), ..Default::default() };
        let json = serde_json::to_string(&delta).unwrap();
        assert_eq!(json, r#"{"content":"hi"}"#);
    }

    #[test]
    fn sse_split_keeps_partial_tail() {
        let (lines, buffer) = split_sse_lines("data: a\ndata: b");
        assert_eq!(lines, vec!["data: a"]);
        assert_eq!(buffer, "data: b");

        let (lines, buffer) = split_sse_lines("data: a\n");
        assert_eq!(lines, vec!["data: a"]);
        assert_eq!(buffer, "");
    }
}
