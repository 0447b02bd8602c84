//!
//! OpenAI to Highlight format conversion for API request translation.
//!
//! The Highlight chat endpoint does not take a message array; it takes one
//! flattened prompt string plus a list of tool definitions and pre-uploaded
//! attachments. This module owns the OpenAI request wire types and the
//! flattening rules.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use serde::Deserialize;
use serde_json::{Value, json};

/* --- types ----------------------------------------------------------------------------------- */

///
/// OpenAI chat completion request structure.
///
/// Represents an incoming request in OpenAI's chat completions API format.
/// Sampling parameters the upstream cannot honor are accepted and ignored.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    /** caller-facing model name, resolved through the model catalogue */
    #[serde(default = "default_model")]
    pub model: String,
    /** conversation messages array */
    pub messages: Vec<OpenAiMessage>,
    /** whether to stream the response */
    #[serde(default)]
    pub stream: bool,
    /** available tools for function calling, passed through to the vendor */
    pub tools: Option<Vec<OpenAiTool>>,
}

///
/// OpenAI message structure within a chat completion request.
#[derive(Debug, Deserialize)]
pub struct OpenAiMessage {
    /** message role: system, user, assistant, or tool */
    pub role: String,
    /** message content, can be string or structured blocks */
    pub content: Option<OpenAiContent>,
    /** tool calls made by the assistant */
    pub tool_calls: Option<Vec<Value>>,
    /** tool call ID for tool response messages */
    pub tool_call_id: Option<String>,
}

///
/// OpenAI content union type for flexible message content.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    /** simple string content */
    String(String),
    /** structured content blocks array */
    Array(Vec<OpenAiContentBlock>),
}

///
/// OpenAI structured content block for multimodal messages.
#[derive(Debug, Deserialize)]
pub struct OpenAiContentBlock {
    /** content block type: text or image_url */
    #[serde(rename = "type")]
    pub block_type: String,
    /** text content for text blocks */
    pub text: Option<String>,
    /** image URL reference for image blocks */
    pub image_url: Option<ImageUrl>,
}

///
/// Image URL reference structure for image content blocks.
#[derive(Debug, Deserialize)]
pub struct ImageUrl {
    /** the image URL or data URI */
    pub url: String,
}

///
/// OpenAI tool definition for available functions.
#[derive(Debug, Deserialize)]
pub struct OpenAiTool {
    /** tool type, typically "function" */
    #[serde(rename = "type")]
    pub tool_type: String,
    /** function definition and schema */
    pub function: OpenAiToolFunction,
}

///
/// OpenAI function definition within a tool.
#[derive(Debug, Deserialize)]
pub struct OpenAiToolFunction {
    /** function name */
    pub name: String,
    /** function description */
    pub description: Option<String>,
    /** JSON schema for function parameters */
    pub parameters: Option<Value>,
}

///
/// An already-uploaded attachment referenced in the chat request.
#[derive(Debug, Clone)]
pub struct AttachedImage {
    /** vendor file id */
    pub file_id: String,
    /** registered file name */
    pub file_name: String,
}

/* --- start of code -------------------------------------------------------------------------- */

fn default_model() -> String {
    "gpt-4o".to_string()
}

///
/// Flatten an OpenAI message array into a single Highlight prompt string.
///
/// Each message contributes `role: content` lines; assistant tool calls are
/// inlined as JSON, and tool-result messages repeat their call id so the
/// model can associate results with calls. Messages are separated by blank
/// lines.
///
/// # Arguments
///  * `messages` - OpenAI conversation messages
///
/// # Returns
///  * Prompt string for the Highlight chat request
pub fn format_messages_to_prompt(messages: &[OpenAiMessage]) -> String {
    let mut formatted = Vec::new();

    for message in messages {
        if message.role.is_empty() {
            continue;
        }

        if let Some(content) = &message.content {
            match content {
                OpenAiContent::String(text) => {
                    formatted.push(format!("{}: {}", message.role, text));
                }
                OpenAiContent::Array(blocks) => {
                    for block in blocks {
                        if let Some(text) = &block.text {
                            formatted.push(format!("{}: {}", message.role, text));
                        }
                    }
                }
            }
        }

        if let Some(tool_calls) = &message.tool_calls {
            let rendered = serde_json::to_string(tool_calls).unwrap_or_default();
            formatted.push(format!("{}: {}", message.role, rendered));
        }

        if let Some(tool_call_id) = &message.tool_call_id {
            formatted.push(format!(
                "{}: tool_call_id: {} {}",
                message.role,
                tool_call_id,
                plain_content(&message.content)
            ));
        }
    }

    formatted.join("\n\n")
}

///
/// Convert OpenAI tool definitions to the Highlight `additionalTools` shape.
///
/// Only `function` tools are forwarded; description and parameters default
/// to empty when the caller omits them.
///
/// # Arguments
///  * `tools` - OpenAI tool definitions from the request
///
/// # Returns
///  * Vendor tool objects `{name, description, parameters}`
pub fn format_tools(tools: &Option<Vec<OpenAiTool>>) -> Vec<Value> {
    let Some(tools) = tools else {
        return Vec::new();
    };

    tools
        .iter()
        .filter(|t| t.tool_type == "function")
        .map(|t| {
            json!({
                "name": t.function.name,
                "description": t.function.description.clone().unwrap_or_default(),
                "parameters": t.function.parameters.clone().unwrap_or_else(|| json!({})),
            })
        })
        .collect()
}

///
/// Collect every image reference (URL or data URI) from the messages.
///
/// # Arguments
///  * `messages` - OpenAI conversation messages
///
/// # Returns
///  * Image references in message order
pub fn collect_image_urls(messages: &[OpenAiMessage]) -> Vec<String> {
    let mut urls = Vec::new();
    for message in messages {
        if let Some(OpenAiContent::Array(blocks)) = &message.content {
            for block in blocks {
                if block.block_type == "image_url" {
                    if let Some(image) = &block.image_url {
                        if !image.url.is_empty() {
                            urls.push(image.url.clone());
                        }
                    }
                }
            }
        }
    }
    urls
}

///
/// Build the Highlight chat request body.
///
/// The desktop client always sends the plugin/memory/knowledge switches;
/// `ephemeral` keeps the conversation out of the account's history.
///
/// # Arguments
///  * `prompt` - flattened prompt string
///  * `attachments` - already-uploaded images for `attachedContext`
///  * `model_id` - upstream model identifier from the catalogue
///  * `tools` - vendor tool objects
///  * `timezone` - timezone string the client reports
///
/// # Returns
///  * JSON request body for the chat endpoint
pub fn build_chat_body(
    prompt: &str,
    attachments: &[AttachedImage],
    model_id: &str,
    tools: Vec<Value>,
    timezone: &str,
) -> Value {
    let attached_context: Vec<Value> = attachments
        .iter()
        .map(|a| json!({ "type": "image", "fileId": a.file_id, "fileName": a.file_name }))
        .collect();

    json!({
        "prompt": prompt,
        "attachedContext": attached_context,
        "modelId": model_id,
        "additionalTools": tools,
        "backendPlugins": [],
        "useMemory": false,
        "useKnowledge": false,
        "ephemeral": true,
        "timezone": timezone,
    })
}

///
/// Render message content as a plain string for the tool-result line.
fn plain_content(content: &Option<OpenAiContent>) -> String {
    match content {
        Some(OpenAiContent::String(text)) => text.clone(),
        Some(OpenAiContent::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.text.clone())
            .collect::<Vec<_>>()
            .join(" "),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: &str, text: &str) -> OpenAiMessage {
        OpenAiMessage {
            role: role.to_string(),
            content: Some(OpenAiContent::String(text.to_string())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[test]
    fn flattens_roles_and_content() {
        let messages =
            vec![message("system", "You are helpful."), message("user", "Hello there")];
        let prompt = format_messages_to_prompt(&messages);
        assert_eq!(prompt, "system: You are helpful.\n\nuser: Hello there");
    }

    #[test]
    fn structured_blocks_contribute_text_only() {
        let messages = vec![OpenAiMessage {
            role: "user".to_string(),
            content: Some(OpenAiContent::Array(vec![
                OpenAiContentBlock {
                    block_type: "text".to_string(),
                    text: Some("look at this".to_string()),
                    image_url: None,
                },
                OpenAiContentBlock {
                    block_type: "image_url".to_string(),
                    text: None,
                    image_url: Some(ImageUrl { url: "https://example.com/a.png".to_string() }),
                },
            ])),
            tool_calls: None,
            tool_call_id: None,
        }];
        let prompt = format_messages_to_prompt(&messages);
        assert_eq!(prompt, "user: look at this");
    }

    #[test]
    fn tool_calls_are_inlined_as_json() {
        let messages = vec![OpenAiMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(vec![json!({"id": "call_1", "type": "function"})]),
            tool_call_id: None,
        }];
        let prompt = format_messages_to_prompt(&messages);
        assert!(prompt.starts_with("assistant: ["));
        assert!(prompt.contains("call_1"));
    }

    #[test]
    fn tool_results_carry_their_call_id() {
        let messages = vec![OpenAiMessage {
            role: "tool".to_string(),
            content: Some(OpenAiContent::String("42".to_string())),
            tool_calls: None,
            tool_call_id: Some("call_1".to_string()),
        }];
        let prompt = format_messages_to_prompt(&messages);
        assert!(prompt.contains("tool: tool_call_id: call_1 42"));
    }

    #[test]
    fn only_function_tools_are_forwarded() {
        let tools = Some(vec![
            OpenAiTool {
                tool_type: "function".to_string(),
                function: OpenAiToolFunction {
                    name: "get_weather".to_string(),
                    description: None,
                    parameters: None,
                },
            },
            OpenAiTool {
                tool_type: "retrieval".to_string(),
                function: OpenAiToolFunction {
                    name: "ignored".to_string(),
                    description: None,
                    parameters: None,
                },
            },
        ]);

        let formatted = format_tools(&tools);
        assert_eq!(formatted.len(), 1);
        assert_eq!(formatted[0]["name"], "get_weather");
        assert_eq!(formatted[0]["description"], "");
        assert_eq!(formatted[0]["parameters"], json!({}));
    }

    #[test]
    fn collects_image_urls_in_order() {
        let messages = vec![OpenAiMessage {
            role: "user".to_string(),
            content: Some(OpenAiContent::Array(vec![
                OpenAiContentBlock {
                    block_type: "image_url".to_string(),
                    text: None,
                    image_url: Some(ImageUrl { url: "https://a".to_string() }),
                },
                OpenAiContentBlock {
                    block_type: "image_url".to_string(),
                    text: None,
                    image_url: Some(ImageUrl { url: "data:image/png;base64,AAAA".to_string() }),
                },
            ])),
            tool_calls: None,
            tool_call_id: None,
        }];

        let urls = collect_image_urls(&messages);
        assert_eq!(urls, vec!["https://a", "data:image/png;base64,AAAA"]);
    }

    #[test]
    fn chat_body_has_the_client_switches() {
        let body = build_chat_body(
            "user: hi",
            &[AttachedImage { file_id: "f1".to_string(), file_name: "image.png".to_string() }],
            "model-123",
            vec![],
            "Asia/Hong_Kong",
        );

        assert_eq!(body["prompt"], "user: hi");
        assert_eq!(body["modelId"], "model-123");
        assert_eq!(body["ephemeral"], true);
        assert_eq!(body["useMemory"], false);
        assert_eq!(body["useKnowledge"], false);
        assert_eq!(body["backendPlugins"], json!([]));
        assert_eq!(body["attachedContext"][0]["fileId"], "f1");
        assert_eq!(body["timezone"], "Asia/Hong_Kong");
    }

    #[test]
    fn request_defaults_model_and_stream() {
        let request: ChatCompletionRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap();
        assert_eq!(request.model, "gpt-4o");
        assert!(!request.stream);
        assert!(request.tools.is_none());
    }
}
