//!
//! Format conversion modules for OpenAI and Highlight API compatibility.
//!
//! Handles both directions of the gateway: flattening OpenAI chat requests
//! into the Highlight prompt shape, and translating the Highlight event
//! stream back into OpenAI completion chunks. Each module focuses on one
//! conversion direction.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- modules --------------------------------------------------------------------------------- */

pub mod highlight_to_openai;
pub mod openai_to_highlight;

/* --- start of code -------------------------------------------------------------------------- */

pub use highlight_to_openai::{StreamItem, StreamTranslator};
pub use openai_to_highlight::{
    ChatCompletionRequest, build_chat_body, collect_image_urls, format_messages_to_prompt,
    format_tools,
};
