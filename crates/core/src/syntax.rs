//! Syntax configuration for the chat-message parser.
//!
//! Dialect handlers describe the shape of the model output they expect here;
//! the parser core only consults these flags in the reasoning extractor.

use serde::{Deserialize, Serialize};

/// How reasoning ("thinking") blocks are delimited in the model output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningFormat {
    /// Reasoning extraction disabled; thinking tags pass through verbatim.
    #[default]
    None,
    /// DeepSeek-style `<think>`/`</think>` tags.
    DeepSeek,
    /// Caller-supplied start/end literals.
    Generic,
}

/// Per-parse configuration of the recognized dialect surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSyntax {
    pub reasoning_format: ReasoningFormat,
    /// Keep reasoning inline in `content`, re-wrapped in thinking tags,
    /// instead of routing it to `reasoning_content`.
    pub reasoning_in_content: bool,
    /// The chat template already emitted the opening thinking tag, so the
    /// input starts inside a reasoning window.
    pub thinking_forced_open: bool,
}
