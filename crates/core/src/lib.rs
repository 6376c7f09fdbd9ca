//! Incremental parsing of raw model output into structured assistant
//! messages: plain content, optional reasoning content, and tool calls.
//!
//! The parser operates on both complete and still-streaming input; truncated
//! JSON is repaired through a healing marker so downstream consumers always
//! see well-formed argument payloads. Format-specific dialect handlers
//! compose the cursor primitives in [`parser`]; the XML tool-call surface
//! lives in [`xml_tool_call`].

pub mod message;
pub mod parser;
pub mod partial_json;
pub mod partial_regex;
pub mod syntax;
pub mod xml_tool_call;

pub use message::{ChatMessage, ChatTool, ToolCall};
pub use parser::{ChatMessageParser, ConsumeJsonResult, FindResult, ParseError};
pub use partial_json::{HealedJson, HealingMarker};
pub use partial_regex::{MatchType, PartialRegex, RegexMatch, StringRange};
pub use syntax::{ChatSyntax, ReasoningFormat};
pub use xml_tool_call::{XmlErrorKind, XmlToolCallError};
