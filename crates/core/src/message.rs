//! Assistant message accumulation.
//!
//! The parser builds a [`ChatMessage`] incrementally: content and reasoning
//! are append-only, tool calls are appended in extraction order. All
//! accumulators live here so dialect handlers and the XML extractor share one
//! write path.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A function invocation extracted from the model output.
///
/// `arguments` is transported as JSON text; on partial input it may be the
/// healed prefix of the final arguments object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub id: String,
    pub arguments: String,
}

/// Tool description supplied by the caller, used to whitelist function names
/// and to coerce XML parameter values.
///
/// `parameters` holds the JSON Schema-like object as text; a top-level
/// `properties` map (parameter name to `{"type": ...}`) drives coercion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub parameters: String,
}

/// The structured assistant message under construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    pub reasoning_content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Default for ChatMessage {
    fn default() -> Self {
        Self {
            role: "assistant".to_string(),
            content: String::new(),
            reasoning_content: String::new(),
            tool_calls: Vec::new(),
        }
    }
}

impl ChatMessage {
    pub fn add_content(&mut self, content: &str) {
        self.content.push_str(content);
    }

    pub fn add_reasoning_content(&mut self, reasoning_content: &str) {
        self.reasoning_content.push_str(reasoning_content);
    }

    /// Append a tool call. Calls with an empty name are rejected.
    pub fn add_tool_call(&mut self, name: &str, id: &str, arguments: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        tracing::debug!(name, arguments, "adding tool call");
        self.tool_calls.push(ToolCall {
            name: name.to_string(),
            id: id.to_string(),
            arguments: arguments.to_string(),
        });
        true
    }

    /// Append a tool call described by a `{name, id, arguments}` JSON object.
    ///
    /// Non-string `arguments` are serialized to text; this is what JSON
    /// dialects produce when the model emits arguments as an inline object.
    pub fn add_tool_call_json(&mut self, tool_call: &Value) -> bool {
        let name = tool_call.get("name").and_then(Value::as_str).unwrap_or("");
        let id = tool_call.get("id").and_then(Value::as_str).unwrap_or("");
        let arguments = match tool_call.get("arguments") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        self.add_tool_call(name, id, &arguments)
    }

    /// Append a batch of tool calls; stops and reports failure at the first
    /// rejected entry (earlier entries stay appended).
    pub fn add_tool_calls(&mut self, arr: &[Value]) -> bool {
        for item in arr {
            if !self.add_tool_call_json(item) {
                return false;
            }
        }
        true
    }

    pub fn clear_tools(&mut self) {
        self.tool_calls.clear();
    }
}
