//! Bounded XML-subset extractor for tool-call blocks.
//!
//! Parses `<tool_call><function=NAME><parameter=KEY>VALUE</parameter>...`
//! blocks the way Qwen3-Coder style models emit them, coercing each VALUE
//! against the tool's parameter schema. The scan is iterative, works on
//! borrowed slices of the input, and enforces hard size caps so hostile
//! output cannot blow up memory or time.

use std::collections::HashSet;

use serde_json::Value;
use thiserror::Error;

use crate::message::ChatTool;
use crate::parser::ChatMessageParser;

pub const MAX_INPUT_SIZE: usize = 1024 * 1024;
pub const MAX_PARAMETER_COUNT: usize = 100;
pub const MAX_TOOL_COUNT: usize = 100;
pub const MAX_TAG_NAME_LENGTH: usize = 256;
pub const MAX_ATTRIBUTE_LENGTH: usize = 1024;

/// Classification of XML tool-call parse failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlErrorKind {
    InputTooLarge,
    TagNameTooLong,
    AttributeTooLong,
    TooManyParameters,
    TooManyTools,
    InvalidXmlStructure,
    InvalidFunctionName,
    FunctionNotFound,
    ParameterConversionFailed,
    JsonSerializationFailed,
}

/// A parse failure with enough context to diagnose the offending input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct XmlToolCallError {
    pub kind: XmlErrorKind,
    /// Byte position within the scanned slice.
    pub position: usize,
    /// Excerpt of the input around the failure.
    pub context: String,
    pub message: String,
}

impl XmlToolCallError {
    fn new(kind: XmlErrorKind, position: usize, context: &str, message: String) -> Self {
        Self {
            kind,
            position,
            context: context.chars().take(100).collect(),
            message,
        }
    }
}

/// One matched tag: `<name=attribute>content</name>`, with byte offsets into
/// the scanned slice.
#[derive(Debug, Clone, Copy)]
struct XmlTag<'a> {
    #[allow(dead_code)]
    name: &'a str,
    attribute: &'a str,
    content: &'a str,
    start: usize,
    end: usize,
}

/// Find the next `<name ...>content</name>` at or after `from`.
///
/// `Ok(None)` means the tag is absent (possibly just not yet complete); an
/// error means a hard limit was violated. A candidate whose name continues
/// with an identifier character (searching `tool` inside `<tool_call>`) is a
/// prefix collision and the scan resumes one byte later.
fn find_tag<'a>(
    text: &'a str,
    name: &'a str,
    from: usize,
) -> Result<Option<XmlTag<'a>>, XmlToolCallError> {
    if text.len() > MAX_INPUT_SIZE {
        return Err(XmlToolCallError::new(
            XmlErrorKind::InputTooLarge,
            0,
            text,
            format!("XML input exceeds maximum size limit of {MAX_INPUT_SIZE} bytes"),
        ));
    }
    if name.len() > MAX_TAG_NAME_LENGTH {
        return Err(XmlToolCallError::new(
            XmlErrorKind::TagNameTooLong,
            0,
            name,
            format!("tag name exceeds maximum length of {MAX_TAG_NAME_LENGTH} characters"),
        ));
    }
    if from >= text.len() {
        return Ok(None);
    }

    let bytes = text.as_bytes();
    let open_prefix = format!("<{name}");
    let close_tag = format!("</{name}>");

    let mut search = from;
    while search < text.len() {
        let Some(rel) = text[search..].find(&open_prefix) else {
            return Ok(None);
        };
        let open_pos = search + rel;
        let after_name = open_pos + open_prefix.len();
        if let Some(&next) = bytes.get(after_name) {
            if next != b'>' && next != b'=' && !next.is_ascii_whitespace() {
                search = open_pos + 1;
                continue;
            }
        }

        let Some(gt_rel) = text[open_pos..].find('>') else {
            return Ok(None);
        };
        let open_end = open_pos + gt_rel;

        let mut attribute = "";
        if after_name < open_end {
            if let Some(eq_rel) = text[after_name..open_end].find('=') {
                let mut attr_start = after_name + eq_rel + 1;
                while attr_start < open_end && bytes[attr_start].is_ascii_whitespace() {
                    attr_start += 1;
                }
                if attr_start < open_end {
                    let mut attr_end = open_end;
                    let quote = bytes[attr_start];
                    if quote == b'"' || quote == b'\'' {
                        match text[attr_start + 1..open_end].find(quote as char) {
                            Some(quote_rel) => {
                                attr_start += 1;
                                attr_end = attr_start + quote_rel;
                            }
                            // Unterminated quote: keep as-is, quote included.
                            None => {}
                        }
                    } else {
                        while attr_end > attr_start && bytes[attr_end - 1].is_ascii_whitespace() {
                            attr_end -= 1;
                        }
                    }
                    if attr_start < attr_end {
                        let value = &text[attr_start..attr_end];
                        if value.len() > MAX_ATTRIBUTE_LENGTH {
                            return Err(XmlToolCallError::new(
                                XmlErrorKind::AttributeTooLong,
                                open_pos,
                                value,
                                format!(
                                    "attribute exceeds maximum length of {MAX_ATTRIBUTE_LENGTH} characters"
                                ),
                            ));
                        }
                        attribute = value;
                    }
                }
            }
        }

        let Some(close_rel) = text[open_end + 1..].find(&close_tag) else {
            return Ok(None);
        };
        let close_pos = open_end + 1 + close_rel;

        return Ok(Some(XmlTag {
            name,
            attribute,
            content: &text[open_end + 1..close_pos],
            start: open_pos,
            end: close_pos + close_tag.len(),
        }));
    }
    Ok(None)
}

/// Collect every `<name>` tag in `text`, each scan resuming past the
/// previous match. Finding a tag beyond the cap is an error.
fn find_all_tags<'a>(text: &'a str, name: &'a str) -> Result<Vec<XmlTag<'a>>, XmlToolCallError> {
    let mut tags = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        let Some(tag) = find_tag(text, name, pos)? else {
            break;
        };
        if tags.len() == MAX_PARAMETER_COUNT {
            return Err(XmlToolCallError::new(
                XmlErrorKind::TooManyParameters,
                tag.start,
                &text[tag.start..],
                format!("too many {name} tags found (max: {MAX_PARAMETER_COUNT})"),
            ));
        }
        pos = tag.end;
        tags.push(tag);
    }
    Ok(tags)
}

fn trim_ws(s: &str) -> &str {
    s.trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\r'))
}

/// Decimal parse through a 64-bit intermediate; values outside the 32-bit
/// signed range are rejected.
fn parse_int_checked(s: &str) -> Option<i32> {
    let wide: i64 = s.parse().ok()?;
    i32::try_from(wide).ok()
}

/// Floating parse through a 64-bit intermediate; values outside the 32-bit
/// float range are rejected.
fn parse_float_checked(s: &str) -> Option<f32> {
    let wide: f64 = s.parse().ok()?;
    if wide > f64::from(f32::MAX) || wide < f64::from(f32::MIN) {
        return None;
    }
    Some(wide as f32)
}

/// JSON-escaped string literal; the only safe fallback for arbitrary bytes.
fn json_escape(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Coerce a raw parameter value into JSON text, guided by the function's
/// parameter schema when one is declared and by inference otherwise.
fn convert_value(raw: &str, key: &str, param_config: &Value) -> String {
    let trimmed = trim_ws(raw);

    if trimmed == "null" {
        return "null".to_string();
    }

    if let Some(config) = param_config.get(key) {
        let declared = config.get("type").and_then(Value::as_str).unwrap_or("string");
        match declared {
            "string" | "str" | "text" => return json_escape(trimmed),
            "integer" | "int" => {
                return match parse_int_checked(trimmed) {
                    Some(v) => v.to_string(),
                    None => json_escape(trimmed),
                }
            }
            "number" | "float" => {
                return match parse_float_checked(trimmed) {
                    Some(v) => v.to_string(),
                    None => json_escape(trimmed),
                }
            }
            "boolean" | "bool" => {
                return if trimmed == "true" || trimmed == "false" {
                    trimmed.to_string()
                } else {
                    "false".to_string()
                }
            }
            "object" | "array" => {
                return match serde_json::from_str::<Value>(trimmed) {
                    Ok(v) => v.to_string(),
                    Err(_) => json_escape(trimmed),
                }
            }
            _ => {}
        }
    }

    // No usable schema: infer the type from the value itself.
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return v.to_string();
    }
    if let Some(v) = parse_int_checked(trimmed) {
        return v.to_string();
    }
    if let Some(v) = parse_float_checked(trimmed) {
        return v.to_string();
    }
    if trimmed == "true" || trimmed == "false" {
        return trimmed.to_string();
    }
    json_escape(trimmed)
}

/// Parameter schema (`properties` map) for the named function.
fn get_param_config(func_name: &str, tools: &[ChatTool]) -> Value {
    for tool in tools {
        if tool.name == func_name {
            return match serde_json::from_str::<Value>(&tool.parameters) {
                Ok(params) => params.get("properties").cloned().unwrap_or(params),
                Err(_) => Value::Object(serde_json::Map::new()),
            };
        }
    }
    Value::Object(serde_json::Map::new())
}

impl ChatMessageParser {
    /// Extract one `<tool_call>` block from `content` and append the
    /// resulting tool call to the message.
    ///
    /// Text before the block is appended to content verbatim. A terminal
    /// failure returns the error and leaves the message with whatever prior
    /// successful additions produced; recoverable parameter-conversion
    /// failures are recorded in [`ChatMessageParser::last_xml_error`] while
    /// the call is still emitted.
    pub fn parse_xml_tool_call(
        &mut self,
        content: &str,
        tools: &[ChatTool],
    ) -> Result<(), XmlToolCallError> {
        self.set_last_xml_error(None);
        let result = self.parse_xml_tool_call_inner(content, tools);
        if let Err(e) = &result {
            self.set_last_xml_error(Some(e.clone()));
        }
        result
    }

    fn parse_xml_tool_call_inner(
        &mut self,
        content: &str,
        tools: &[ChatTool],
    ) -> Result<(), XmlToolCallError> {
        if content.len() > MAX_INPUT_SIZE {
            return Err(XmlToolCallError::new(
                XmlErrorKind::InputTooLarge,
                0,
                content,
                format!("XML content exceeds maximum size limit of {MAX_INPUT_SIZE} bytes"),
            ));
        }
        if tools.len() > MAX_TOOL_COUNT {
            return Err(XmlToolCallError::new(
                XmlErrorKind::TooManyTools,
                0,
                "",
                format!("too many tools provided: {} (max: {MAX_TOOL_COUNT})", tools.len()),
            ));
        }

        let valid_functions: HashSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();

        let Some(tool_call) = find_tag(content, "tool_call", 0)? else {
            return Err(XmlToolCallError::new(
                XmlErrorKind::InvalidXmlStructure,
                0,
                content,
                "no valid <tool_call> tag found in content".to_string(),
            ));
        };

        // Text before the tool call is regular content; whitespace may be
        // significant, so it is not trimmed.
        if tool_call.start > 0 {
            self.add_content(&content[..tool_call.start]);
        }

        let function = match find_tag(tool_call.content, "function", 0)? {
            Some(tag) if !tag.attribute.is_empty() => tag,
            _ => {
                tracing::debug!("invalid or missing function tag in tool_call");
                return Err(XmlToolCallError::new(
                    XmlErrorKind::InvalidXmlStructure,
                    tool_call.start,
                    tool_call.content,
                    "invalid or missing <function> tag with attribute in <tool_call>".to_string(),
                ));
            }
        };

        let function_name = trim_ws(function.attribute);
        if function_name.is_empty() || function_name.len() > MAX_TAG_NAME_LENGTH {
            return Err(XmlToolCallError::new(
                XmlErrorKind::InvalidFunctionName,
                tool_call.start + function.start,
                function_name,
                format!(
                    "invalid function name: '{function_name}' (length: {}, max: {MAX_TAG_NAME_LENGTH})",
                    function_name.len()
                ),
            ));
        }
        if !tools.is_empty() && !valid_functions.contains(function_name) {
            tracing::debug!(function = function_name, "function not found in available tools");
            return Err(XmlToolCallError::new(
                XmlErrorKind::FunctionNotFound,
                tool_call.start + function.start,
                function_name,
                format!("function '{function_name}' not found in available tools"),
            ));
        }

        let param_config = get_param_config(function_name, tools);

        let mut arguments = serde_json::Map::new();
        for param in find_all_tags(function.content, "parameter")? {
            if param.attribute.is_empty() {
                tracing::debug!("skipping parameter with empty attribute");
                continue;
            }
            let param_name = trim_ws(param.attribute);
            if param_name.is_empty() || param_name.len() > MAX_TAG_NAME_LENGTH {
                tracing::debug!(
                    parameter = param_name,
                    length = param_name.len(),
                    "invalid parameter name"
                );
                continue;
            }
            let converted = convert_value(param.content, param_name, &param_config);
            match serde_json::from_str::<Value>(&converted) {
                Ok(v) => {
                    arguments.insert(param_name.to_string(), v);
                }
                Err(e) => {
                    tracing::debug!(
                        parameter = param_name,
                        error = %e,
                        "failed to convert parameter, using raw value"
                    );
                    self.set_last_xml_error(Some(XmlToolCallError::new(
                        XmlErrorKind::ParameterConversionFailed,
                        tool_call.start + function.start + param.start,
                        &format!("{param_name}={}", param.content),
                        format!("failed to convert parameter '{param_name}': {e}"),
                    )));
                    arguments.insert(
                        param_name.to_string(),
                        Value::String(trim_ws(param.content).to_string()),
                    );
                }
            }
        }

        let args_json = serde_json::to_string(&Value::Object(arguments)).map_err(|e| {
            XmlToolCallError::new(
                XmlErrorKind::JsonSerializationFailed,
                tool_call.start,
                function_name,
                format!("failed to serialize arguments for function '{function_name}': {e}"),
            )
        })?;

        if self.add_tool_call(function_name, "", &args_json) {
            Ok(())
        } else {
            Err(XmlToolCallError::new(
                XmlErrorKind::InvalidFunctionName,
                tool_call.start,
                function_name,
                "tool call with empty function name rejected".to_string(),
            ))
        }
    }
}
