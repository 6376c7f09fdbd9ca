//! Incremental chat-message parser core.
//!
//! [`ChatMessageParser`] owns one raw model output string (complete or still
//! streaming) and a cursor over it, and accumulates a [`ChatMessage`] as
//! dialect handlers consume the input through the primitives here: literal
//! and regex matching, whitespace skipping, reasoning-block extraction, and
//! healed-JSON consumption.
//!
//! Partial input is modeled by content, not by blocking: when an expected
//! token is missing at the end of a still-streaming input, operations return
//! [`ParseError::Partial`] and the caller re-parses from scratch once more
//! bytes arrive. The accumulated message grows append-only across such
//! re-parses.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use thiserror::Error;

use crate::message::ChatMessage;
use crate::partial_json::{self, HealedJson, HealingMarker};
use crate::partial_regex::{MatchType, PartialRegex, StringRange};
use crate::syntax::{ChatSyntax, ReasoningFormat};
use crate::xml_tool_call::XmlToolCallError;

/// Errors surfaced by the parser core.
///
/// `Partial` is not a failure: it means the input ended before an expected
/// token and the caller should retry with extended input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("partial input: expected {0}")]
    Partial(String),

    #[error("unexpected content at end of input")]
    TrailingContent,

    #[error("content path must point at a string value")]
    ContentPathNotString,
}

/// Result of a successful find/consume operation.
///
/// `prelude` is the input between the cursor position before the call and
/// the match start. `groups[0]` is the whole match; further entries are
/// capture groups for regex operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindResult {
    pub prelude: String,
    pub groups: Vec<Option<StringRange>>,
}

/// Result of [`ChatMessageParser::consume_json_with_dumped_args`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeJsonResult {
    pub value: Value,
    /// Whether the healing marker was encountered while cleaning the value,
    /// i.e. the result reflects truncated input.
    pub is_partial: bool,
}

/// Incremental parser turning raw model output into a structured assistant
/// message.
#[derive(Debug)]
pub struct ChatMessageParser {
    input: String,
    is_partial: bool,
    syntax: ChatSyntax,
    pos: usize,
    healing_marker: String,
    result: ChatMessage,
    last_xml_error: Option<XmlToolCallError>,
}

impl ChatMessageParser {
    pub fn new(input: impl Into<String>, is_partial: bool, syntax: ChatSyntax) -> Self {
        let input = input.into();
        let healing_marker = generate_healing_marker(&input);
        Self {
            input,
            is_partial,
            syntax,
            pos: 0,
            healing_marker,
            result: ChatMessage::default(),
            last_xml_error: None,
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn is_partial(&self) -> bool {
        self.is_partial
    }

    pub fn syntax(&self) -> &ChatSyntax {
        &self.syntax
    }

    /// The marker spliced into healed JSON; never occurs in the input.
    pub fn healing_marker(&self) -> &str {
        &self.healing_marker
    }

    /// The message accumulated so far.
    pub fn message(&self) -> &ChatMessage {
        &self.result
    }

    /// Slice the input by a match range.
    pub fn str_range(&self, range: StringRange) -> &str {
        debug_assert!(range.begin <= range.end);
        &self.input[range.begin..range.end]
    }

    /// Error recorded by the most recent XML tool-call parse, including
    /// non-terminal ones such as a parameter conversion falling back to a
    /// raw string.
    pub fn last_xml_error(&self) -> Option<&XmlToolCallError> {
        self.last_xml_error.as_ref()
    }

    pub(crate) fn set_last_xml_error(&mut self, error: Option<XmlToolCallError>) {
        self.last_xml_error = error;
    }

    /// Check the finish invariant and hand out the accumulated message: a
    /// complete input must have been consumed entirely.
    pub fn finish(self) -> Result<ChatMessage, ParseError> {
        if !self.is_partial && self.pos != self.input.len() {
            return Err(ParseError::TrailingContent);
        }
        Ok(self.result)
    }

    // ─── Message accumulation (delegates to ChatMessage) ─────────────────

    pub fn add_content(&mut self, content: &str) {
        self.result.add_content(content);
    }

    pub fn add_reasoning_content(&mut self, reasoning_content: &str) {
        self.result.add_reasoning_content(reasoning_content);
    }

    pub fn add_tool_call(&mut self, name: &str, id: &str, arguments: &str) -> bool {
        self.result.add_tool_call(name, id, arguments)
    }

    pub fn add_tool_call_json(&mut self, tool_call: &Value) -> bool {
        self.result.add_tool_call_json(tool_call)
    }

    pub fn add_tool_calls(&mut self, arr: &[Value]) -> bool {
        self.result.add_tool_calls(arr)
    }

    pub fn clear_tools(&mut self) {
        self.result.clear_tools();
    }

    // ─── Cursor primitives ───────────────────────────────────────────────

    /// Advance over ASCII whitespace; reports whether any was consumed.
    pub fn consume_spaces(&mut self) -> bool {
        let bytes = self.input.as_bytes();
        let start = self.pos;
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        self.pos != start
    }

    /// Advance past `literal` if it sits exactly at the cursor.
    pub fn try_consume_literal(&mut self, literal: &str) -> bool {
        if self.input[self.pos..].starts_with(literal) {
            self.pos += literal.len();
            true
        } else {
            false
        }
    }

    /// Like [`Self::try_consume_literal`] but a miss means the token may
    /// still arrive.
    pub fn consume_literal(&mut self, literal: &str) -> Result<(), ParseError> {
        if self.try_consume_literal(literal) {
            Ok(())
        } else {
            Err(ParseError::Partial(literal.to_string()))
        }
    }

    /// Find `literal` at or after the cursor and consume through it.
    ///
    /// On a miss over still-streaming input, a suffix of the input that is a
    /// proper prefix of `literal` counts as a match-in-progress spanning to
    /// the end of input.
    pub fn try_find_literal(&mut self, literal: &str) -> Option<FindResult> {
        if let Some(rel) = self.input[self.pos..].find(literal) {
            let begin = self.pos + rel;
            let end = begin + literal.len();
            let prelude = self.input[self.pos..begin].to_string();
            self.pos = end;
            return Some(FindResult {
                prelude,
                groups: vec![Some(StringRange { begin, end })],
            });
        }
        if self.is_partial {
            if let Some(begin) = partial_stop(&self.input, literal) {
                if begin >= self.pos {
                    let prelude = self.input[self.pos..begin].to_string();
                    let end = self.input.len();
                    self.pos = end;
                    return Some(FindResult {
                        prelude,
                        groups: vec![Some(StringRange { begin, end })],
                    });
                }
            }
        }
        None
    }

    /// Everything from the cursor to the end of input, consumed.
    pub fn consume_rest(&mut self) -> String {
        let rest = self.input[self.pos..].to_string();
        self.pos = self.input.len();
        rest
    }

    /// Search for `regex` starting at `from` (cursor position when `None`)
    /// and consume through the match.
    ///
    /// A partial match at the end of still-streaming input consumes the
    /// candidate (emitting the prelude when requested) and reports
    /// [`ParseError::Partial`] so the caller retries later; on complete
    /// input it degrades to a miss with the cursor untouched.
    pub fn try_find_regex(
        &mut self,
        regex: &PartialRegex,
        from: Option<usize>,
        add_prelude_to_content: bool,
    ) -> Result<Option<FindResult>, ParseError> {
        let m = regex.search(&self.input, from.unwrap_or(self.pos));
        match m.match_type {
            MatchType::None => Ok(None),
            MatchType::Partial => {
                if !self.is_partial {
                    return Ok(None);
                }
                let whole = m.groups[0].unwrap();
                let prelude = self.input[self.pos..whole.begin].to_string();
                self.pos = whole.end;
                if add_prelude_to_content {
                    self.add_content(&prelude);
                }
                Err(ParseError::Partial(regex.as_str().to_string()))
            }
            MatchType::Full => {
                let whole = m.groups[0].unwrap();
                let prelude = self.input[self.pos..whole.begin].to_string();
                self.pos = whole.end;
                if add_prelude_to_content {
                    self.add_content(&prelude);
                }
                Ok(Some(FindResult {
                    prelude,
                    groups: m.groups,
                }))
            }
        }
    }

    /// Consume `regex` only if a full match starts exactly at the cursor.
    pub fn try_consume_regex(
        &mut self,
        regex: &PartialRegex,
    ) -> Result<Option<FindResult>, ParseError> {
        let m = regex.search(&self.input, self.pos);
        match m.match_type {
            MatchType::None => Ok(None),
            MatchType::Partial => {
                if self.is_partial {
                    Err(ParseError::Partial(regex.as_str().to_string()))
                } else {
                    Ok(None)
                }
            }
            MatchType::Full => {
                let whole = m.groups[0].unwrap();
                if whole.begin != self.pos {
                    return Ok(None);
                }
                self.pos = whole.end;
                Ok(Some(FindResult {
                    prelude: String::new(),
                    groups: m.groups,
                }))
            }
        }
    }

    pub fn consume_regex(&mut self, regex: &PartialRegex) -> Result<FindResult, ParseError> {
        self.try_consume_regex(regex)?
            .ok_or_else(|| ParseError::Partial(regex.as_str().to_string()))
    }

    // ─── Reasoning extraction ────────────────────────────────────────────

    /// Recognize a reasoning window delimited by `start_think`/`end_think`
    /// and route its text per the configured policy. Returns whether a
    /// window was entered.
    ///
    /// Unclosed windows are tolerated even on complete input; some models
    /// drop the closing tag.
    pub fn try_parse_reasoning(&mut self, start_think: &str, end_think: &str) -> bool {
        if self.syntax.reasoning_format == ReasoningFormat::None {
            return false;
        }
        if self.syntax.thinking_forced_open || self.try_consume_literal(start_think) {
            if let Some(res) = self.try_find_literal(end_think) {
                self.handle_reasoning(start_think, end_think, &res.prelude, true);
                self.consume_spaces();
                return true;
            }
            let rest = self.consume_rest();
            if !rest.is_empty() {
                let closed = !self.is_partial;
                self.handle_reasoning(start_think, end_think, &rest, closed);
            }
            return true;
        }
        false
    }

    fn handle_reasoning(&mut self, start_think: &str, end_think: &str, reasoning: &str, closed: bool) {
        let stripped = reasoning.trim();
        if stripped.is_empty() {
            return;
        }
        if self.syntax.reasoning_in_content {
            let deepseek = self.syntax.reasoning_format == ReasoningFormat::DeepSeek;
            self.add_content(if deepseek { "<think>" } else { start_think });
            self.add_content(stripped);
            if closed {
                self.add_content(if deepseek { "</think>" } else { end_think });
            }
        } else {
            self.add_reasoning_content(stripped);
        }
    }

    // ─── Healed-JSON consumption ─────────────────────────────────────────

    /// Consume a JSON value at the cursor, healing truncation on partial
    /// input. `Ok(None)` means no JSON value starts here.
    pub fn try_consume_json(&mut self) -> Result<Option<HealedJson>, ParseError> {
        let Some((healed, consumed)) = partial_json::parse(&self.input[self.pos..], &self.healing_marker)
        else {
            return Ok(None);
        };
        self.pos += consumed;
        if healed.healing_marker.is_some() && !self.is_partial {
            // Healing on a complete input means the JSON itself is broken.
            return Err(ParseError::Partial("JSON".to_string()));
        }
        Ok(Some(healed))
    }

    pub fn consume_json(&mut self) -> Result<HealedJson, ParseError> {
        self.try_consume_json()?
            .ok_or_else(|| ParseError::Partial("JSON".to_string()))
    }

    /// Consume a JSON value and post-process it for transport: subtrees at
    /// `args_paths` are re-serialized to JSON text (truncated at the healing
    /// marker on partial input), strings at `content_paths` are truncated at
    /// the raw marker, and healings the caller cannot consume are dropped.
    pub fn try_consume_json_with_dumped_args(
        &mut self,
        args_paths: &[&[&str]],
        content_paths: &[&[&str]],
    ) -> Result<Option<ConsumeJsonResult>, ParseError> {
        let Some(HealedJson {
            value,
            healing_marker,
        }) = self.try_consume_json()?
        else {
            return Ok(None);
        };

        if healing_marker.is_none() {
            if args_paths.is_empty() {
                return Ok(Some(ConsumeJsonResult {
                    value,
                    is_partial: false,
                }));
            }
            if args_paths.iter().any(|p| p.is_empty()) {
                // The whole value is the arguments payload.
                return Ok(Some(ConsumeJsonResult {
                    value: Value::String(value.to_string()),
                    is_partial: false,
                }));
            }
        }

        tracing::debug!(
            json = %value,
            healing = healing_marker.is_some(),
            "cleaning parsed JSON and dumping argument paths"
        );
        let (value, found) = dump_args_and_drop_healings(
            &value,
            healing_marker.as_ref(),
            &self.healing_marker,
            self.is_partial,
            args_paths,
            content_paths,
        )?;
        Ok(Some(ConsumeJsonResult {
            value,
            is_partial: found,
        }))
    }

    pub fn consume_json_with_dumped_args(
        &mut self,
        args_paths: &[&[&str]],
        content_paths: &[&[&str]],
    ) -> Result<ConsumeJsonResult, ParseError> {
        self.try_consume_json_with_dumped_args(args_paths, content_paths)?
            .ok_or_else(|| ParseError::Partial("JSON".to_string()))
    }
}

/// Rejection-sample a marker absent from the input. Each retry appends
/// another 64 random bits; a marker longer than the input cannot occur in
/// it, so the loop terminates.
fn generate_healing_marker(input: &str) -> String {
    let mut rng = StdRng::from_entropy();
    let mut marker = format!("{:016x}", rng.gen::<u64>());
    while input.contains(&marker) {
        marker.push_str(&format!("{:016x}", rng.gen::<u64>()));
    }
    marker
}

/// Start of the longest suffix of `text` that is a proper prefix of
/// `literal`.
fn partial_stop(text: &str, literal: &str) -> Option<usize> {
    let t = text.as_bytes();
    let l = literal.as_bytes();
    let max = l.len().saturating_sub(1).min(t.len());
    for n in (1..=max).rev() {
        if t[t.len() - n..] == l[..n] {
            return Some(t.len() - n);
        }
    }
    None
}

fn path_matches(paths: &[&[&str]], path: &[String]) -> bool {
    paths
        .iter()
        .any(|p| p.len() == path.len() && p.iter().zip(path).all(|(a, b)| *a == b.as_str()))
}

/// Resolve a node that needs no descent: argument dumps, content-path
/// truncation, and scalars. Containers return `Ok(None)` and are walked by
/// the caller.
#[allow(clippy::too_many_arguments)]
fn resolve_node(
    node: &Value,
    path: &[String],
    args_paths: &[&[&str]],
    content_paths: &[&[&str]],
    healing: Option<&HealingMarker>,
    is_partial: bool,
    found: &mut bool,
) -> Result<Option<Value>, ParseError> {
    if path_matches(args_paths, path) {
        let mut dumped = node.to_string();
        if is_partial {
            if let Some(h) = healing {
                if let Some(idx) = dumped.find(&h.json_dump_marker) {
                    dumped.truncate(idx);
                    *found = true;
                }
                if dumped == "\"" {
                    // Healing completed `:"marker` right after the key; the
                    // dangling quote carries no received bytes.
                    dumped.clear();
                }
            }
        }
        return Ok(Some(Value::String(dumped)));
    }
    if path_matches(content_paths, path) {
        let Value::String(s) = node else {
            return Err(ParseError::ContentPathNotString);
        };
        let mut s = s.clone();
        if let Some(h) = healing {
            // Raw marker here: we are already inside the logical string.
            if let Some(idx) = s.find(&h.marker) {
                s.truncate(idx);
                *found = true;
            }
        }
        return Ok(Some(Value::String(s)));
    }
    match node {
        Value::Object(_) | Value::Array(_) => Ok(None),
        other => Ok(Some(other.clone())),
    }
}

enum Out {
    Obj(serde_json::Map<String, Value>),
    Arr(Vec<Value>),
}

enum Entries<'a> {
    Obj(Vec<(&'a String, &'a Value)>, usize),
    Arr(&'a [Value], usize),
}

struct Frame<'a> {
    entries: Entries<'a>,
    out: Out,
    key_in_parent: Option<String>,
    pushed_path: bool,
}

impl<'a> Frame<'a> {
    fn new(node: &'a Value, key_in_parent: Option<String>, pushed_path: bool) -> Self {
        let (entries, out) = match node {
            Value::Object(map) => (
                Entries::Obj(map.iter().collect(), 0),
                Out::Obj(serde_json::Map::new()),
            ),
            Value::Array(items) => (Entries::Arr(items, 0), Out::Arr(Vec::new())),
            _ => unreachable!("frames are only built over containers"),
        };
        Self {
            entries,
            out,
            key_in_parent,
            pushed_path,
        }
    }
}

/// The cleanup walk of the healed tree: dump argument paths, truncate
/// content paths, drop healings nothing can consume. Iterative with an
/// explicit frame stack so adversarial nesting depth cannot exhaust the
/// host stack.
///
/// An object key containing the marker truncates the whole object at that
/// key: the key itself was still being written. A string array element
/// containing the marker truncates the array at that element.
fn dump_args_and_drop_healings(
    root: &Value,
    healing: Option<&HealingMarker>,
    raw_marker: &str,
    is_partial: bool,
    args_paths: &[&[&str]],
    content_paths: &[&[&str]],
) -> Result<(Value, bool), ParseError> {
    let mut found = false;
    let mut path: Vec<String> = Vec::new();

    if let Some(v) = resolve_node(
        root,
        &path,
        args_paths,
        content_paths,
        healing,
        is_partial,
        &mut found,
    )? {
        return Ok((v, found));
    }

    enum Next<'a> {
        Finished,
        Descend(&'a Value, Option<String>, bool),
    }

    let mut frames: Vec<Frame> = vec![Frame::new(root, None, false)];
    loop {
        let next = {
            let Frame { entries, out, .. } = frames.last_mut().unwrap();
            match entries {
                Entries::Obj(items, idx) => {
                    let out = match out {
                        Out::Obj(m) => m,
                        Out::Arr(_) => unreachable!(),
                    };
                    let mut next = Next::Finished;
                    while *idx < items.len() {
                        let (key, val) = items[*idx];
                        *idx += 1;
                        if key.contains(raw_marker) {
                            // The key was truncated mid-write: drop it and
                            // everything after it.
                            found = true;
                            break;
                        }
                        if let Value::String(s) = val {
                            if s.contains(raw_marker) {
                                found = true;
                                if let Some(h) = healing {
                                    path.push(key.clone());
                                    let keep = path_matches(content_paths, &path)
                                        && h.marker == h.json_dump_marker;
                                    if keep {
                                        // Healing landed inside the string
                                        // itself; keep the received prefix.
                                        let mut t = s.clone();
                                        if let Some(ix) = t.find(&h.marker) {
                                            t.truncate(ix);
                                        }
                                        out.insert(key.clone(), Value::String(t));
                                    }
                                    path.pop();
                                }
                                break;
                            }
                            out.insert(key.clone(), val.clone());
                            continue;
                        }
                        path.push(key.clone());
                        if let Some(v) = resolve_node(
                            val,
                            &path,
                            args_paths,
                            content_paths,
                            healing,
                            is_partial,
                            &mut found,
                        )? {
                            out.insert(key.clone(), v);
                            path.pop();
                            continue;
                        }
                        next = Next::Descend(val, Some(key.clone()), true);
                        break;
                    }
                    next
                }
                Entries::Arr(items, idx) => {
                    let items = *items;
                    let out = match out {
                        Out::Arr(a) => a,
                        Out::Obj(_) => unreachable!(),
                    };
                    let mut next = Next::Finished;
                    while *idx < items.len() {
                        let val = &items[*idx];
                        *idx += 1;
                        if let Value::String(s) = val {
                            if s.contains(raw_marker) {
                                // Arrays are truncated at the healed element
                                // rather than healed.
                                found = true;
                                break;
                            }
                            out.push(val.clone());
                            continue;
                        }
                        if let Some(v) = resolve_node(
                            val,
                            &path,
                            args_paths,
                            content_paths,
                            healing,
                            is_partial,
                            &mut found,
                        )? {
                            out.push(v);
                            continue;
                        }
                        next = Next::Descend(val, None, false);
                        break;
                    }
                    next
                }
            }
        };
        match next {
            Next::Descend(node, key, pushed) => frames.push(Frame::new(node, key, pushed)),
            Next::Finished => {
                let frame = frames.pop().unwrap();
                if frame.pushed_path {
                    path.pop();
                }
                let value = match frame.out {
                    Out::Obj(m) => Value::Object(m),
                    Out::Arr(a) => Value::Array(a),
                };
                match frames.last_mut() {
                    None => return Ok((value, found)),
                    Some(parent) => match (&mut parent.out, frame.key_in_parent) {
                        (Out::Obj(m), Some(k)) => {
                            m.insert(k, value);
                        }
                        (Out::Arr(a), None) => a.push(value),
                        _ => unreachable!(),
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser(input: &str, is_partial: bool) -> ChatMessageParser {
        ChatMessageParser::new(input, is_partial, ChatSyntax::default())
    }

    fn deepseek(reasoning_in_content: bool, thinking_forced_open: bool) -> ChatSyntax {
        ChatSyntax {
            reasoning_format: ReasoningFormat::DeepSeek,
            reasoning_in_content,
            thinking_forced_open,
        }
    }

    // ─── Cursor primitives ───────────────────────────────────────────────

    #[test]
    fn literal_consumption_moves_only_on_success() {
        let mut p = parser("hello world", false);
        assert!(!p.try_consume_literal("world"));
        assert_eq!(p.pos(), 0);
        assert!(p.try_consume_literal("hello"));
        assert_eq!(p.pos(), 5);
        assert!(p.consume_spaces());
        assert!(p.consume_literal("world").is_ok());
        assert_eq!(p.pos(), p.input().len());
    }

    #[test]
    fn consume_literal_miss_is_partial() {
        let mut p = parser("hel", true);
        assert_eq!(
            p.consume_literal("hello"),
            Err(ParseError::Partial("hello".to_string()))
        );
        assert_eq!(p.pos(), 0);
    }

    #[test]
    fn find_literal_returns_prelude_and_range() {
        let mut p = parser("say </think> then", false);
        let res = p.try_find_literal("</think>").unwrap();
        assert_eq!(res.prelude, "say ");
        let g = res.groups[0].unwrap();
        assert_eq!(p.str_range(g), "</think>");
        assert_eq!(p.pos(), g.end);
    }

    #[test]
    fn find_literal_partial_suffix_on_streaming_input() {
        let mut p = parser("reasoning</thi", true);
        let res = p.try_find_literal("</think>").unwrap();
        assert_eq!(res.prelude, "reasoning");
        let g = res.groups[0].unwrap();
        assert_eq!((g.begin, g.end), (9, 14));
        assert_eq!(p.pos(), 14);
    }

    #[test]
    fn find_literal_no_partial_suffix_on_complete_input() {
        let mut p = parser("reasoning</thi", false);
        assert!(p.try_find_literal("</think>").is_none());
        assert_eq!(p.pos(), 0);
    }

    #[test]
    fn consume_rest_takes_everything() {
        let mut p = parser("abc", false);
        assert!(p.try_consume_literal("a"));
        assert_eq!(p.consume_rest(), "bc");
        assert_eq!(p.pos(), 3);
        assert_eq!(p.consume_rest(), "");
    }

    #[test]
    fn find_regex_full_match_adds_prelude_to_content() {
        let re = PartialRegex::new(r"<fn=([a-z]+)>").unwrap();
        let mut p = parser("hi <fn=add> rest", false);
        let res = p.try_find_regex(&re, None, true).unwrap().unwrap();
        assert_eq!(res.prelude, "hi ");
        assert_eq!(p.message().content, "hi ");
        let name = res.groups[1].unwrap();
        assert_eq!(p.str_range(name), "add");
    }

    #[test]
    fn find_regex_partial_on_streaming_input_reports_partial() {
        let re = PartialRegex::new(r"<fn=[a-z]+>").unwrap();
        let mut p = parser("hi <fn=ad", true);
        let err = p.try_find_regex(&re, None, true).unwrap_err();
        assert_eq!(err, ParseError::Partial(re.as_str().to_string()));
        // The candidate is consumed and the prelude emitted so the partial
        // message already carries the preceding text.
        assert_eq!(p.message().content, "hi ");
        assert_eq!(p.pos(), p.input().len());
    }

    #[test]
    fn find_regex_partial_on_complete_input_is_a_miss() {
        let re = PartialRegex::new(r"<fn=[a-z]+>").unwrap();
        let mut p = parser("hi <fn=ad", false);
        assert!(p.try_find_regex(&re, None, true).unwrap().is_none());
        assert_eq!(p.pos(), 0);
        assert_eq!(p.message().content, "");
    }

    #[test]
    fn consume_regex_requires_anchored_match() {
        let re = PartialRegex::new(r"[0-9]+").unwrap();
        let mut p = parser("ab12", false);
        assert!(p.try_consume_regex(&re).unwrap().is_none());
        assert_eq!(p.pos(), 0);
        assert!(p.try_consume_literal("ab"));
        let res = p.try_consume_regex(&re).unwrap().unwrap();
        assert_eq!(p.str_range(res.groups[0].unwrap()), "12");
    }

    #[test]
    fn consume_regex_miss_reports_partial() {
        let re = PartialRegex::new(r"\{").unwrap();
        let mut p = parser("no json here", false);
        assert_eq!(
            p.consume_regex(&re),
            Err(ParseError::Partial(re.as_str().to_string()))
        );

        let mut p = parser("{}", false);
        assert!(p.consume_regex(&re).is_ok());
        assert_eq!(p.pos(), 1);
    }

    #[test]
    fn consume_json_miss_reports_partial() {
        let mut p = parser("plain", true);
        assert_eq!(
            p.consume_json(),
            Err(ParseError::Partial("JSON".to_string()))
        );

        let mut p = parser(r#"[1,2]"#, false);
        let healed = p.consume_json().unwrap();
        assert_eq!(healed.value, json!([1, 2]));
    }

    #[test]
    fn non_try_dumped_args_variant() {
        let mut p = parser(r#"{"name":"f","arguments":{}}"#, false);
        let res = p.consume_json_with_dumped_args(&[&["arguments"]], &[]).unwrap();
        assert_eq!(res.value["arguments"], json!("{}"));

        let mut p = parser("not json", false);
        assert!(p.consume_json_with_dumped_args(&[], &[]).is_err());
    }

    #[test]
    fn healing_marker_never_in_input() {
        let input = "1234567890abcdef".repeat(64);
        let p = parser(&input, true);
        assert!(!input.contains(p.healing_marker()));
    }

    #[test]
    fn finish_rejects_leftover_on_complete_input() {
        let mut p = parser("abc", false);
        p.try_consume_literal("ab");
        assert_eq!(p.finish(), Err(ParseError::TrailingContent));

        let mut p = parser("abc", true);
        p.try_consume_literal("ab");
        assert!(p.finish().is_ok());
    }

    // ─── Reasoning extraction ────────────────────────────────────────────

    #[test]
    fn reasoning_disabled_is_a_noop() {
        let mut p = parser("<think> plan </think>answer", false);
        assert!(!p.try_parse_reasoning("<think>", "</think>"));
        assert_eq!(p.pos(), 0);
    }

    #[test]
    fn reasoning_closed_window() {
        let mut p = ChatMessageParser::new(
            "<think> plan </think>answer",
            false,
            deepseek(false, false),
        );
        assert!(p.try_parse_reasoning("<think>", "</think>"));
        assert_eq!(p.message().reasoning_content, "plan");
        let rest = p.consume_rest();
        assert_eq!(rest, "answer");
    }

    #[test]
    fn reasoning_unclosed_on_complete_input_is_tolerated() {
        let mut p = ChatMessageParser::new("<think>still going", false, deepseek(false, false));
        assert!(p.try_parse_reasoning("<think>", "</think>"));
        assert_eq!(p.message().reasoning_content, "still going");
        assert!(p.finish().is_ok());
    }

    #[test]
    fn reasoning_in_content_rewraps_tags() {
        let mut p = ChatMessageParser::new(
            "<think> plan </think>answer",
            false,
            deepseek(true, false),
        );
        assert!(p.try_parse_reasoning("<think>", "</think>"));
        assert_eq!(p.message().content, "<think>plan</think>");
    }

    #[test]
    fn reasoning_in_content_leaves_unclosed_window_open() {
        let mut p = ChatMessageParser::new("<think> plan", true, deepseek(true, false));
        assert!(p.try_parse_reasoning("<think>", "</think>"));
        assert_eq!(p.message().content, "<think>plan");
    }

    #[test]
    fn reasoning_forced_open_skips_start_tag() {
        let mut p = ChatMessageParser::new("plan </think>answer", false, deepseek(false, true));
        assert!(p.try_parse_reasoning("<think>", "</think>"));
        assert_eq!(p.message().reasoning_content, "plan");
        assert_eq!(p.consume_rest(), "answer");
    }

    #[test]
    fn empty_reasoning_is_dropped() {
        let mut p = ChatMessageParser::new("<think>   </think>x", false, deepseek(false, false));
        assert!(p.try_parse_reasoning("<think>", "</think>"));
        assert_eq!(p.message().reasoning_content, "");
        assert_eq!(p.message().content, "");
    }

    #[test]
    fn generic_format_uses_caller_tags_in_content() {
        let syntax = ChatSyntax {
            reasoning_format: ReasoningFormat::Generic,
            reasoning_in_content: true,
            thinking_forced_open: false,
        };
        let mut p = ChatMessageParser::new("[T]deep[/T]done", false, syntax);
        assert!(p.try_parse_reasoning("[T]", "[/T]"));
        assert_eq!(p.message().content, "[T]deep[/T]");
    }

    // ─── Healed-JSON consumption ─────────────────────────────────────────

    #[test]
    fn consume_json_complete_value() {
        let mut p = parser(r#"{"a":1} tail"#, false);
        let healed = p.try_consume_json().unwrap().unwrap();
        assert_eq!(healed.value, json!({"a": 1}));
        assert!(healed.healing_marker.is_none());
        assert_eq!(p.pos(), 7);
    }

    #[test]
    fn consume_json_none_when_no_json() {
        let mut p = parser("plain text", false);
        assert!(p.try_consume_json().unwrap().is_none());
        assert_eq!(p.pos(), 0);
    }

    #[test]
    fn healing_on_complete_input_is_rejected() {
        let mut p = parser(r#"{"a":"#, false);
        assert_eq!(
            p.try_consume_json(),
            Err(ParseError::Partial("JSON".to_string()))
        );
    }

    #[test]
    fn dumped_args_truncates_at_healing_marker() {
        let mut p = parser(r#"{"name":"sum","arguments":{"a":1,"b":"#, true);
        let res = p
            .try_consume_json_with_dumped_args(&[&["arguments"]], &[])
            .unwrap()
            .unwrap();
        assert!(res.is_partial);
        assert_eq!(res.value["name"], json!("sum"));
        assert_eq!(res.value["arguments"], json!(r#"{"a":1,"b":"#));
    }

    #[test]
    fn dumped_args_complete_value_dumps_fully() {
        let mut p = parser(r#"{"name":"sum","arguments":{"a":1,"b":2}}"#, false);
        let res = p
            .try_consume_json_with_dumped_args(&[&["arguments"]], &[])
            .unwrap()
            .unwrap();
        assert!(!res.is_partial);
        assert_eq!(res.value["arguments"], json!(r#"{"a":1,"b":2}"#));
    }

    #[test]
    fn no_args_paths_fast_path_returns_value() {
        let mut p = parser(r#"{"a":1}"#, false);
        let res = p.try_consume_json_with_dumped_args(&[], &[]).unwrap().unwrap();
        assert!(!res.is_partial);
        assert_eq!(res.value, json!({"a": 1}));
    }

    #[test]
    fn root_args_path_dumps_whole_value() {
        let mut p = parser(r#"{"x":true}"#, false);
        let res = p
            .try_consume_json_with_dumped_args(&[&[]], &[])
            .unwrap()
            .unwrap();
        assert_eq!(res.value, json!(r#"{"x":true}"#));
    }

    #[test]
    fn root_args_path_on_partial_input_truncates() {
        let mut p = parser(r#"{"x":"#, true);
        let res = p
            .try_consume_json_with_dumped_args(&[&[]], &[])
            .unwrap()
            .unwrap();
        assert!(res.is_partial);
        assert_eq!(res.value, json!(r#"{"x":"#));
    }

    #[test]
    fn content_path_truncates_at_raw_marker() {
        let mut p = parser(r#"{"response":"partial answe"#, true);
        let res = p
            .try_consume_json_with_dumped_args(&[], &[&["response"]])
            .unwrap()
            .unwrap();
        assert!(res.is_partial);
        assert_eq!(res.value["response"], json!("partial answe"));
    }

    #[test]
    fn content_path_on_non_string_is_an_error() {
        let mut p = parser(r#"{"response":{"a":1},"k":"#, true);
        let err = p
            .try_consume_json_with_dumped_args(&[], &[&["response"]])
            .unwrap_err();
        assert_eq!(err, ParseError::ContentPathNotString);
    }

    #[test]
    fn truncated_key_drops_rest_of_object() {
        let mut p = parser(r#"{"name":"sum","argum"#, true);
        let res = p
            .try_consume_json_with_dumped_args(&[&["arguments"]], &[])
            .unwrap()
            .unwrap();
        assert!(res.is_partial);
        assert_eq!(res.value, json!({"name": "sum"}));
    }

    #[test]
    fn healed_string_outside_special_paths_is_dropped() {
        let mut p = parser(r#"{"a":"trunca"#, true);
        let res = p.try_consume_json_with_dumped_args(&[&["other"]], &[]).unwrap().unwrap();
        assert!(res.is_partial);
        assert_eq!(res.value, json!({}));
    }

    #[test]
    fn arrays_truncate_at_healed_element() {
        let mut p = parser(r#"{"items":["a","b","c"#, true);
        let res = p
            .try_consume_json_with_dumped_args(&[&["other"]], &[])
            .unwrap()
            .unwrap();
        assert!(res.is_partial);
        assert_eq!(res.value, json!({"items": ["a", "b"]}));
    }

    #[test]
    fn nested_json_heals_every_level() {
        let depth = 64;
        let mut input = String::new();
        for _ in 0..depth {
            input.push_str(r#"{"k":"#);
        }
        input.push('1');
        // Unclosed on purpose; healing closes every level.
        let mut p = parser(&input, true);
        let res = p
            .try_consume_json_with_dumped_args(&[&["k"]], &[])
            .unwrap()
            .unwrap();
        assert!(res.is_partial);
    }

    #[test]
    fn adversarial_nesting_depth_is_rejected_gracefully() {
        // Depths beyond the JSON backend's recursion limit surface as "no
        // JSON here" rather than a crash; the scan itself is iterative.
        let depth = 50_000;
        let input = r#"{"k":"#.repeat(depth);
        let mut p = parser(&input, true);
        assert!(p.try_consume_json().unwrap().is_none());
    }
}
