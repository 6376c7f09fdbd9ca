//! Best-effort JSON parsing over possibly-truncated input.
//!
//! [`parse`] reads one JSON value from the start of the input. When the input
//! ends in the middle of that value, the missing syntax is completed
//! ("healed") by splicing a caller-supplied marker string at the point where
//! the input ran out, then closing every open container. The result is a
//! well-formed tree in which the marker pinpoints the truncation, so
//! consumers can serialize subtrees and cut them back to exactly the bytes
//! that were actually received.
//!
//! The scanner is a single forward pass with an explicit container stack; it
//! never recurses, so adversarial nesting depth cannot exhaust the host
//! stack.

use serde_json::Value;

/// Marker pair describing where healing was spliced into the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealingMarker {
    /// The raw marker string as it appears inside healed string values.
    pub marker: String,
    /// The form to search for in serialized JSON text. Includes the
    /// structural characters (`"`, `:`, `,`) the healing inserted, so
    /// truncating a dump at this marker removes everything that was not in
    /// the original input.
    pub json_dump_marker: String,
}

/// A parsed (possibly healed) JSON value.
#[derive(Debug, Clone, PartialEq)]
pub struct HealedJson {
    pub value: Value,
    /// `None` when the input contained the complete value.
    pub healing_marker: Option<HealingMarker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Want {
    Value,
    ValueOrEnd,
    KeyOrEnd,
    Key,
    Colon,
    CommaOrEnd,
}

enum EofState {
    InStringValue { valid_end: usize },
    InStringKey { valid_end: usize },
    InNumber { start: usize },
    InLiteral { start: usize },
    Between(Want),
}

enum StringScan {
    /// Index just past the closing quote.
    Complete { end: usize },
    /// Input ended inside the string; `valid_end` is the last byte offset at
    /// which the content can be cut without leaving a dangling escape or a
    /// split multi-byte character.
    Truncated { valid_end: usize },
}

/// Parse one JSON value at the start of `input`, healing truncation with
/// `marker`.
///
/// Returns the value and the number of input bytes consumed (everything, for
/// a healed parse), or `None` on a hard syntax error or empty input. The
/// marker must not occur anywhere in `input`.
pub fn parse(input: &str, marker: &str) -> Option<(HealedJson, usize)> {
    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut stack: Vec<Container> = Vec::new();
    let mut want = Want::Value;
    let mut i = skip_ws(bytes, 0);
    if i >= len {
        return None;
    }

    let eof = loop {
        i = skip_ws(bytes, i);
        if i >= len {
            break EofState::Between(want);
        }
        let c = bytes[i];
        match want {
            Want::Value | Want::ValueOrEnd => {
                if c == b']' && want == Want::ValueOrEnd {
                    if stack.pop() != Some(Container::Array) {
                        return None;
                    }
                    i += 1;
                    if stack.is_empty() {
                        return complete(input, i);
                    }
                    want = Want::CommaOrEnd;
                    continue;
                }
                match c {
                    b'{' => {
                        stack.push(Container::Object);
                        want = Want::KeyOrEnd;
                        i += 1;
                    }
                    b'[' => {
                        stack.push(Container::Array);
                        want = Want::ValueOrEnd;
                        i += 1;
                    }
                    b'"' => match scan_string(input, i) {
                        StringScan::Complete { end } => {
                            i = end;
                            if stack.is_empty() {
                                return complete(input, end);
                            }
                            want = Want::CommaOrEnd;
                        }
                        StringScan::Truncated { valid_end } => {
                            break EofState::InStringValue { valid_end }
                        }
                    },
                    b'-' | b'0'..=b'9' => {
                        let start = i;
                        while i < len && is_number_byte(bytes[i]) {
                            i += 1;
                        }
                        if i >= len {
                            break EofState::InNumber { start };
                        }
                        if stack.is_empty() {
                            return complete(input, i);
                        }
                        want = Want::CommaOrEnd;
                    }
                    b't' | b'f' | b'n' => {
                        let start = i;
                        while i < len && bytes[i].is_ascii_alphabetic() {
                            i += 1;
                        }
                        if i >= len {
                            break EofState::InLiteral { start };
                        }
                        if !matches!(&input[start..i], "true" | "false" | "null") {
                            return None;
                        }
                        if stack.is_empty() {
                            return complete(input, i);
                        }
                        want = Want::CommaOrEnd;
                    }
                    _ => return None,
                }
            }
            Want::KeyOrEnd | Want::Key => {
                if c == b'}' && want == Want::KeyOrEnd {
                    if stack.pop() != Some(Container::Object) {
                        return None;
                    }
                    i += 1;
                    if stack.is_empty() {
                        return complete(input, i);
                    }
                    want = Want::CommaOrEnd;
                } else if c == b'"' {
                    match scan_string(input, i) {
                        StringScan::Complete { end } => {
                            i = end;
                            want = Want::Colon;
                        }
                        StringScan::Truncated { valid_end } => {
                            break EofState::InStringKey { valid_end }
                        }
                    }
                } else {
                    return None;
                }
            }
            Want::Colon => {
                if c != b':' {
                    return None;
                }
                i += 1;
                want = Want::Value;
            }
            Want::CommaOrEnd => match (c, stack.last()) {
                (b',', Some(Container::Object)) => {
                    i += 1;
                    want = Want::Key;
                }
                (b',', Some(Container::Array)) => {
                    i += 1;
                    want = Want::Value;
                }
                (b'}', Some(Container::Object)) | (b']', Some(Container::Array)) => {
                    stack.pop();
                    i += 1;
                    if stack.is_empty() {
                        return complete(input, i);
                    }
                }
                _ => return None,
            },
        }
    };

    // The input ran out mid-value. Pick the completion that makes the healed
    // text parse while keeping the marker at the truncation point.
    let (prefix_end, completion, json_dump_marker) = match eof {
        EofState::InStringValue { valid_end } => {
            (valid_end, format!("{marker}\""), marker.to_string())
        }
        EofState::InStringKey { valid_end } => {
            (valid_end, format!("{marker}\": 1"), marker.to_string())
        }
        EofState::InNumber { start } => {
            let token = &input[start..];
            if is_json_number(token) {
                match stack.last() {
                    None => return complete(input, len),
                    Some(top) => after_value(len, *top, marker),
                }
            } else if is_json_number(&format!("{token}0")) {
                // The token cannot stand on its own (`1.`, `-`, `1e`) but
                // more digits could fix it; rewind to its start and splice
                // the marker there instead.
                (start, format!("\"{marker}\""), format!("\"{marker}"))
            } else {
                return None;
            }
        }
        EofState::InLiteral { start } => {
            let token = &input[start..];
            if matches!(token, "true" | "false" | "null") {
                match stack.last() {
                    None => return complete(input, len),
                    Some(top) => after_value(len, *top, marker),
                }
            } else if ["true", "false", "null"].iter().any(|l| l.starts_with(token)) {
                (start, format!("\"{marker}\""), format!("\"{marker}"))
            } else {
                return None;
            }
        }
        EofState::Between(want) => match want {
            Want::Value | Want::ValueOrEnd => (len, format!("\"{marker}\""), format!("\"{marker}")),
            Want::KeyOrEnd | Want::Key => (len, format!("\"{marker}\": 1"), format!("\"{marker}")),
            Want::Colon => (len, format!(": \"{marker}\""), format!(":\"{marker}")),
            Want::CommaOrEnd => match stack.last() {
                Some(top) => after_value(len, *top, marker),
                None => return None,
            },
        },
    };

    let mut healed = String::with_capacity(prefix_end + completion.len() + stack.len());
    healed.push_str(&input[..prefix_end]);
    healed.push_str(&completion);
    for container in stack.iter().rev() {
        healed.push(match container {
            Container::Object => '}',
            Container::Array => ']',
        });
    }
    let value = match serde_json::from_str::<Value>(&healed) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "healed JSON fragment still failed to parse");
            return None;
        }
    };
    Some((
        HealedJson {
            value,
            healing_marker: Some(HealingMarker {
                marker: marker.to_string(),
                json_dump_marker,
            }),
        },
        len,
    ))
}

/// Completion for input that ends right after a complete value inside a
/// container: the marker becomes the next element or key.
fn after_value(len: usize, top: Container, marker: &str) -> (usize, String, String) {
    match top {
        Container::Object => (len, format!(", \"{marker}\": 1"), format!(",\"{marker}")),
        Container::Array => (len, format!(", \"{marker}\""), format!(",\"{marker}")),
    }
}

fn complete(input: &str, end: usize) -> Option<(HealedJson, usize)> {
    let value = serde_json::from_str::<Value>(&input[..end]).ok()?;
    Some((
        HealedJson {
            value,
            healing_marker: None,
        },
        end,
    ))
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn is_number_byte(b: u8) -> bool {
    matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
}

fn is_json_number(token: &str) -> bool {
    serde_json::from_str::<Value>(token)
        .map(|v| v.is_number())
        .unwrap_or(false)
}

fn scan_string(input: &str, start: usize) -> StringScan {
    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut i = start + 1;
    loop {
        if i >= len {
            let mut valid_end = len;
            while !input.is_char_boundary(valid_end) {
                valid_end -= 1;
            }
            return StringScan::Truncated { valid_end };
        }
        match bytes[i] {
            b'"' => return StringScan::Complete { end: i + 1 },
            b'\\' => {
                if i + 1 >= len {
                    return StringScan::Truncated { valid_end: i };
                }
                if bytes[i + 1] == b'u' {
                    if i + 6 > len {
                        return StringScan::Truncated { valid_end: i };
                    }
                    i += 6;
                } else {
                    i += 2;
                }
            }
            _ => i += 1,
        }
    }
}
