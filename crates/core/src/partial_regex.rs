//! Regex matching over possibly-truncated input.
//!
//! A [`PartialRegex`] pairs a compiled `regex::Regex` (full matches, capture
//! groups) with an anchored `regex_automata` dense DFA used to detect that
//! the input ended while a match was still in progress. The three-way
//! [`MatchType`] result is what lets the cursor distinguish "no match" from
//! "match may complete once more input arrives".

use regex::Regex;
use regex_automata::dfa::dense::DFA;
use regex_automata::dfa::{Automaton, StartKind};
use regex_automata::Anchored;

/// Outcome of a search over the available input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// No match, and no suffix of the input could grow into one.
    None,
    /// The input ends inside a candidate match; more input could complete it.
    Partial,
    /// A complete match was found.
    Full,
}

/// Half-open byte range into the searched input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringRange {
    pub begin: usize,
    pub end: usize,
}

/// Search result: for `Full`, `groups[0]` is the whole match and subsequent
/// entries are capture groups (`None` where a group did not participate).
/// For `Partial`, `groups[0]` spans from the candidate start to end of input.
#[derive(Debug, Clone)]
pub struct RegexMatch {
    pub match_type: MatchType,
    pub groups: Vec<Option<StringRange>>,
}

impl RegexMatch {
    fn none() -> Self {
        Self {
            match_type: MatchType::None,
            groups: Vec::new(),
        }
    }
}

/// A regex that can report partial matches at the end of truncated input.
pub struct PartialRegex {
    pattern: String,
    regex: Regex,
    dfa: DFA<Vec<u32>>,
}

impl PartialRegex {
    pub fn new(pattern: &str) -> anyhow::Result<Self> {
        let regex = Regex::new(pattern)?;
        let dfa = DFA::builder()
            .configure(DFA::config().start_kind(StartKind::Anchored))
            .build(pattern)
            .map_err(|e| anyhow::anyhow!("DFA compilation failed: {e}"))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            dfa,
        })
    }

    /// The source pattern, used in `Partial` diagnostics.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Search `input` starting at byte offset `from`.
    ///
    /// A full match wins over a partial one: partial detection only runs when
    /// the regex engine found nothing at or after `from`.
    pub fn search(&self, input: &str, from: usize) -> RegexMatch {
        if from > input.len() {
            return RegexMatch::none();
        }
        if let Some(caps) = self.regex.captures_at(input, from) {
            let groups = caps
                .iter()
                .map(|m| {
                    m.map(|m| StringRange {
                        begin: m.start(),
                        end: m.end(),
                    })
                })
                .collect();
            return RegexMatch {
                match_type: MatchType::Full,
                groups,
            };
        }
        if let Some(begin) = self.earliest_partial(input, from) {
            return RegexMatch {
                match_type: MatchType::Partial,
                groups: vec![Some(StringRange {
                    begin,
                    end: input.len(),
                })],
            };
        }
        RegexMatch::none()
    }

    /// Earliest position from which the anchored DFA survives to the end of
    /// the input without dying: the start of an in-progress match.
    fn earliest_partial(&self, input: &str, from: usize) -> Option<usize> {
        let bytes = input.as_bytes();
        let config = regex_automata::util::start::Config::new().anchored(Anchored::Yes);
        for begin in from..bytes.len() {
            if !input.is_char_boundary(begin) {
                continue;
            }
            let Ok(mut state) = self.dfa.start_state(&config) else {
                return None;
            };
            let mut alive = true;
            for &byte in &bytes[begin..] {
                state = self.dfa.next_state(state, byte);
                if self.dfa.is_dead_state(state) || self.dfa.is_quit_state(state) {
                    alive = false;
                    break;
                }
            }
            if alive {
                return Some(begin);
            }
        }
        None
    }
}

impl std::fmt::Debug for PartialRegex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialRegex")
            .field("pattern", &self.pattern)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_match_with_groups() {
        let re = PartialRegex::new(r"<fn=([a-z_]+)>").unwrap();
        let m = re.search("call <fn=get_weather> now", 0);
        assert_eq!(m.match_type, MatchType::Full);
        let whole = m.groups[0].unwrap();
        assert_eq!((whole.begin, whole.end), (5, 21));
        let name = m.groups[1].unwrap();
        assert_eq!(&"call <fn=get_weather> now"[name.begin..name.end], "get_weather");
    }

    #[test]
    fn no_match_reports_none() {
        let re = PartialRegex::new("</think>").unwrap();
        let m = re.search("plain text", 0);
        assert_eq!(m.match_type, MatchType::None);
    }

    #[test]
    fn truncated_literal_reports_partial() {
        let re = PartialRegex::new("</think>").unwrap();
        let m = re.search("reasoning</thi", 0);
        assert_eq!(m.match_type, MatchType::Partial);
        let g = m.groups[0].unwrap();
        assert_eq!((g.begin, g.end), (9, 14));
    }

    #[test]
    fn partial_respects_from_offset() {
        let re = PartialRegex::new("</think>").unwrap();
        let m = re.search("reasoning</thi", 10);
        // The candidate begins at 9, before `from`; the surviving suffix
        // inside the window starts later.
        assert_eq!(m.match_type, MatchType::None);
    }

    #[test]
    fn full_match_wins_over_later_partial() {
        let re = PartialRegex::new("ab").unwrap();
        let m = re.search("xxabyya", 0);
        assert_eq!(m.match_type, MatchType::Full);
        assert_eq!(m.groups[0].unwrap().begin, 2);
    }

    #[test]
    fn character_class_partial() {
        let re = PartialRegex::new(r"\[TOOL_[A-Z]+\]").unwrap();
        let m = re.search("text [TOOL_CAL", 0);
        assert_eq!(m.match_type, MatchType::Partial);
        assert_eq!(m.groups[0].unwrap().begin, 5);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(PartialRegex::new("[unclosed").is_err());
    }

    #[test]
    fn multibyte_input_is_handled() {
        let re = PartialRegex::new("<think>").unwrap();
        let m = re.search("héllo <thi", 0);
        assert_eq!(m.match_type, MatchType::Partial);
        assert_eq!(m.groups[0].unwrap().begin, 7);
    }
}
