//! JSON Repair
//!
//! Recovers structured JSON from model output. Handles:
//! - Markdown code fence wrapping (```json ... ```)
//! - A byte-order mark or prose around the JSON body
//! - Trailing commas
//! - Output cut off mid-array: the array is truncated to its last complete
//!   entry and every open container is closed
//!
//! Parsing reports whether any repair was needed so callers can record how
//! much they trusted the result.

use serde_json::Value;
use tracing::debug;

// =============================================================================
// Outcome
// =============================================================================

/// How a JSON value was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairKind {
    /// The raw text parsed as-is
    Clean,
    /// Fences, BOM or surrounding prose were stripped
    Unwrapped,
    /// Structural repair (commas, truncation) was applied
    Repaired,
}

impl RepairKind {
    pub fn was_repaired(&self) -> bool {
        !matches!(self, Self::Clean)
    }
}

// =============================================================================
// JsonRepairer
// =============================================================================

#[derive(Debug, Default)]
pub struct JsonRepairer;

impl JsonRepairer {
    pub fn new() -> Self {
        Self
    }

    /// Parse `raw`, repairing it when needed. `None` when nothing parses.
    pub fn parse(&self, raw: &str) -> Option<(Value, RepairKind)> {
        if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
            return Some((value, RepairKind::Clean));
        }

        let unwrapped = self.unwrap(raw);
        if let Ok(value) = serde_json::from_str::<Value>(&unwrapped) {
            return Some((value, RepairKind::Unwrapped));
        }

        debug!("JSON parse failed after unwrapping, attempting structural repair");
        let body = self.extract_body(&unwrapped).unwrap_or(&unwrapped);
        let without_commas = strip_trailing_commas(body);
        if let Ok(value) = serde_json::from_str::<Value>(&without_commas) {
            return Some((value, RepairKind::Repaired));
        }

        let closed = close_truncated(&without_commas)?;
        let closed = strip_trailing_commas(&closed);
        serde_json::from_str::<Value>(&closed)
            .ok()
            .map(|value| (value, RepairKind::Repaired))
    }

    /// Strip BOM and code fences
    fn unwrap(&self, raw: &str) -> String {
        let mut s = raw.trim().trim_start_matches('\u{feff}').trim();

        if s.starts_with("```") {
            s = match s.find('\n') {
                Some(nl) => &s[nl + 1..],
                None => s.trim_start_matches('`'),
            };
        }
        let s = s.trim_end();
        let s = s.strip_suffix("```").unwrap_or(s);
        s.trim().to_string()
    }

    /// Slice from the first `{` or `[` to the end of its matching container,
    /// or to the end of the text when the container never closes
    fn extract_body<'a>(&self, s: &'a str) -> Option<&'a str> {
        let start = s.find(['{', '['])?;
        let mut scanner = Scanner::default();
        for (i, ch) in s[start..].char_indices() {
            if let Some(Event::Close { depth: 0 }) = scanner.feed(ch) {
                return Some(&s[start..start + i + ch.len_utf8()]);
            }
        }
        Some(&s[start..])
    }
}

// =============================================================================
// Structural helpers
// =============================================================================

enum Event {
    Open,
    Close { depth: usize },
}

/// Tracks container nesting outside of string literals
#[derive(Default)]
struct Scanner {
    stack: Vec<char>,
    in_string: bool,
    escape: bool,
}

impl Scanner {
    fn feed(&mut self, ch: char) -> Option<Event> {
        if self.escape {
            self.escape = false;
            return None;
        }
        if self.in_string {
            match ch {
                '\\' => self.escape = true,
                '"' => self.in_string = false,
                _ => {}
            }
            return None;
        }
        match ch {
            '"' => {
                self.in_string = true;
                None
            }
            '{' | '[' => {
                self.stack.push(ch);
                Some(Event::Open)
            }
            '}' | ']' => {
                self.stack.pop();
                Some(Event::Close {
                    depth: self.stack.len(),
                })
            }
            _ => None,
        }
    }

    fn closers(stack: &[char]) -> String {
        stack
            .iter()
            .rev()
            .map(|c| if *c == '{' { '}' } else { ']' })
            .collect()
    }
}

/// Remove commas that directly precede `]` or `}` outside strings
fn strip_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            out.push(ch);
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some(']') | Some('}') | None) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

/// Close output that was cut off mid-structure.
///
/// Cuts back to the end of the last container that completed as an entry of
/// an array, then appends closers for whatever was still open at that point.
/// Returns `None` when the text is not truncated or no entry ever completed.
fn close_truncated(s: &str) -> Option<String> {
    let mut scanner = Scanner::default();
    let mut cut: Option<(usize, Vec<char>)> = None;

    for (i, ch) in s.char_indices() {
        if let Some(Event::Close { .. }) = scanner.feed(ch)
            && scanner.stack.last() == Some(&'[')
        {
            cut = Some((i + ch.len_utf8(), scanner.stack.clone()));
        }
    }

    if scanner.stack.is_empty() && !scanner.in_string {
        return None;
    }

    let (end, open) = cut?;
    let mut repaired = s[..end].to_string();
    repaired.push_str(&Scanner::closers(&open));
    Some(repaired)
}
