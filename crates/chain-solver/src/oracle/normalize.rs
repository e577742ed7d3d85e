//! Cleanup of free-form model output into a submittable answer.

use super::Answer;
use regex::Regex;
use std::sync::OnceLock;

const QUOTES: &[char] = &['"', '\'', '`'];

fn answer_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:the\s+)?(?:final\s+)?answer(?:\s*:|\s+is\b\s*:?)\s*")
            .expect("valid regex")
    })
}

/// Normalize raw oracle output.
///
/// 1. drop a surrounding markdown code fence
/// 2. if the whole output is a JSON literal, use it
/// 3. strip one layer of matching quotes
/// 4. strip a leading "Answer:" / "The answer is" prefix
/// 5. keep the first non-empty line, trimmed
/// 6. prefer a JSON literal over the string when the line parses as one
///
/// Empty output is a failure.
pub fn normalize_answer(raw: &str) -> Answer {
    let unfenced = strip_code_fence(raw.trim());

    match serde_json::from_str::<serde_json::Value>(unfenced) {
        Ok(serde_json::Value::String(s)) if s.trim().is_empty() => {
            return Answer::unavailable("empty oracle output");
        }
        Ok(value) => return Answer::Value(value),
        Err(_) => {}
    }

    let (unquoted, quoted) = strip_matching_quotes(unfenced);
    let unprefixed = answer_prefix_re().replace(unquoted, "");

    let line = unprefixed
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    // Only one quote layer overall: `Answer: "Paris"` is quoted after the prefix.
    let line = if quoted {
        line
    } else {
        strip_matching_quotes(line).0
    };

    if line.is_empty() {
        return Answer::unavailable("empty oracle output");
    }

    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(value) => Answer::Value(value),
        Err(_) => Answer::text(line),
    }
}

fn strip_code_fence(s: &str) -> &str {
    let Some(body) = s.strip_prefix("```") else {
        return s;
    };
    // Skip the info string ("json", "text", ...) on the opening line.
    let body = match body.find('\n') {
        Some(i) => &body[i + 1..],
        None => body,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Returns the trimmed input and whether a quote layer was removed.
fn strip_matching_quotes(s: &str) -> (&str, bool) {
    let s = s.trim();
    let mut chars = s.chars();
    match (chars.next(), chars.next_back()) {
        (Some(first), Some(last)) if first == last && QUOTES.contains(&first) => {
            (s[first.len_utf8()..s.len() - last.len_utf8()].trim(), true)
        }
        _ => (s, false),
    }
}
