//! JSON extraction from judge-model answers.
//!
//! Judge models wrap their JSON in markdown fences, prefix it with reasoning,
//! or emit several candidate objects. Extraction tries, in order:
//! 1. A ```json fenced block
//! 2. A generic ``` fenced block
//! 3. The whole answer when it starts with `{` or `[`
//! 4. The last balanced object that parses
//! 5. The first balanced array that parses
//!
//! ```
//! use webjudge::utils::json_extraction::extract_json;
//!
//! let answer = "Reasoning first.\n{\"status\": \"success\", \"confidence\": 4}";
//! assert_eq!(extract_json(answer), Some("{\"status\": \"success\", \"confidence\": 4}".to_string()));
//! ```

use std::sync::OnceLock;

use regex::Regex;

fn fenced_json_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("valid regex"))
}

fn fenced_any_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)```").expect("valid regex"))
}

fn parses(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate).is_ok()
}

/// Returns the byte index of the delimiter closing the one at `s[0]`.
///
/// Delimiters inside string literals are ignored.
pub fn find_matching_delimiter(s: &str) -> Option<usize> {
    let (open, close) = match s.chars().next()? {
        '{' => ('{', '}'),
        '[' => ('[', ']'),
        _ => return None,
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn balanced_at(content: &str, start: usize) -> Option<&str> {
    let tail = &content[start..];
    find_matching_delimiter(tail).map(|end| &tail[..=end])
}

fn from_fence(content: &str, re: &Regex) -> Option<String> {
    re.captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .find(|body| parses(body))
        .map(str::to_string)
}

fn last_valid_object(content: &str) -> Option<String> {
    let mut found = None;
    let mut pos = 0;
    while let Some(offset) = content[pos..].find('{') {
        let start = pos + offset;
        match balanced_at(content, start).filter(|candidate| parses(candidate)) {
            Some(candidate) => {
                pos = start + candidate.len();
                found = Some(candidate);
            }
            None => pos = start + 1,
        }
    }
    found.map(str::to_string)
}

fn first_valid_array(content: &str) -> Option<String> {
    content
        .match_indices('[')
        .filter_map(|(start, _)| balanced_at(content, start))
        .find(|candidate| parses(candidate))
        .map(str::to_string)
}

/// Extracts the JSON payload of a model answer, if any parses.
pub fn extract_json(content: &str) -> Option<String> {
    let trimmed = content.trim();

    if let Some(json) = from_fence(trimmed, fenced_json_regex()) {
        return Some(json);
    }
    if let Some(json) = from_fence(trimmed, fenced_any_regex()) {
        return Some(json);
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Some(candidate) = balanced_at(trimmed, 0) {
            if parses(candidate) {
                return Some(candidate.to_string());
            }
        }
    }
    last_valid_object(trimmed).or_else(|| first_valid_array(trimmed))
}

/// Parses the extracted JSON payload into a [`serde_json::Value`].
pub fn extract_json_value(content: &str) -> Option<serde_json::Value> {
    extract_json(content).and_then(|json| serde_json::from_str(&json).ok())
}
