//! Parsers for judge-model answers.
//!
//! Each parser returns `Err(reason)` when the answer is unusable, which the
//! retry loop treats as a failed attempt.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::types::{Confidence, VerdictStatus};
use crate::utils::extract_json_value;

/// Upper bound on key points kept from one answer.
pub const MAX_KEY_POINTS: usize = 20;

/// Key points longer than this are truncated.
pub const MAX_KEY_POINT_CHARS: usize = 200;

fn list_item_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+(.+?)\s*$").expect("valid regex"))
}

fn status_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)status\W{0,5}(success|succeeded|failure|failed|fail)\b"#).expect("valid regex")
    })
}

fn confidence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:confidence|score)\W{0,5}(\d+)"#).expect("valid regex")
    })
}

fn thoughts_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)thoughts?\s*:\s*(.+?)(?:\n\s*status\b|\z)").expect("valid regex"))
}

fn clean_point(raw: &str) -> Option<String> {
    let point = raw.trim().trim_matches('"').trim();
    if point.is_empty() {
        return None;
    }
    Some(point.chars().take(MAX_KEY_POINT_CHARS).collect())
}

/// Parses a key-point answer.
///
/// Accepts `{"key_points": [...]}`, a bare JSON array of strings, or a
/// numbered/bulleted plain-text list.
pub fn parse_key_points(text: &str) -> Result<Vec<String>, String> {
    let from_json = extract_json_value(text).and_then(|value| {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("key_points") {
                Some(Value::Array(items)) => items,
                _ => return None,
            },
            _ => return None,
        };
        Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(clean_point)
                .collect::<Vec<_>>(),
        )
    });

    let points = match from_json {
        Some(points) => points,
        None => text
            .lines()
            .filter_map(|line| list_item_regex().captures(line))
            .filter_map(|caps| caps.get(1).and_then(|m| clean_point(m.as_str())))
            .collect(),
    };

    if points.is_empty() {
        return Err("no key points found in answer".to_string());
    }
    Ok(points.into_iter().take(MAX_KEY_POINTS).collect())
}

fn clamp_score(value: &Value) -> Option<u8> {
    let raw = value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse::<f64>().ok()))?;
    Some(raw.round().clamp(1.0, 5.0) as u8)
}

/// Parses a batched relevance answer into one score per label.
///
/// Accepts `{"scores": [{"image": n, "score": s}]}` or a bare array of
/// numbers in label order. Scores are clamped to 1..=5; labels the model
/// omitted score 1. Fails when no label received a score.
pub fn parse_image_scores(text: &str, labels: &[usize]) -> Result<Vec<u8>, String> {
    let value = extract_json_value(text).ok_or_else(|| "no JSON in scoring answer".to_string())?;

    let entries = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("scores") {
            Some(Value::Array(items)) => items,
            _ => return Err("scoring answer has no \"scores\" array".to_string()),
        },
        _ => return Err("scoring answer is not an object or array".to_string()),
    };

    let mut by_label: HashMap<usize, u8> = HashMap::new();
    for (position, entry) in entries.iter().enumerate() {
        match entry {
            Value::Object(fields) => {
                let label = fields
                    .get("image")
                    .or_else(|| fields.get("index"))
                    .and_then(Value::as_u64)
                    .map(|l| l as usize);
                let score = fields.get("score").and_then(clamp_score);
                if let (Some(label), Some(score)) = (label, score) {
                    by_label.insert(label, score);
                }
            }
            other => {
                if let (Some(label), Some(score)) = (labels.get(position), clamp_score(other)) {
                    by_label.insert(*label, score);
                }
            }
        }
    }

    if !labels.iter().any(|label| by_label.contains_key(label)) {
        return Err("scoring answer scored none of the attached screenshots".to_string());
    }

    Ok(labels
        .iter()
        .map(|label| by_label.get(label).copied().unwrap_or(1))
        .collect())
}

/// Parsed outcome answer before confidence normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeAnswer {
    pub status: VerdictStatus,
    /// `None` when missing, non-integer or outside 1..=5.
    pub confidence: Option<Confidence>,
    pub thoughts: String,
}

fn parse_status(raw: &str) -> Option<VerdictStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "success" | "succeeded" | "true" => Some(VerdictStatus::Success),
        "failure" | "failed" | "fail" | "false" => Some(VerdictStatus::Failure),
        _ => None,
    }
}

fn parse_confidence(value: &Value) -> Option<Confidence> {
    let raw = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    u8::try_from(raw).ok().and_then(Confidence::new)
}

/// Parses the outcome answer.
///
/// JSON `{"thoughts", "status", "confidence"}` is preferred; otherwise a
/// labelled plain-text form (`Status: "success"`, `Confidence: 4`) is
/// accepted. An answer without a recognizable status is an error.
pub fn parse_outcome(text: &str) -> Result<OutcomeAnswer, String> {
    if let Some(Value::Object(fields)) = extract_json_value(text) {
        let status = fields.get("status").and_then(|v| match v {
            Value::String(s) => parse_status(s),
            Value::Bool(true) => Some(VerdictStatus::Success),
            Value::Bool(false) => Some(VerdictStatus::Failure),
            _ => None,
        });
        if let Some(status) = status {
            let confidence = fields
                .get("confidence")
                .or_else(|| fields.get("score"))
                .and_then(parse_confidence);
            let thoughts = fields
                .get("thoughts")
                .or_else(|| fields.get("reasoning"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            return Ok(OutcomeAnswer {
                status,
                confidence,
                thoughts,
            });
        }
    }

    let status = status_regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_status(m.as_str()))
        .ok_or_else(|| "answer has no recognizable status".to_string())?;

    let confidence = confidence_regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
        .and_then(Confidence::new);

    let thoughts = thoughts_regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| text.trim().to_string());

    Ok(OutcomeAnswer {
        status,
        confidence,
        thoughts,
    })
}
