//! Lenient answer extraction from free-form model output.
//!
//! Stages, first success wins:
//!
//! 1. Drop `<think>`/`</think>` tags (their content stays).
//! 2. Take the last `{...}` object with an `answer` key (any case) holding a list.
//! 3. Otherwise unwrap a markdown code fence and use the remainder.
//! 4. Parse as JSON; failing that, retry with `'` swapped for `"` when the
//!    candidate uses only single quotes.
//! 5. If nothing parses, the whole cleaned text is one answer.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static THINK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)</?think>").expect("static regex"));

static ANSWER_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)\{[^{}]*"(?i:answer)"\s*:\s*\[[^\]]*\][^{}]*\}"#).expect("static regex")
});

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("static regex")
});

/// Extract answers from raw model output. Empty means "no answer".
pub fn extract_answers(raw: &str) -> Vec<String> {
    let without_tags = THINK_TAG.replace_all(raw, "");
    let base = without_tags.trim();
    if base.is_empty() {
        return Vec::new();
    }

    let candidate = match ANSWER_OBJECT.find_iter(base).last() {
        Some(m) => m.as_str().trim().to_string(),
        None => strip_code_fence(base),
    };
    if candidate.is_empty() {
        return vec![base.to_string()];
    }

    if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
        return answers_from_value(value);
    }
    if candidate.contains('\'') && !candidate.contains('"') {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate.replace('\'', "\"")) {
            return answers_from_value(value);
        }
    }

    tracing::warn!(
        "Model reply is not JSON, using it as plain text: {}",
        candidate.chars().take(200).collect::<String>()
    );
    vec![base.to_string()]
}

/// Remove a surrounding markdown code fence, if present.
pub fn strip_code_fence(text: &str) -> String {
    match CODE_FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Pull the answer list out of a parsed reply.
///
/// Objects are searched for an `answer` key (exact `Answer`/`answer` first,
/// then any casing); bare values are used directly.
fn answers_from_value(value: Value) -> Vec<String> {
    match value {
        Value::Object(mut map) => {
            let key = ["Answer", "answer"]
                .into_iter()
                .find(|k| map.get(*k).is_some_and(|v| !is_falsy(v)))
                .map(String::from)
                .or_else(|| {
                    map.keys()
                        .find(|k| k.eq_ignore_ascii_case("answer"))
                        .cloned()
                });
            key.and_then(|k| map.remove(&k))
                .map(ensure_answer_list)
                .unwrap_or_default()
        }
        other => ensure_answer_list(other),
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Normalize a string, list or scalar into trimmed, non-empty answers.
pub fn ensure_answer_list(value: Value) -> Vec<String> {
    let scalar = |v: Value| match v {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(scalar)
            .filter(|s| !s.is_empty())
            .collect(),
        other => {
            let text = scalar(other);
            if text.is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        }
    }
}
