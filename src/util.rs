use chrono::DateTime;
use serde_json::Value;
use tracing_subscriber::{EnvFilter, fmt};

pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

/// Truncates to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    if max_chars <= 3 {
        return input.chars().take(max_chars).collect();
    }
    let kept: String = input.chars().take(max_chars - 3).collect();
    format!("{kept}...")
}

/// First `n` characters of `input`, never splitting a code point.
pub fn char_prefix(input: &str, n: usize) -> &str {
    match input.char_indices().nth(n) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// Milliseconds since the epoch for an RFC 3339 timestamp.
pub fn timestamp_millis(ts: &str) -> Option<i64> {
    if ts.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

pub fn value_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(*key)?;
    }
    Some(cursor)
}

pub fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    value_at(value, path)?.as_str()
}

pub fn string_at(value: &Value, path: &[&str]) -> String {
    str_at(value, path).unwrap_or_default().to_string()
}

pub fn uint_at(value: &Value, path: &[&str]) -> Option<u64> {
    let cursor = value_at(value, path)?;
    cursor
        .as_u64()
        .or_else(|| cursor.as_i64().and_then(|n| (n >= 0).then_some(n as u64)))
        .or_else(|| {
            cursor
                .as_f64()
                .and_then(|n| (n.is_finite() && n >= 0.0).then_some(n as u64))
        })
}

/// Renders a JSON value as display text: strings verbatim, everything else compact.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("héllo wörld", 6), "hél...");
        assert_eq!(truncate("abcdef", 2), "ab");
    }

    #[test]
    fn char_prefix_counts_chars() {
        assert_eq!(char_prefix("日本語テキスト", 3), "日本語");
        assert_eq!(char_prefix("ab", 5), "ab");
    }

    #[test]
    fn timestamp_parsing() {
        assert_eq!(
            timestamp_millis("2025-09-18T00:16:27.465Z"),
            Some(1_758_154_587_465)
        );
        assert_eq!(timestamp_millis(""), None);
        assert_eq!(timestamp_millis("yesterday"), None);
    }

    #[test]
    fn json_path_helpers() {
        let value = json!({"payload": {"info": {"total": 12, "neg": -1, "name": "x"}}});
        assert_eq!(uint_at(&value, &["payload", "info", "total"]), Some(12));
        assert_eq!(uint_at(&value, &["payload", "info", "neg"]), None);
        assert_eq!(str_at(&value, &["payload", "info", "name"]), Some("x"));
        assert_eq!(string_at(&value, &["payload", "missing"]), "");
        assert_eq!(value_text(&json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(value_text(&json!("plain")), "plain");
    }
}
