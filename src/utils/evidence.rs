use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    // detail field inside a JSON document that was itself string-escaped
    static ref ESCAPED_DETAIL: Regex = Regex::new(r#"\\"detail\\"\s*:\s*\\"([\s\S]*?)\\""#).unwrap();
    static ref PLAIN_DETAIL: Regex = Regex::new(r#""detail"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap();
}

/// First line of the `detail` field in an item's raw evidence, or an empty
/// string when none can be found.
pub fn reason_line(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let detail = match serde_json::from_str::<Value>(raw) {
        Ok(value) => detail_of(&value).unwrap_or_default(),
        Err(_) => scan_detail(raw).unwrap_or_default(),
    };

    unescape(&detail)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn detail_of(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.get("detail").and_then(Value::as_str).map(str::to_string),
        Value::String(inner) => match serde_json::from_str::<Value>(inner).ok()? {
            Value::Object(map) => map.get("detail").and_then(Value::as_str).map(str::to_string),
            _ => None,
        },
        _ => None,
    }
}

fn scan_detail(raw: &str) -> Option<String> {
    if let Some(caps) = ESCAPED_DETAIL.captures(raw) {
        let found = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
        if !found.is_empty() {
            return Some(found);
        }
    }
    PLAIN_DETAIL
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace("\\\"", "\""))
}

fn unescape(detail: &str) -> String {
    detail
        .replace("\\\\n", "\n")
        .replace("\\n", "\n")
        .replace("\\\\t", "\t")
        .replace("\\t", "\t")
}
