//! Masks sensitive substrings before an error string reaches a log line
//! or a structured event.

use once_cell::sync::Lazy;
use regex::Regex;

const MASK: &str = "***REDACTED***";

static QUERY_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(serviceKey|authKey|apiKey)=[^&\s]+").unwrap());

static SENSITIVE_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(api[_-]?key|secret|token)\s*[:=]\s*\S+").unwrap());

/// Masks the API key (query-string form and raw value), the Dooray
/// webhook token path segment, and anything matching a generic
/// sensitive-key pattern.
pub fn redact(input: &str, raw_api_key: Option<&str>, webhook_url: Option<&str>) -> String {
    let mut out = input.to_string();

    if let Some(key) = raw_api_key {
        if !key.is_empty() {
            out = out.replace(key, MASK);
        }
    }

    out = QUERY_KEY_PATTERN.replace_all(&out, |caps: &regex::Captures| {
        format!("{}={}", &caps[1], MASK)
    }).into_owned();

    out = SENSITIVE_KEY_PATTERN
        .replace_all(&out, |caps: &regex::Captures| format!("{}={}", &caps[1], MASK))
        .into_owned();

    if let Some(webhook) = webhook_url {
        if let Some(token) = dooray_token(webhook) {
            if !token.is_empty() {
                out = out.replace(&token, MASK);
            }
        }
    }

    out
}

/// Extracts the Dooray token: everything in the path after the second
/// path component (`/services/<domain>/<token>` → `<token>`).
fn dooray_token(webhook_url: &str) -> Option<String> {
    let url = url::Url::parse(webhook_url).ok()?;
    let segments: Vec<&str> = url.path_segments()?.collect();
    segments.get(2..).map(|rest| rest.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_raw_api_key() {
        let msg = "request failed with key abcdef12345 in payload";
        let redacted = redact(msg, Some("abcdef12345"), None);
        assert!(!redacted.contains("abcdef12345"));
        assert!(redacted.contains(MASK));
    }

    #[test]
    fn masks_query_string_key() {
        let msg = "GET https://api.example.test/warn?serviceKey=SUPERSECRET&page=1";
        let redacted = redact(msg, None, None);
        assert!(!redacted.contains("SUPERSECRET"));
    }

    #[test]
    fn masks_webhook_token_path() {
        let webhook = "https://hook.dooray.com/services/1234567890/abcDEF123token";
        let msg = format!("webhook call to {} failed", webhook);
        let redacted = redact(&msg, None, Some(webhook));
        assert!(!redacted.contains("abcDEF123token"));
    }

    #[test]
    fn leaves_unrelated_text_untouched() {
        let msg = "connection refused";
        assert_eq!(redact(msg, None, None), msg);
    }
}
