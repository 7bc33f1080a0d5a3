use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::trace;

use crate::source::LogRecord;

/// Matches the user id embedded in an Emby authorization header value,
/// e.g. `MediaBrowser Client="...", UserId="a1b2c3d4", ...`.
static USER_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"UserId="([a-fA-F0-9]+)""#).expect("valid user id pattern"));

/// A successfully extracted (user, bytes) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub user_id: String,
    pub bytes: u64,
}

/// Decoded shape of an access-log `content` payload.
///
/// Only the fields the extractor needs; everything else in the payload is
/// ignored. The header bag is a BTreeMap so candidate values are scanned in
/// a deterministic order.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessLogContent {
    #[serde(default)]
    bytes_sent: i64,

    #[serde(default)]
    body_bytes_sent: i64,

    #[serde(default)]
    header: BTreeMap<String, HeaderValues>,
}

#[derive(Debug, Deserialize)]
struct HeaderValues {
    #[serde(default)]
    values: Vec<String>,
}

/// Parse one raw log row into a (user, bytes) pair.
///
/// Returns `None` for any row that cannot be attributed: undecodable
/// payload, no authorization header carrying a `UserId="<hex>"` value, or
/// no positive byte count. Rejection never aborts the batch; the caller
/// still advances its cursor past the row.
pub fn extract(record: &LogRecord) -> Option<Extracted> {
    let content: AccessLogContent = match serde_json::from_str(&record.content) {
        Ok(content) => content,
        Err(e) => {
            trace!(id = record.id, error = %e, "undecodable log payload, skipping");
            return None;
        }
    };

    let user_id = extract_user_id(&content.header)?;
    let bytes = extract_bytes(&content)?;

    Some(Extracted { user_id, bytes })
}

/// Scan authorization-style headers for a `UserId="<hex>"` value.
///
/// All headers whose name contains "authorization" are candidates (the edge
/// server records `X-Emby-Authorization`); the first matching value in
/// sorted header-name order wins.
fn extract_user_id(header: &BTreeMap<String, HeaderValues>) -> Option<String> {
    for (name, values) in header {
        if !name.to_ascii_lowercase().contains("authorization") {
            continue;
        }

        for value in &values.values {
            if let Some(captures) = USER_ID_RE.captures(value) {
                return Some(captures[1].to_string());
            }
        }
    }

    None
}

/// Byte count: `bytesSent` if positive, else `bodyBytesSent` if positive.
fn extract_bytes(content: &AccessLogContent) -> Option<u64> {
    if content.bytes_sent > 0 {
        return Some(content.bytes_sent as u64);
    }

    if content.body_bytes_sent > 0 {
        return Some(content.body_bytes_sent as u64);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, content: &str) -> LogRecord {
        LogRecord {
            id,
            content: content.to_string(),
        }
    }

    fn emby_content(user_id: &str, bytes_sent: i64) -> String {
        format!(
            r#"{{
                "requestPath": "/videos/123/stream.mkv",
                "bytesSent": {bytes_sent},
                "header": {{
                    "X-Emby-Authorization": {{
                        "values": ["MediaBrowser Client=\"Emby\", UserId=\"{user_id}\", Version=\"4.8\""]
                    }}
                }}
            }}"#
        )
    }

    #[test]
    fn test_extract_valid_record() {
        let rec = record(1, &emby_content("ab12cd34", 1000));
        let extracted = extract(&rec).expect("should extract");
        assert_eq!(extracted.user_id, "ab12cd34");
        assert_eq!(extracted.bytes, 1000);
    }

    #[test]
    fn test_extract_rejects_unparseable_payload() {
        let rec = record(3, "not json at all {{{");
        assert!(extract(&rec).is_none());
    }

    #[test]
    fn test_extract_rejects_missing_user_id() {
        let rec = record(
            5,
            r#"{"bytesSent": 500, "header": {"User-Agent": {"values": ["curl/8.0"]}}}"#,
        );
        assert!(extract(&rec).is_none());
    }

    #[test]
    fn test_extract_rejects_non_hex_user_id() {
        let rec = record(
            6,
            r#"{"bytesSent": 500, "header": {"X-Emby-Authorization": {"values": ["UserId=\"not-hex!\""]}}}"#,
        );
        assert!(extract(&rec).is_none());
    }

    #[test]
    fn test_extract_falls_back_to_body_bytes_sent() {
        let rec = record(
            7,
            r#"{
                "bytesSent": 0,
                "bodyBytesSent": 2048,
                "header": {"X-Emby-Authorization": {"values": ["UserId=\"deadbeef\""]}}
            }"#,
        );
        let extracted = extract(&rec).expect("should extract");
        assert_eq!(extracted.bytes, 2048);
    }

    #[test]
    fn test_extract_rejects_zero_bytes() {
        let rec = record(
            8,
            r#"{
                "bytesSent": 0,
                "bodyBytesSent": 0,
                "header": {"X-Emby-Authorization": {"values": ["UserId=\"deadbeef\""]}}
            }"#,
        );
        assert!(extract(&rec).is_none());
    }

    #[test]
    fn test_extract_rejects_negative_bytes() {
        let rec = record(
            9,
            r#"{
                "bytesSent": -1,
                "header": {"X-Emby-Authorization": {"values": ["UserId=\"deadbeef\""]}}
            }"#,
        );
        assert!(extract(&rec).is_none());
    }

    #[test]
    fn test_first_matching_value_wins() {
        let rec = record(
            10,
            r#"{
                "bytesSent": 100,
                "header": {
                    "X-Emby-Authorization": {
                        "values": [
                            "Client=\"Emby\" no user here",
                            "UserId=\"aaaa1111\"",
                            "UserId=\"bbbb2222\""
                        ]
                    }
                }
            }"#,
        );
        let extracted = extract(&rec).expect("should extract");
        assert_eq!(extracted.user_id, "aaaa1111");
    }

    #[test]
    fn test_header_scan_order_is_deterministic() {
        // Two authorization-style headers both carry a user id; sorted
        // header-name order means "Authorization" is scanned before
        // "X-Emby-Authorization".
        let rec = record(
            11,
            r#"{
                "bytesSent": 100,
                "header": {
                    "X-Emby-Authorization": {"values": ["UserId=\"ffff0000\""]},
                    "Authorization": {"values": ["UserId=\"aaaa1111\""]}
                }
            }"#,
        );
        let extracted = extract(&rec).expect("should extract");
        assert_eq!(extracted.user_id, "aaaa1111");
    }

    #[test]
    fn test_non_authorization_headers_are_ignored() {
        let rec = record(
            12,
            r#"{
                "bytesSent": 100,
                "header": {
                    "X-Custom": {"values": ["UserId=\"cccc3333\""]},
                    "X-Emby-Authorization": {"values": ["UserId=\"dddd4444\""]}
                }
            }"#,
        );
        let extracted = extract(&rec).expect("should extract");
        assert_eq!(extracted.user_id, "dddd4444");
    }

    #[test]
    fn test_extract_handles_missing_header_bag() {
        let rec = record(13, r#"{"bytesSent": 100}"#);
        assert!(extract(&rec).is_none());
    }
}
