//! Canonical JSON bytes and content fingerprints.
//!
//! This is the single canonicalizer for the gateway: every byte string that
//! gets hashed (prompt envelopes, evidence bundles, allowed-id arrays, cache
//! keys) is produced here. Rules:
//!
//! 1. Object keys sorted lexicographically (byte order) at every depth.
//! 2. Compact form, no insignificant whitespace.
//! 3. Strings escaped per RFC 8259.
//! 4. Numbers in their shortest round-trip rendering (no trailing zeros).
//! 5. Array order preserved as given.
//! 6. Output is always valid UTF-8.

use std::io::Write;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Prefix carried by every fingerprint so downstream tooling can parse the
/// algorithm.
pub const FINGERPRINT_PREFIX: &str = "sha256:";

/// Produce canonical JSON bytes from a `serde_json::Value`.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    write_value(&mut buf, value);
    buf
}

/// Canonical JSON as a `String`. Convenience over [`canonical_bytes`].
pub fn canonical_string(value: &Value) -> String {
    // write_value only emits valid UTF-8.
    String::from_utf8(canonical_bytes(value)).unwrap_or_default()
}

/// Byte length of the canonical rendering. Used by the selector to measure
/// `bundle_size_bytes`.
pub fn canonical_len(value: &Value) -> usize {
    canonical_bytes(value).len()
}

/// `sha256:<64 hex>` over an arbitrary byte string.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{}{}", FINGERPRINT_PREFIX, hex::encode(digest))
}

/// `sha256:<64 hex>` over the canonical rendering of a value.
pub fn fingerprint_value(value: &Value) -> String {
    fingerprint_bytes(&canonical_bytes(value))
}

/// Check the `sha256:<64 hex>` shape without recomputing anything.
pub fn is_fingerprint(s: &str) -> bool {
    s.strip_prefix(FINGERPRINT_PREFIX)
        .map(|hex_part| {
            hex_part.len() == 64 && hex_part.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        })
        .unwrap_or(false)
}

fn write_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.extend_from_slice(b"null"),
        Value::Bool(true) => buf.extend_from_slice(b"true"),
        Value::Bool(false) => buf.extend_from_slice(b"false"),
        Value::Number(n) => {
            // i64/u64 render as plain integers; floats fall through to
            // serde_json's shortest (ryu) rendering, which is deterministic
            // and never carries trailing zeros beyond the round-trip minimum.
            if let Some(i) = n.as_i64() {
                let _ = write!(buf, "{i}");
            } else if let Some(u) = n.as_u64() {
                let _ = write!(buf, "{u}");
            } else {
                let _ = write!(buf, "{n}");
            }
        }
        Value::String(s) => write_string(buf, s),
        Value::Array(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_value(buf, item);
            }
            buf.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            buf.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_string(buf, key);
                buf.push(b':');
                write_value(buf, &map[*key]);
            }
            buf.push(b'}');
        }
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'"');
    for ch in s.chars() {
        match ch {
            '"' => buf.extend_from_slice(b"\\\""),
            '\\' => buf.extend_from_slice(b"\\\\"),
            '\n' => buf.extend_from_slice(b"\\n"),
            '\r' => buf.extend_from_slice(b"\\r"),
            '\t' => buf.extend_from_slice(b"\\t"),
            c if c < '\u{0020}' => {
                let _ = write!(buf, "\\u{:04x}", c as u32);
            }
            c => {
                let mut utf8 = [0u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            }
        }
    }
    buf.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sorted_keys_at_every_depth() {
        let v = json!({"z": 1, "a": {"d": 1, "c": 2}, "m": 3});
        assert_eq!(
            canonical_string(&v),
            r#"{"a":{"c":2,"d":1},"m":3,"z":1}"#
        );
    }

    #[test]
    fn test_compact_no_whitespace() {
        let v: Value = serde_json::from_str("{ \"a\" : 1 , \"b\" : [ 2 , 3 ] }").unwrap();
        assert_eq!(canonical_bytes(&v), b"{\"a\":1,\"b\":[2,3]}");
    }

    #[test]
    fn test_insertion_order_invariance() {
        let v1: Value = serde_json::from_str(r#"{"x":1,"a":2,"m":3}"#).unwrap();
        let v2: Value = serde_json::from_str(r#"{"m":3,"x":1,"a":2}"#).unwrap();
        assert_eq!(canonical_bytes(&v1), canonical_bytes(&v2));
    }

    #[test]
    fn test_array_order_preserved() {
        assert_eq!(canonical_string(&json!([3, 1, 2])), "[3,1,2]");
    }

    #[test]
    fn test_number_rendering() {
        assert_eq!(canonical_string(&json!({"a": 0})), r#"{"a":0}"#);
        assert_eq!(canonical_string(&json!({"a": -42})), r#"{"a":-42}"#);
        assert_eq!(canonical_string(&json!({"a": 1.5})), r#"{"a":1.5}"#);
        let big = format!("{{\"a\":{}}}", u64::MAX);
        assert_eq!(canonical_string(&json!({"a": u64::MAX})), big);
    }

    #[test]
    fn test_string_escaping() {
        let v = json!({"a": "line1\nline2\ttab\\slash\"quote"});
        assert_eq!(
            canonical_bytes(&v),
            b"{\"a\":\"line1\\nline2\\ttab\\\\slash\\\"quote\"}"
        );
    }

    #[test]
    fn test_control_char_escaping() {
        let v = json!({"a": "\u{0001}"});
        assert_eq!(canonical_bytes(&v), b"{\"a\":\"\\u0001\"}");
    }

    #[test]
    fn test_unicode_passthrough() {
        let v = json!({"emoji": "hello 🌍"});
        assert_eq!(canonical_string(&v), r#"{"emoji":"hello 🌍"}"#);
    }

    #[test]
    fn test_fingerprint_shape() {
        let fp = fingerprint_value(&json!({"a": 1}));
        assert!(fp.starts_with("sha256:"));
        assert_eq!(fp.len(), "sha256:".len() + 64);
        assert!(is_fingerprint(&fp));
    }

    #[test]
    fn test_fingerprint_stable_across_key_order() {
        let v1: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        let v2: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        assert_eq!(fingerprint_value(&v1), fingerprint_value(&v2));
    }

    #[test]
    fn test_known_digest() {
        // sha256 of the empty string is a fixed vector; guards against
        // accidental double-hashing or prefix drift.
        assert_eq!(
            fingerprint_bytes(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_is_fingerprint_rejects_malformed() {
        assert!(!is_fingerprint("sha256:short"));
        assert!(!is_fingerprint("md5:aaaa"));
        assert!(!is_fingerprint(
            "sha256:E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
        ));
        let mut not_hex = String::from("sha256:");
        not_hex.push_str(&"g".repeat(64));
        assert!(!is_fingerprint(&not_hex));
    }

    #[test]
    fn test_deterministic_repeated_calls() {
        let v = json!({"z": [1, 2], "a": {"c": 3, "b": 4}});
        let first = canonical_bytes(&v);
        for _ in 0..10 {
            assert_eq!(canonical_bytes(&v), first);
        }
    }
}
