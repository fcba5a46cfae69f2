use serde_json::{Number, Value};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::models::CacheKey;

/// Serialises `value` with sorted object keys, NFC strings, integral floats
/// written as integers and no whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&normalise_number(n)),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(String, &Value)> = map
                .iter()
                .map(|(k, v)| (k.nfc().collect::<String>(), v))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            out.push('{');
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

fn write_string(raw: &str, out: &mut String) {
    let normalised: String = raw.nfc().collect();
    // Serialising a plain string cannot fail.
    match serde_json::to_string(&normalised) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => {
            out.push('"');
            out.push_str(&normalised);
            out.push('"');
        }
    }
}

fn normalise_number(n: &Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 => {
            format!("{}", f as i64)
        }
        Some(f) => format!("{}", f),
        None => n.to_string(),
    }
}

/// Hex SHA-256 of the canonical form of `input`.
pub fn fingerprint(input: &Value) -> String {
    let digest = Sha256::digest(canonical_json(input).as_bytes());
    hex::encode(digest)
}

/// `<prefix>:<operation>:<sha256-hex>`
pub fn cache_key(prefix: &str, operation: &str, input: &Value) -> CacheKey {
    let hash = fingerprint(input);
    CacheKey {
        key: format!("{}:{}:{}", prefix, operation, hash),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_fingerprint() {
        let a = json!({"test": "CBC", "values": {"hb": 13.5, "wbc": 6}});
        let b = json!({"values": {"wbc": 6, "hb": 13.5}, "test": "CBC"});
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(canonical_json(&a), r#"{"test":"CBC","values":{"hb":13.5,"wbc":6}}"#);
    }

    #[test]
    fn integral_floats_match_integers() {
        assert_eq!(fingerprint(&json!({"dose": 5.0})), fingerprint(&json!({"dose": 5})));
        assert_ne!(fingerprint(&json!({"dose": 5.5})), fingerprint(&json!({"dose": 5})));
    }

    #[test]
    fn strings_are_nfc_normalised() {
        let composed = json!({"name": "Ad\u{e9}"});
        let decomposed = json!({"name": "Ade\u{301}"});
        assert_eq!(fingerprint(&composed), fingerprint(&decomposed));
    }

    #[test]
    fn array_order_is_significant() {
        assert_ne!(fingerprint(&json!([1, 2])), fingerprint(&json!([2, 1])));
    }

    #[test]
    fn key_embeds_prefix_operation_and_hash() {
        let key = cache_key("diagnostic_ai", "report_summary", &json!({"id": 1}));
        assert_eq!(key.hash.len(), 64);
        assert_eq!(key.key, format!("diagnostic_ai:report_summary:{}", key.hash));
    }
}
