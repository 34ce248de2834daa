//! `marasi.encoding.{base64|hex|url|html|json}` (spec.md §4.8).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rhai::Dynamic;
use serde_json::Value;

use crate::scripting::convert::{dynamic_to_json, json_to_dynamic};

pub mod base64_codec {
    use super::*;

    pub fn encode(data: &str) -> String {
        BASE64.encode(data.as_bytes())
    }

    pub fn decode(data: &str) -> String {
        BASE64
            .decode(data)
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

pub mod hex_codec {
    pub fn encode(data: &str) -> String {
        hex::encode(data.as_bytes())
    }

    pub fn decode(data: &str) -> String {
        hex::decode(data)
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

pub mod url_codec {
    pub fn encode(data: &str) -> String {
        urlencoding::encode(data).into_owned()
    }

    pub fn decode(data: &str) -> String {
        urlencoding::decode(data)
            .map(|s| s.into_owned())
            .unwrap_or_default()
    }
}

pub mod html_codec {
    pub fn encode(data: &str) -> String {
        data.chars()
            .map(|c| match c {
                '&' => "&amp;".to_string(),
                '<' => "&lt;".to_string(),
                '>' => "&gt;".to_string(),
                '"' => "&quot;".to_string(),
                '\'' => "&#39;".to_string(),
                other => other.to_string(),
            })
            .collect()
    }

    pub fn decode(data: &str) -> String {
        data.replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
    }
}

pub mod json_codec {
    use super::*;

    pub fn encode(value: Dynamic) -> String {
        serde_json::to_string(&dynamic_to_json(value)).unwrap_or_default()
    }

    /// Decodes JSON into a Dynamic; recursively re-parses string values that look
    /// like JSON objects/arrays and keeps the original string otherwise (spec.md
    /// §4.8).
    pub fn decode(data: &str) -> Dynamic {
        match serde_json::from_str::<Value>(data) {
            Ok(value) => json_to_dynamic(reparse_nested_strings(value)),
            Err(_) => Dynamic::from(data.to_string()),
        }
    }

    fn reparse_nested_strings(value: Value) -> Value {
        match value {
            Value::String(s) => {
                let trimmed = s.trim();
                if (trimmed.starts_with('{') && trimmed.ends_with('}'))
                    || (trimmed.starts_with('[') && trimmed.ends_with(']'))
                {
                    match serde_json::from_str::<Value>(trimmed) {
                        Ok(nested) => reparse_nested_strings(nested),
                        Err(_) => Value::String(s),
                    }
                } else {
                    Value::String(s)
                }
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(reparse_nested_strings).collect()),
            Value::Object(obj) => Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, reparse_nested_strings(v)))
                    .collect(),
            ),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trips() {
        let original = "hello, marasi!";
        assert_eq!(base64_codec::decode(&base64_codec::encode(original)), original);
    }

    #[test]
    fn hex_round_trips() {
        let original = "hello, marasi!";
        assert_eq!(hex_codec::decode(&hex_codec::encode(original)), original);
    }

    #[test]
    fn url_round_trips() {
        let original = "a b/c?d=e";
        assert_eq!(url_codec::decode(&url_codec::encode(original)), original);
    }

    #[test]
    fn html_round_trips() {
        let original = "<script>alert('x')</script>";
        assert_eq!(html_codec::decode(&html_codec::encode(original)), original);
    }

    #[test]
    fn json_decode_reparses_nested_json_looking_strings() {
        let decoded = json_codec::decode(r#"{"a": "{\"b\": 1}"}"#);
        let map = decoded.cast::<rhai::Map>();
        let inner = map.get("a").unwrap().clone().cast::<rhai::Map>();
        assert_eq!(inner.get("b").unwrap().as_int().unwrap(), 1);
    }

    #[test]
    fn json_decode_keeps_plain_strings_as_strings() {
        let decoded = json_codec::decode(r#"{"a": "just text"}"#);
        let map = decoded.cast::<rhai::Map>();
        assert_eq!(map.get("a").unwrap().clone().into_string().unwrap(), "just text");
    }
}
