//! Header facade (spec.md §4.9).

use std::collections::BTreeMap;

use http::{HeaderName, HeaderValue};
use rhai::{Dynamic, Map};

use crate::error::MarasiError;
use crate::transaction::message::MessageHandle;

#[derive(Clone)]
pub struct Header {
    handle: MessageHandle,
}

impl Header {
    pub fn new(handle: MessageHandle) -> Self {
        Header { handle }
    }

    fn parse_name(key: &str) -> Result<HeaderName, MarasiError> {
        if key.is_empty() {
            return Err(MarasiError::bridge_argument("non-empty header name", "empty string"));
        }
        HeaderName::try_from(key).map_err(|_| {
            MarasiError::bridge_argument("valid header name", key.to_string())
        })
    }

    pub fn get(&mut self, key: &str) -> Dynamic {
        match Self::parse_name(key) {
            Ok(name) => self.handle.with(|m| {
                m.headers
                    .get(&name)
                    .and_then(|v| v.to_str().ok())
                    .map(|s| Dynamic::from(s.to_string()))
                    .unwrap_or(Dynamic::UNIT)
            }),
            Err(_) => Dynamic::UNIT,
        }
    }

    pub fn values(&mut self, key: &str) -> Dynamic {
        match Self::parse_name(key) {
            Ok(name) => self.handle.with(|m| {
                let values: Vec<Dynamic> = m
                    .headers
                    .get_all(&name)
                    .iter()
                    .filter_map(|v| v.to_str().ok())
                    .map(|s| Dynamic::from(s.to_string()))
                    .collect();
                if values.is_empty() {
                    Dynamic::UNIT
                } else {
                    Dynamic::from(values)
                }
            }),
            Err(_) => Dynamic::UNIT,
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        if let (Ok(name), Ok(val)) = (Self::parse_name(key), HeaderValue::from_str(value)) {
            self.handle.with_mut(|m| {
                m.headers.insert(name, val);
            });
        }
    }

    pub fn add(&mut self, key: &str, value: &str) {
        if let (Ok(name), Ok(val)) = (Self::parse_name(key), HeaderValue::from_str(value)) {
            self.handle.with_mut(|m| {
                m.headers.append(name, val);
            });
        }
    }

    pub fn delete(&mut self, key: &str) {
        if let Ok(name) = Self::parse_name(key) {
            self.handle.with_mut(|m| {
                m.headers.remove(&name);
            });
        }
    }

    pub fn has(&mut self, key: &str) -> bool {
        match Self::parse_name(key) {
            Ok(name) => self.handle.with(|m| m.headers.contains_key(&name)),
            Err(_) => false,
        }
    }

    pub fn to_table(&mut self) -> Map {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        self.handle.with(|m| {
            for (name, value) in m.headers.iter() {
                if let Ok(v) = value.to_str() {
                    grouped
                        .entry(name.as_str().to_string())
                        .or_default()
                        .push(v.to_string());
                }
            }
        });

        let mut map = Map::new();
        for (k, values) in grouped {
            let dynamic_values: Vec<Dynamic> = values.into_iter().map(Dynamic::from).collect();
            map.insert(k.into(), Dynamic::from(dynamic_values));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::message::HttpMessage;
    use std::sync::Arc;
    use parking_lot::Mutex;

    fn header_over_request() -> Header {
        let msg = HttpMessage::new_request("GET", "https://example.com/", "HTTP/1.1", "");
        Header::new(MessageHandle::Request(Arc::new(Mutex::new(msg))))
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut h = header_over_request();
        h.set("X-Test", "1");
        assert_eq!(h.get("X-Test").into_string().unwrap(), "1");
    }

    #[test]
    fn empty_key_is_rejected_silently() {
        let mut h = header_over_request();
        h.set("", "value");
        assert!(h.get("").is_unit());
    }

    #[test]
    fn add_appends_without_replacing() {
        let mut h = header_over_request();
        h.add("X-Multi", "a");
        h.add("X-Multi", "b");
        let values = h.values("X-Multi");
        let list = values.into_typed_array::<String>().unwrap();
        assert_eq!(list, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn delete_removes_header() {
        let mut h = header_over_request();
        h.set("X-Test", "1");
        h.delete("X-Test");
        assert!(!h.has("X-Test"));
    }
}
