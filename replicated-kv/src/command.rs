//! Commands that flow through the replicated log.
//!
//! A write becomes a tagged record serialized with bincode. Strings are
//! length-prefixed on the wire, so a value may contain any character
//! (including `:` or newlines) without disturbing the key boundary.

use serde::{Deserialize, Serialize};

use crate::errors::CodecError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandPayload {
    Put { key: String, value: String },
}

impl CommandPayload {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        CommandPayload::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Splits the command into the pair it writes.
    pub fn into_pair(self) -> (String, String) {
        match self {
            CommandPayload::Put { key, value } => (key, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(key: &str, value: &str) -> (String, String) {
        let bytes = CommandPayload::put(key, value).encode().unwrap();
        CommandPayload::decode(&bytes).unwrap().into_pair()
    }

    #[test]
    fn test_round_trip_plain() {
        assert_eq!(round_trip("a", "1"), ("a".to_string(), "1".to_string()));
    }

    #[test]
    fn test_delimiters_inside_value_survive() {
        for value in ["x:y", ":", "a:b:c", "::", "line\nbreak", "k=v,w=z"] {
            assert_eq!(round_trip("key", value), ("key".to_string(), value.to_string()));
        }
    }

    #[test]
    fn test_delimiters_inside_key_survive() {
        assert_eq!(
            round_trip("ns:key", "v:1"),
            ("ns:key".to_string(), "v:1".to_string())
        );
    }

    #[test]
    fn test_empty_and_unicode_strings() {
        assert_eq!(round_trip("k", ""), ("k".to_string(), String::new()));
        assert_eq!(round_trip("", ""), (String::new(), String::new()));
        assert_eq!(
            round_trip("ключ", "värde ✓"),
            ("ключ".to_string(), "värde ✓".to_string())
        );
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = CommandPayload::put("k", "v").encode().unwrap();
        let b = CommandPayload::put("k", "v").encode().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(CommandPayload::decode(b"a:1").is_err());
        assert!(CommandPayload::decode(&[]).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let bytes = CommandPayload::put("key", "value").encode().unwrap();
        assert!(CommandPayload::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
