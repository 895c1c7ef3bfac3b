use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// UTF-8 JSON encoding for structured messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode(value: &Value) -> Result<Vec<u8>> {
        Self::to_bytes(value)
    }

    pub fn decode(data: &[u8]) -> Result<Value> {
        Self::from_bytes(data)
    }

    /// Encode any serializable type.
    pub fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode into any deserializable type.
    pub fn from_bytes<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::error::PayloadError;

    #[test]
    fn value_roundtrip() {
        let value = json!({"id": "1", "tags": ["a", "b"], "n": 3});
        let bytes = JsonCodec::encode(&value).unwrap();
        assert_eq!(JsonCodec::decode(&bytes).unwrap(), value);
    }

    #[test]
    fn compact_encoding() {
        let bytes = JsonCodec::encode(&json!({"id": "1"})).unwrap();
        assert_eq!(bytes, br#"{"id":"1"}"#);
    }

    #[test]
    fn typed_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Request {
            id: String,
        }

        let bytes = JsonCodec::to_bytes(&Request { id: "7".into() }).unwrap();
        let back: Request = JsonCodec::from_bytes(&bytes).unwrap();
        assert_eq!(back, Request { id: "7".into() });
    }

    #[test]
    fn invalid_json_is_reported() {
        let err = JsonCodec::decode(b"{not json").unwrap_err();
        assert!(matches!(err, PayloadError::Json(_)));
        assert!(!err.is_security());
    }

    #[test]
    fn invalid_utf8_is_reported() {
        assert!(JsonCodec::decode(&[0xff, 0xfe]).is_err());
    }
}
