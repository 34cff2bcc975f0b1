use std::sync::LazyLock;

use bytes::Bytes;
use mime::Mime;

use super::{Codec, Direction, MediaMatch, Payload};
use crate::error::BoxError;
use crate::template::ValueType;

static MEDIA_TYPES: LazyLock<[Mime; 1]> = LazyLock::new(|| [mime::APPLICATION_JSON]);

/// `application/json` and any `+json` structured-syntax suffix, for every
/// serializable type.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn media_types(&self) -> &[Mime] {
        MEDIA_TYPES.as_slice()
    }

    fn supports_type(&self, _value_type: ValueType, _direction: Direction) -> bool {
        true
    }

    fn media_match(&self, candidate: &Mime) -> Option<MediaMatch> {
        if candidate.essence_str() == mime::APPLICATION_JSON.essence_str()
            || candidate.suffix() == Some(mime::JSON)
        {
            return Some(MediaMatch::Exact);
        }
        let application_wildcard =
            candidate.type_() == mime::APPLICATION && candidate.subtype() == mime::STAR;
        (candidate.type_() == mime::STAR || application_wildcard).then_some(MediaMatch::Wildcard)
    }

    fn encode(&self, payload: &Payload) -> Result<Bytes, BoxError> {
        Ok(Bytes::from(serde_json::to_vec(payload.value())?))
    }

    fn decode(&self, body: &[u8], _value_type: ValueType) -> Result<serde_json::Value, BoxError> {
        Ok(serde_json::from_slice(body)?)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_matches_json_suffix() {
        let problem: Mime = "application/problem+json".parse().unwrap();
        assert_eq!(JsonCodec.media_match(&problem), Some(MediaMatch::Exact));
        assert_eq!(
            JsonCodec.media_match(&"application/*".parse().unwrap()),
            Some(MediaMatch::Wildcard)
        );
        assert_eq!(JsonCodec.media_match(&mime::TEXT_PLAIN), None);
    }

    #[test]
    fn test_encode_decode_value() {
        let payload = Payload::new(&serde_json::json!({"name": "Apple"})).unwrap();
        let bytes = JsonCodec.encode(&payload).unwrap();
        assert_eq!(&bytes[..], br#"{"name":"Apple"}"#);

        let value = JsonCodec
            .decode(br#"{"id":"7"}"#, ValueType::of::<serde_json::Value>())
            .unwrap();
        assert_eq!(value["id"], "7");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(JsonCodec.decode(b"<html>", ValueType::unit()).is_err());
    }
}
