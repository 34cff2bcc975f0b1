use std::sync::LazyLock;

use bytes::Bytes;
use mime::Mime;

use super::{Codec, Direction, MediaMatch, Payload};
use crate::error::BoxError;
use crate::template::ValueType;

static MEDIA_TYPES: LazyLock<[Mime; 1]> = LazyLock::new(|| [mime::TEXT_PLAIN]);

/// Plain text for `String` values. Claims `text/plain` exactly and any other
/// `text/*` type as a wildcard match.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextCodec;

impl Codec for TextCodec {
    fn name(&self) -> &'static str {
        "text"
    }

    fn media_types(&self) -> &[Mime] {
        MEDIA_TYPES.as_slice()
    }

    fn supports_type(&self, value_type: ValueType, _direction: Direction) -> bool {
        value_type.is::<String>()
    }

    fn media_match(&self, candidate: &Mime) -> Option<MediaMatch> {
        if candidate.essence_str() == mime::TEXT_PLAIN.essence_str() {
            Some(MediaMatch::Exact)
        } else if candidate.type_() == mime::TEXT || candidate.type_() == mime::STAR {
            Some(MediaMatch::Wildcard)
        } else {
            None
        }
    }

    fn encode(&self, payload: &Payload) -> Result<Bytes, BoxError> {
        match payload.value() {
            serde_json::Value::String(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            other => Err(format!("text codec cannot encode a non-string value: {other}").into()),
        }
    }

    fn decode(&self, body: &[u8], _value_type: ValueType) -> Result<serde_json::Value, BoxError> {
        Ok(serde_json::Value::String(
            String::from_utf8_lossy(body).into_owned(),
        ))
    }
}
