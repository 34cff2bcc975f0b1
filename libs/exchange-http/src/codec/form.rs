use std::sync::LazyLock;

use bytes::Bytes;
use mime::Mime;

use super::{Codec, Direction, Payload};
use crate::error::BoxError;
use crate::template::ValueType;

static MEDIA_TYPES: LazyLock<[Mime; 1]> =
    LazyLock::new(|| [mime::APPLICATION_WWW_FORM_URLENCODED]);

/// `application/x-www-form-urlencoded` request bodies. Encode only.
#[derive(Clone, Copy, Debug, Default)]
pub struct FormCodec;

impl Codec for FormCodec {
    fn name(&self) -> &'static str {
        "form"
    }

    fn media_types(&self) -> &[Mime] {
        MEDIA_TYPES.as_slice()
    }

    fn supports_type(&self, _value_type: ValueType, direction: Direction) -> bool {
        direction == Direction::Encode
    }

    fn encode(&self, payload: &Payload) -> Result<Bytes, BoxError> {
        Ok(Bytes::from(serde_urlencoded::to_string(payload.value())?))
    }

    fn decode(&self, _body: &[u8], _value_type: ValueType) -> Result<serde_json::Value, BoxError> {
        Err("form codec does not decode responses".into())
    }
}
