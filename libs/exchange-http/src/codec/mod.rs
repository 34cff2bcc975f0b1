//! Pluggable request/response body codecs.

mod form;
mod json;
mod registry;
mod text;

pub use form::FormCodec;
pub use json::JsonCodec;
pub use registry::CodecRegistry;
pub use text::TextCodec;

use std::fmt;

use bytes::Bytes;
use mime::Mime;
use serde::Serialize;

use crate::error::{BoxError, ExchangeError};
use crate::template::ValueType;

/// Which way a codec is used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Request body serialization.
    Encode,
    /// Response body deserialization.
    Decode,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Encode => "encoding",
            Self::Decode => "decoding",
        })
    }
}

/// How well a codec's media types cover a candidate media type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MediaMatch {
    Exact,
    Wildcard,
}

/// A serialized-but-not-yet-encoded request body.
///
/// The value is held in its JSON data model so any codec can render it.
#[derive(Clone, Debug, PartialEq)]
pub struct Payload {
    value_type: ValueType,
    value: serde_json::Value,
}

impl Payload {
    /// Capture `value` together with its Rust type.
    ///
    /// # Errors
    /// Returns [`ExchangeError::Encode`] when `value` cannot be serialized.
    pub fn new<T: Serialize + 'static>(value: &T) -> Result<Self, ExchangeError> {
        let value = serde_json::to_value(value).map_err(|e| ExchangeError::Encode(Box::new(e)))?;
        Ok(Self {
            value_type: ValueType::of::<T>(),
            value,
        })
    }

    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    #[must_use]
    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }
}

/// Encoder/decoder pair for one content representation.
///
/// Decoding yields the JSON data model; the proxy turns it into the caller's
/// type with `serde`.
pub trait Codec: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Media types this codec declares, most preferred first.
    fn media_types(&self) -> &[Mime];

    fn supports_type(&self, value_type: ValueType, direction: Direction) -> bool;

    fn encode(&self, payload: &Payload) -> Result<Bytes, BoxError>;

    fn decode(&self, body: &[u8], value_type: ValueType) -> Result<serde_json::Value, BoxError>;

    /// Match `candidate` against [`media_types`](Self::media_types),
    /// ignoring parameters such as `charset`.
    fn media_match(&self, candidate: &Mime) -> Option<MediaMatch> {
        let mut best = None;
        for declared in self.media_types() {
            if declared.essence_str() == candidate.essence_str() {
                return Some(MediaMatch::Exact);
            }
            if wildcard_covers(candidate, declared) || wildcard_covers(declared, candidate) {
                best = Some(MediaMatch::Wildcard);
            }
        }
        best
    }

    fn can_handle(&self, media_type: &Mime, value_type: ValueType, direction: Direction) -> bool {
        self.supports_type(value_type, direction) && self.media_match(media_type).is_some()
    }
}

/// `true` when `pattern` is a wildcard (`*/*` or `type/*`) covering `concrete`.
fn wildcard_covers(pattern: &Mime, concrete: &Mime) -> bool {
    if pattern.type_() == mime::STAR {
        return true;
    }
    pattern.subtype() == mime::STAR && pattern.type_() == concrete.type_()
}
