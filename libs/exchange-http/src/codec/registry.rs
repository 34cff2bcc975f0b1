use std::fmt;
use std::sync::Arc;

use mime::Mime;

use super::{Codec, Direction, FormCodec, JsonCodec, MediaMatch, TextCodec};
use crate::error::ExchangeError;
use crate::template::ValueType;

/// Ordered codec list. Earlier registrations win within a specificity class.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: Vec<Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// Registry without any codecs.
    #[must_use]
    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Built-ins in order: text, JSON, form.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            codecs: vec![Arc::new(TextCodec), Arc::new(JsonCodec), Arc::new(FormCodec)],
        }
    }

    /// Append a codec after the existing ones.
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.push(codec);
    }

    /// New registry with `overrides` placed ahead of this one's codecs.
    #[must_use]
    pub fn with_overrides(&self, overrides: &[Arc<dyn Codec>]) -> Self {
        let mut codecs = overrides.to_vec();
        codecs.extend(self.codecs.iter().cloned());
        Self { codecs }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Pick a codec for `value_type` among `candidates`.
    ///
    /// Exact media matches are preferred over wildcard ones; within each
    /// class the first registered codec wins.
    ///
    /// # Errors
    /// Returns [`ExchangeError::CodecNotFound`] when nothing matches.
    pub fn select(
        &self,
        candidates: &[Mime],
        value_type: ValueType,
        direction: Direction,
    ) -> Result<&Arc<dyn Codec>, ExchangeError> {
        for class in [MediaMatch::Exact, MediaMatch::Wildcard] {
            let found = self.codecs.iter().find(|codec| {
                codec.supports_type(value_type, direction)
                    && candidates
                        .iter()
                        .any(|candidate| codec.media_match(candidate) == Some(class))
            });
            if let Some(codec) = found {
                return Ok(codec);
            }
        }
        Err(ExchangeError::CodecNotFound {
            direction,
            value_type: value_type.name(),
            candidates: candidates
                .iter()
                .map(Mime::essence_str)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// First codec able to encode `value_type`, with its preferred media type.
    ///
    /// # Errors
    /// Returns [`ExchangeError::CodecNotFound`] when no codec can encode it.
    pub fn writer_for(&self, value_type: ValueType) -> Result<(&Arc<dyn Codec>, Mime), ExchangeError> {
        self.codecs
            .iter()
            .find_map(|codec| {
                if !codec.supports_type(value_type, Direction::Encode) {
                    return None;
                }
                codec.media_types().first().map(|m| (codec, m.clone()))
            })
            .ok_or_else(|| ExchangeError::CodecNotFound {
                direction: Direction::Encode,
                value_type: value_type.name(),
                candidates: "*/*".to_owned(),
            })
    }

    /// Media types of every codec able to decode `value_type`, in registry
    /// order and without duplicates. Used as the default `Accept`.
    #[must_use]
    pub fn readable_media_types(&self, value_type: ValueType) -> Vec<Mime> {
        let mut out: Vec<Mime> = Vec::new();
        for codec in &self.codecs {
            if !codec.supports_type(value_type, Direction::Decode) {
                continue;
            }
            for media in codec.media_types() {
                if !out.iter().any(|m| m.essence_str() == media.essence_str()) {
                    out.push(media.clone());
                }
            }
        }
        out
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.codecs.iter().map(|c| c.name()))
            .finish()
    }
}
