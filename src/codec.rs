//! Serialization Adapter
//!
//! Converts typed values to and from the text blob stored on disk.
//!
//! Primitives are stored in their plain text form and decode leniently:
//! unparsable text becomes the type's zero value. Structured values are
//! wrapped in a one-element JSON array so every blob is a valid top-level
//! JSON document.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

// == Cacheable ==
/// A value that can be persisted by the cache.
///
/// `decode` returns `None` when the text does not describe a `Self`; the
/// delegate reports that as a type mismatch. `encode` returns `None` when the
/// value has no stored form; an empty string is a valid encoding.
pub trait Cacheable: Clone + Send + Sync + 'static {
    /// Rebuilds a value from its stored text.
    fn decode(encoded: &str) -> Option<Self>;

    /// Produces the stored text for this value.
    fn encode(&self) -> Option<String>;

    /// Stable identifier, required for collection members.
    fn identifier(&self) -> Option<&str> {
        None
    }

    /// Value equality used when comparing cached and in-memory copies.
    fn is_equal(&self, other: &Self) -> bool;
}

// == JSON helpers ==
/// Encodes `value` as a single-element JSON array.
///
/// Returns `None` when serialization fails.
pub fn encode_json<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(&[value]).ok()
}

/// Decodes the first element of a JSON array.
pub fn decode_json<T: DeserializeOwned>(encoded: &str) -> Option<T> {
    serde_json::from_str::<Vec<T>>(encoded)
        .ok()
        .and_then(|values| values.into_iter().next())
}

/// Encodes a collection index (ordered identifiers).
pub(crate) fn encode_index(ids: &[&str]) -> serde_json::Result<String> {
    serde_json::to_string(ids)
}

pub(crate) fn decode_index(encoded: &str) -> Option<Vec<String>> {
    serde_json::from_str(encoded).ok()
}

// == Primitive impls ==
impl Cacheable for String {
    fn decode(encoded: &str) -> Option<Self> {
        Some(encoded.to_owned())
    }

    fn encode(&self) -> Option<String> {
        Some(self.clone())
    }

    fn is_equal(&self, other: &Self) -> bool {
        self == other
    }
}

impl Cacheable for bool {
    /// Leading `t`, `y` or a non-zero digit reads as true, anything else as false.
    fn decode(encoded: &str) -> Option<Self> {
        let truthy = encoded
            .trim_start()
            .trim_start_matches(['+', '-'])
            .trim_start_matches('0')
            .chars()
            .next()
            .map(|c| matches!(c, 't' | 'T' | 'y' | 'Y' | '1'..='9'))
            .unwrap_or(false);
        Some(truthy)
    }

    fn encode(&self) -> Option<String> {
        Some(self.to_string())
    }

    fn is_equal(&self, other: &Self) -> bool {
        self == other
    }
}

macro_rules! lenient_number {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Cacheable for $ty {
                fn decode(encoded: &str) -> Option<Self> {
                    Some(encoded.parse().unwrap_or_default())
                }

                fn encode(&self) -> Option<String> {
                    Some(self.to_string())
                }

                #[allow(clippy::float_cmp)]
                fn is_equal(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

lenient_number!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

// == Cacheable Value ==
/// A keyed wrapper that makes any serde value cacheable.
///
/// Only `value` is persisted; `id` is the cache key and is restored by the
/// caller after a load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheableValue<T> {
    pub id: Option<String>,
    pub value: Option<T>,
}

impl<T> CacheableValue<T> {
    pub fn new(id: impl Into<String>, value: Option<T>) -> Self {
        Self {
            id: Some(id.into()),
            value,
        }
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

impl<T> Cacheable for CacheableValue<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static,
{
    fn decode(encoded: &str) -> Option<Self> {
        Some(Self {
            id: None,
            value: decode_json(encoded),
        })
    }

    fn encode(&self) -> Option<String> {
        self.value.as_ref().and_then(encode_json)
    }

    fn identifier(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Equal only when both sides carry a value and the values match.
    fn is_equal(&self, other: &Self) -> bool {
        match (&self.value, &other.value) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
