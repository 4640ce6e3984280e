//! Events, records and payload conversion.
//!
//! An [`Event`] is what callers hand to [`crate::Publisher::publish`]. Before
//! anything is batched every event is converted into a [`Record`]: the payload
//! becomes raw bytes (see [`get_data_bytes`]) and the record gets a content
//! [`Fingerprint`] used to cap retries per record.
//!
//! # Example
//!
//! ```
//! use stream_publisher::{Event, Record, TextEncoding};
//!
//! let event = Event::text("user-42", r#"{"action":"login"}"#);
//! let record = Record::from_event(event, TextEncoding::Utf8).unwrap();
//!
//! assert_eq!(record.partition_key, "user-42");
//! assert_eq!(record.size_bytes(), Some(18 + 7));
//! ```

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Maximum partition key length, in Unicode characters.
pub const MAX_PARTITION_KEY_CHARS: usize = 256;

/// Payload conversion failure. Aborts the whole submission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Unable to transform event data into bytes: unsupported payload shape ({0})")]
    UnsupportedShape(&'static str),
    #[error("Unable to transform event data into bytes: text is not valid {encoding}: {reason}")]
    InvalidText {
        encoding: TextEncoding,
        reason: String,
    },
    #[error("unknown text encoding '{0}'")]
    UnknownEncoding(String),
}

/// Text encoding applied to [`EventData::Text`] payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    #[default]
    #[serde(alias = "utf-8")]
    Utf8,
    #[serde(alias = "utf-16le", alias = "ucs2")]
    Utf16le,
    #[serde(alias = "binary")]
    Latin1,
    Ascii,
    Hex,
    Base64,
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utf8 => write!(f, "utf8"),
            Self::Utf16le => write!(f, "utf16le"),
            Self::Latin1 => write!(f, "latin1"),
            Self::Ascii => write!(f, "ascii"),
            Self::Hex => write!(f, "hex"),
            Self::Base64 => write!(f, "base64"),
        }
    }
}

impl FromStr for TextEncoding {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Self::Utf8),
            "utf16le" | "utf-16le" | "ucs2" => Ok(Self::Utf16le),
            "latin1" | "binary" => Ok(Self::Latin1),
            "ascii" => Ok(Self::Ascii),
            "hex" => Ok(Self::Hex),
            "base64" => Ok(Self::Base64),
            other => Err(ConversionError::UnknownEncoding(other.to_string())),
        }
    }
}

impl TextEncoding {
    /// Encode text into bytes, failing if the text cannot be represented.
    pub fn encode(self, text: &str) -> Result<Vec<u8>, ConversionError> {
        let invalid = |reason: String| ConversionError::InvalidText {
            encoding: self,
            reason,
        };
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Utf16le => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            Self::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).map_err(|_| invalid(format!("'{c}' is outside latin1"))))
                .collect(),
            Self::Ascii => {
                if let Some(c) = text.chars().find(|c| !c.is_ascii()) {
                    return Err(invalid(format!("'{c}' is not ascii")));
                }
                Ok(text.as_bytes().to_vec())
            }
            Self::Hex => hex::decode(text).map_err(|e| invalid(e.to_string())),
            Self::Base64 => base64::engine::general_purpose::STANDARD
                .decode(text)
                .map_err(|e| invalid(e.to_string())),
        }
    }
}

/// Payload of an [`Event`] as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    /// Already-binary payload, sent as-is.
    Binary(Vec<u8>),
    /// Textual payload, encoded with the submission's [`TextEncoding`].
    Text(String),
    /// Structured value that was never serialized. Cannot be sent.
    Structured(Value),
}

impl From<Vec<u8>> for EventData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for EventData {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

impl From<String> for EventData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for EventData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// A caller-supplied event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Determines the shard the record lands on.
    pub partition_key: String,
    pub data: EventData,
}

impl Event {
    pub fn new(partition_key: impl Into<String>, data: impl Into<EventData>) -> Self {
        Self {
            partition_key: partition_key.into(),
            data: data.into(),
        }
    }

    pub fn text(partition_key: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(partition_key, EventData::Text(text.into()))
    }

    pub fn binary(partition_key: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(partition_key, EventData::Binary(bytes.into()))
    }
}

/// Convert an event payload into the bytes that go on the wire.
pub fn get_data_bytes(data: EventData, encoding: TextEncoding) -> Result<Vec<u8>, ConversionError> {
    match data {
        EventData::Binary(bytes) => Ok(bytes),
        EventData::Text(text) => encoding.encode(&text),
        EventData::Structured(value) => Err(ConversionError::UnsupportedShape(shape_name(&value))),
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "unencoded string value",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Stable content hash of a record (partition key + payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(partition_key: &str, payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        // Length prefix keeps ("ab", "c") and ("a", "bc") apart
        hasher.update((partition_key.len() as u64).to_be_bytes());
        hasher.update(partition_key.as_bytes());
        hasher.update(payload);
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// A record ready for batching: payload bytes plus partition key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub partition_key: String,
    pub data: Vec<u8>,
    fingerprint: Fingerprint,
    /// Copies of identical content seen before this one in the same submission
    occurrence: u32,
}

impl Record {
    pub fn new(partition_key: impl Into<String>, data: Vec<u8>) -> Self {
        let partition_key = partition_key.into();
        let fingerprint = Fingerprint::of(&partition_key, &data);
        Self {
            partition_key,
            data,
            fingerprint,
            occurrence: 0,
        }
    }

    /// Mark this as the `occurrence`-th copy of its content in a submission.
    #[must_use]
    pub fn with_occurrence(mut self, occurrence: u32) -> Self {
        self.occurrence = occurrence;
        self
    }

    /// Convert an event, encoding text payloads with `encoding`.
    pub fn from_event(event: Event, encoding: TextEncoding) -> Result<Self, ConversionError> {
        let data = get_data_bytes(event.data, encoding)?;
        Ok(Self::new(event.partition_key, data))
    }

    /// Payload bytes plus partition key bytes.
    ///
    /// `None` only if the sum overflows `usize`. Two in-memory buffers cannot
    /// get there, so in practice this is always `Some`; the accumulator still
    /// maps `None` to [`AdmitError::Unmeasurable`].
    ///
    /// [`AdmitError::Unmeasurable`]: crate::batching::accumulator::AdmitError::Unmeasurable
    #[must_use]
    pub fn size_bytes(&self) -> Option<usize> {
        self.data.len().checked_add(self.partition_key.len())
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Identity of this record within one submission: content hash plus
    /// which copy of that content it is.
    #[must_use]
    pub fn identity(&self) -> (Fingerprint, u32) {
        (self.fingerprint, self.occurrence)
    }

    /// Whether the partition key is 1 to 256 Unicode characters long.
    #[must_use]
    pub fn has_valid_partition_key(&self) -> bool {
        let chars = self.partition_key.chars().count();
        (1..=MAX_PARTITION_KEY_CHARS).contains(&chars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binary_passes_through() {
        let bytes = get_data_bytes(EventData::Binary(vec![0, 159, 255]), TextEncoding::Utf8).unwrap();
        assert_eq!(bytes, vec![0, 159, 255]);
    }

    #[test]
    fn test_text_defaults_to_utf8() {
        let bytes = get_data_bytes("héllo".into(), TextEncoding::default()).unwrap();
        assert_eq!(bytes, "héllo".as_bytes());
    }

    #[test]
    fn test_structured_payload_rejected() {
        let err = get_data_bytes(EventData::Structured(json!({"Ben": "Is Awesome!"})), TextEncoding::Utf8)
            .unwrap_err();
        assert_eq!(err, ConversionError::UnsupportedShape("object"));
        assert!(err.to_string().starts_with("Unable to transform event data into bytes"));
    }

    #[test]
    fn test_alternate_encodings() {
        assert_eq!(TextEncoding::Utf16le.encode("hi").unwrap(), vec![b'h', 0, b'i', 0]);
        assert_eq!(TextEncoding::Latin1.encode("é").unwrap(), vec![0xE9]);
        assert_eq!(TextEncoding::Hex.encode("0aff").unwrap(), vec![0x0A, 0xFF]);
        assert_eq!(TextEncoding::Base64.encode("aGk=").unwrap(), b"hi".to_vec());
    }

    #[test]
    fn test_unrepresentable_text_rejected() {
        assert!(TextEncoding::Ascii.encode("é").is_err());
        assert!(TextEncoding::Latin1.encode("€").is_err());
        assert!(TextEncoding::Hex.encode("xyz").is_err());
    }

    #[test]
    fn test_encoding_names() {
        assert_eq!("UTF-8".parse::<TextEncoding>().unwrap(), TextEncoding::Utf8);
        assert_eq!("binary".parse::<TextEncoding>().unwrap(), TextEncoding::Latin1);
        assert!("ebcdic".parse::<TextEncoding>().is_err());

        let parsed: TextEncoding = serde_json::from_value(json!("utf-8")).unwrap();
        assert_eq!(parsed, TextEncoding::Utf8);
    }

    #[test]
    fn test_size_is_payload_plus_key() {
        let record = Record::new("1", vec![0u8; 10]);
        assert_eq!(record.size_bytes(), Some(11));
    }

    #[test]
    fn test_partition_key_bounds() {
        assert!(!Record::new("", vec![]).has_valid_partition_key());
        assert!(Record::new("k", vec![]).has_valid_partition_key());
        // 256 multi-byte chars is still within the character limit
        assert!(Record::new("é".repeat(256), vec![]).has_valid_partition_key());
        assert!(!Record::new("a".repeat(257), vec![]).has_valid_partition_key());
    }

    #[test]
    fn test_fingerprint_is_stable_and_separates_fields() {
        let a = Record::new("ab", b"c".to_vec());
        let b = Record::new("a", b"bc".to_vec());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), Record::new("ab", b"c".to_vec()).fingerprint());
        assert_eq!(a.fingerprint().to_string().len(), 16);
    }

    #[test]
    fn test_identity_separates_copies_of_same_content() {
        let first = Record::new("k", b"same".to_vec());
        let second = first.clone().with_occurrence(1);
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_ne!(first.identity(), second.identity());
        assert_eq!(first.identity().1, 0);
    }
}
