use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Image payload carried by a scan request.
///
/// On the wire this is either a JSON string (usually base64 text) or an
/// array of byte values. Strings are kept as their UTF-8 bytes; base64
/// decoding happens later, when the bytes are written to scratch storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageData(pub Vec<u8>);

impl ImageData {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for ImageData {
    fn from(bytes: Vec<u8>) -> Self {
        ImageData(bytes)
    }
}

impl From<&str> for ImageData {
    fn from(text: &str) -> Self {
        ImageData(text.as_bytes().to_vec())
    }
}

impl Serialize for ImageData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(&self.0) {
            Ok(text) => serializer.serialize_str(text),
            Err(_) => self.0.serialize(serializer),
        }
    }
}

struct ImageDataVisitor;

impl<'de> Visitor<'de> for ImageDataVisitor {
    type Value = ImageData;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a base64 string or an array of bytes")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<ImageData, E> {
        Ok(ImageData(value.as_bytes().to_vec()))
    }

    fn visit_bytes<E: de::Error>(self, value: &[u8]) -> Result<ImageData, E> {
        Ok(ImageData(value.to_vec()))
    }

    fn visit_unit<E: de::Error>(self) -> Result<ImageData, E> {
        Ok(ImageData::default())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ImageData, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(byte) = seq.next_element::<u8>()? {
            bytes.push(byte);
        }
        Ok(ImageData(bytes))
    }
}

impl<'de> Deserialize<'de> for ImageData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ImageDataVisitor)
    }
}

/// Incoming image scan request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub request_id: String,
    /// Base64 encoded or raw image bytes
    #[serde(default)]
    pub image_data: ImageData,
    /// Alternative to `image_data`: path readable by the service
    #[serde(default)]
    pub image_path: String,
}

/// Fields extracted from one identity document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdData {
    pub first_name: String,
    pub last_name: String,
    pub birth_date: String,
    /// National personal identification number
    #[serde(rename = "idnp")]
    pub id_number: String,
    pub raw_text: String,
    pub timestamp: DateTime<Utc>,
}

impl IdData {
    pub fn empty(raw_text: &str, timestamp: DateTime<Utc>) -> Self {
        IdData {
            first_name: String::new(),
            last_name: String::new(),
            birth_date: String::new(),
            id_number: String::new(),
            raw_text: raw_text.to_string(),
            timestamp,
        }
    }
}

/// Outbound result for one request. `data` is set iff `success`, `error` iff not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<IdData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanResponse {
    pub fn success(request_id: impl Into<String>, data: IdData) -> Self {
        ScanResponse {
            request_id: request_id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        ScanResponse {
            request_id: request_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
