//! Versioned wrapper around stored values.
//!
//! Current layout: `{"version": 1, "data": ...}`. A bare JSON array is the
//! unversioned layout written by earlier clients and reads as version 0.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{CacheError, CacheResult};

/// Format version written by this build.
pub const STORAGE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct Envelope<'a, T> {
    version: u32,
    data: &'a T,
}

/// Serializes `value` inside the current envelope.
///
/// # Errors
/// Returns [`CacheError::Encode`] if `value` cannot be serialized.
pub fn encode<T: Serialize>(key: &str, value: &T) -> CacheResult<String> {
    serde_json::to_string(&Envelope {
        version: STORAGE_FORMAT_VERSION,
        data: value,
    })
    .map_err(|source| CacheError::Encode {
        key: key.to_string(),
        source,
    })
}

/// A decoded payload and the format version it was stored with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded<T> {
    pub version: u32,
    pub data: T,
}

/// Parses a stored value, accepting the current and the legacy layout.
///
/// # Errors
/// Returns [`CacheError::UnsupportedVersion`] for values written by a newer
/// build and [`CacheError::Corrupt`] for anything unparseable.
pub fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> CacheResult<Decoded<T>> {
    let corrupt = |reason: String| CacheError::Corrupt {
        key: key.to_string(),
        reason,
    };

    let value: Value = serde_json::from_str(raw).map_err(|err| corrupt(err.to_string()))?;
    let (version, data) = match value {
        Value::Array(_) => (0, value),
        Value::Object(mut object) => {
            let version = object
                .get("version")
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| corrupt("missing or invalid version tag".to_string()))?;
            if version > STORAGE_FORMAT_VERSION {
                return Err(CacheError::UnsupportedVersion {
                    key: key.to_string(),
                    found: version,
                    supported: STORAGE_FORMAT_VERSION,
                });
            }
            let data = object
                .remove("data")
                .ok_or_else(|| corrupt("envelope has no data".to_string()))?;
            (version, data)
        }
        other => return Err(corrupt(format!("unexpected top-level value: {other}"))),
    };

    let data = serde_json::from_value(data).map_err(|err| corrupt(err.to_string()))?;
    Ok(Decoded { version, data })
}
