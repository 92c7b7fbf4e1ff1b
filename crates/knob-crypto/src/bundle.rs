//! Metadata bundle format
//!
//! The bundle travels next to the ciphertext and carries everything a reader
//! needs besides the keys:
//! - metaFK (AONT binding of the file key)
//! - metaIndex (super-block index encrypted under SK)
//! - metaSGX (SK wrapped for the custodian)
//!
//! Binary fields are base64 in the JSON encoding.

use serde::{Deserialize, Serialize};

use crate::aont::MetaFk;
use crate::error::{CryptoError, CryptoResult};
use crate::format::FormatVersion;

/// Current bundle encoding version
pub const BUNDLE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataBundle {
    /// Bundle encoding version
    pub version: u32,
    /// Container format of the ciphertext this bundle belongs to
    pub format: FormatVersion,
    #[serde(with = "b64_key")]
    pub meta_fk: MetaFk,
    #[serde(with = "b64")]
    pub meta_index: Vec<u8>,
    #[serde(with = "b64")]
    pub meta_sgx: Vec<u8>,
}

impl MetadataBundle {
    pub fn new(format: FormatVersion, meta_fk: MetaFk, meta_index: Vec<u8>, meta_sgx: Vec<u8>) -> Self {
        Self {
            version: BUNDLE_VERSION,
            format,
            meta_fk,
            meta_index,
            meta_sgx,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| CryptoError::Bundle(format!("serialization: {e}")))
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        let bundle: Self = serde_json::from_slice(data)
            .map_err(|e| CryptoError::Bundle(format!("deserialization: {e}")))?;
        if bundle.version != BUNDLE_VERSION {
            return Err(CryptoError::Bundle(format!(
                "unsupported bundle version {}",
                bundle.version
            )));
        }
        Ok(bundle)
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(s.as_bytes())
            .map_err(|e| serde::de::Error::custom(format!("base64 decode: {e}")))
    }
}

mod b64_key {
    use serde::{Deserializer, Serializer};

    use crate::KEY_SIZE;

    pub fn serialize<S: Serializer>(data: &[u8; KEY_SIZE], serializer: S) -> Result<S::Ok, S::Error> {
        super::b64::serialize(data, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; KEY_SIZE], D::Error> {
        let bytes = super::b64::deserialize(deserializer)?;
        <[u8; KEY_SIZE]>::try_from(bytes.as_slice()).map_err(|_| {
            serde::de::Error::custom(format!(
                "metaFK must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetadataBundle {
        MetadataBundle::new(FormatVersion::V2, [7u8; 32], vec![1, 2, 3, 4], vec![9u8; 128])
    }

    #[test]
    fn test_bundle_roundtrip() {
        let bundle = sample();
        let bytes = bundle.to_bytes().unwrap();
        let restored = MetadataBundle::from_bytes(&bytes).unwrap();
        assert_eq!(restored, bundle);
        assert_eq!(restored.version, 1);
    }

    #[test]
    fn test_bundle_fields_are_base64() {
        let json: serde_json::Value = serde_json::from_slice(&sample().to_bytes().unwrap()).unwrap();
        assert_eq!(json["meta_index"], "AQIDBA==");
        assert_eq!(json["format"], "v2");
    }

    #[test]
    fn test_bundle_rejects_short_meta_fk() {
        let json = r#"{"version":1,"format":"v1","meta_fk":"AAAA","meta_index":"","meta_sgx":""}"#;
        assert!(matches!(
            MetadataBundle::from_bytes(json.as_bytes()),
            Err(CryptoError::Bundle(_))
        ));
    }

    #[test]
    fn test_bundle_rejects_unknown_version() {
        let mut bundle = sample();
        bundle.version = 7;
        let bytes = serde_json::to_vec(&bundle).unwrap();
        assert!(MetadataBundle::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_bundle_rejects_garbage() {
        assert!(MetadataBundle::from_bytes(b"not json").is_err());
    }
}
