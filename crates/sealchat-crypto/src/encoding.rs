//! Binary-to-text boundaries: standard padded base64 and strict UTF-8.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{CryptoError, CryptoResult};

pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn from_base64(text: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| CryptoError::Encoding(format!("invalid base64: {e}")))
}

/// Decode base64 into a fixed-size array, rejecting any other length.
pub fn from_base64_array<const N: usize>(text: &str, what: &'static str) -> CryptoResult<[u8; N]> {
    let bytes = from_base64(text)?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| CryptoError::InvalidLength {
        what,
        expected: N,
        actual: bytes.len(),
    })
}

pub fn to_utf8_bytes(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

pub fn from_utf8(bytes: Vec<u8>) -> CryptoResult<String> {
    String::from_utf8(bytes).map_err(|e| CryptoError::Encoding(format!("invalid UTF-8: {e}")))
}

/// `#[serde(with = "base64_bytes")]` for `Vec<u8>` fields carried as base64 strings.
pub mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_base64(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::from_base64(&text).map_err(serde::de::Error::custom)
    }
}

/// Implements base64 `Serialize`/`Deserialize` for a fixed-size byte newtype.
macro_rules! base64_newtype_serde {
    ($ty:ty, $len:expr, $what:literal) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&$crate::encoding::to_base64(self.as_bytes()))
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = <String as serde::Deserialize>::deserialize(deserializer)?;
                $crate::encoding::from_base64_array::<$len>(&text, $what)
                    .map(Self::from_bytes)
                    .map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use base64_newtype_serde;
