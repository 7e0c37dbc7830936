//! Shared hex, serde and borsh encodings for the fixed-width key types.
//!
//! Each type provides `to_bytes() -> [u8; N]` and
//! `from_bytes(&[u8]) -> Result<Self, CryptoError>`; the macro derives the
//! rest from those two so every encoding goes through the same validation.

use crate::error::CryptoError;

/// `0x` + lowercase hex.
pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode a `0x`-prefixed hex string.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, CryptoError> {
    let body = s.strip_prefix("0x").ok_or(CryptoError::MissingHexPrefix)?;
    hex::decode(body).map_err(|e| CryptoError::InvalidHex(e.to_string()))
}

macro_rules! impl_wire_encoding {
    ($ty:ident, $len:expr) => {
        impl $ty {
            /// Canonical `0x`-prefixed hex form.
            pub fn to_hex(&self) -> String {
                $crate::codec::encode_hex(&self.to_bytes())
            }

            pub fn from_hex(s: &str) -> Result<Self, $crate::error::CryptoError> {
                let bytes = $crate::codec::decode_hex(s)?;
                Self::from_bytes(&bytes)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = $crate::error::CryptoError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }

        impl borsh::BorshSerialize for $ty {
            fn serialize<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
                writer.write_all(&self.to_bytes())
            }
        }

        impl borsh::BorshDeserialize for $ty {
            fn deserialize_reader<R: std::io::Read>(reader: &mut R) -> std::io::Result<Self> {
                let mut buf = [0u8; $len];
                reader.read_exact(&mut buf)?;
                Self::from_bytes(&buf)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            }
        }
    };
}

pub(crate) use impl_wire_encoding;
