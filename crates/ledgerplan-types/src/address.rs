//! Address, transaction hash and byte payload types.
//!
//! Ledger identifiers are fixed-size byte strings that show up in many textual
//! forms: with or without the `0x` prefix, upper or lower case. Everything in
//! this module parses leniently and always renders the canonical form
//! (`0x`-prefixed lowercase hex), so equality never depends on how a value was
//! typed by the user.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Error returned when a hex string cannot be parsed into a fixed-size value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexParseError {
    pub input: String,
    pub reason: String,
}

impl fmt::Display for HexParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid hex value {:?}: {}", self.input, self.reason)
    }
}

impl std::error::Error for HexParseError {}

fn strip_hex_prefix(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

fn decode_fixed<const N: usize>(input: &str) -> Result<[u8; N], HexParseError> {
    let raw = strip_hex_prefix(input);
    if raw.len() > N * 2 {
        return Err(HexParseError {
            input: input.to_string(),
            reason: format!("expected at most {} hex digits, got {}", N * 2, raw.len()),
        });
    }
    // Left-pad short forms ("0x1") to the full width.
    let padded = format!("{:0>width$}", raw, width = N * 2);
    let bytes = hex::decode(&padded).map_err(|e| HexParseError {
        input: input.to_string(),
        reason: e.to_string(),
    })?;
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

macro_rules! fixed_hex_type {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn from_hex(s: &str) -> Result<Self, HexParseError> {
                decode_fixed::<$len>(s).map(Self)
            }

            /// Build from a byte slice, using the trailing bytes when the slice is longer.
            pub fn from_slice(bytes: &[u8]) -> Self {
                let mut out = [0u8; $len];
                if bytes.len() >= $len {
                    out.copy_from_slice(&bytes[bytes.len() - $len..]);
                } else {
                    out[$len - bytes.len()..].copy_from_slice(bytes);
                }
                Self(out)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = HexParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_hex_type!(
    /// A 20-byte account or contract address.
    Address,
    20
);

fixed_hex_type!(
    /// A 32-byte transaction identifier.
    TxHash,
    32
);

/// Arbitrary-length byte payload (call data, return data), rendered as `0x` hex.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    pub fn from_hex(s: &str) -> Result<Self, HexParseError> {
        let raw = strip_hex_prefix(s);
        hex::decode(raw).map(Bytes).map_err(|e| HexParseError {
            input: s.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Bytes(v)
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes({})", self.to_hex())
    }
}

impl Serialize for Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Bytes::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
