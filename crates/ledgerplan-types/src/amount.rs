//! Serde helpers for `u128` amounts.
//!
//! Amounts (wei values, fees) are written as decimal strings. Internally
//! tagged enums buffer their content and cannot carry 128-bit integers, so
//! every `u128` that ends up in a journal message goes through here.
//! Plain JSON numbers are still accepted when reading.

use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum AmountRepr {
    Text(String),
    Number(u64),
}

fn parse(repr: AmountRepr) -> Result<u128, String> {
    match repr {
        AmountRepr::Number(n) => Ok(n as u128),
        AmountRepr::Text(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x") {
                u128::from_str_radix(hex, 16).map_err(|e| format!("invalid amount {}: {}", s, e))
            } else {
                s.parse::<u128>()
                    .map_err(|e| format!("invalid amount {}: {}", s, e))
            }
        }
    }
}

pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
    parse(AmountRepr::deserialize(deserializer)?).map_err(serde::de::Error::custom)
}

/// Same encoding for `Option<u128>`.
pub mod option {
    use super::{parse, AmountRepr};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u128>, D::Error> {
        match Option::<AmountRepr>::deserialize(deserializer)? {
            Some(repr) => parse(repr).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
