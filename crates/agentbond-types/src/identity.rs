//! Identity types for AgentBond
//!
//! Accounts and keys are fixed-width byte strings rendered as `0x`-prefixed
//! lower-case hex. Deal ids are sequential integers.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

use crate::{MarketError, Result};

/// Macro to generate fixed-width hex identifier types with common implementations
macro_rules! define_hex_id {
    ($name:ident, $len:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Width of the identifier in bytes
            pub const LEN: usize = $len;

            /// The all-zero identifier
            pub const ZERO: Self = Self([0u8; $len]);

            /// Create from raw bytes
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Check whether every byte is zero
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            /// Parse from hex (with or without the `0x` prefix)
            pub fn parse(s: &str) -> Result<Self> {
                let raw = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(raw).map_err(|e| MarketError::InvalidIdentifier {
                    value: s.to_string(),
                    reason: e.to_string(),
                })?;
                let bytes: [u8; $len] =
                    bytes
                        .try_into()
                        .map_err(|_| MarketError::InvalidIdentifier {
                            value: s.to_string(),
                            reason: format!("expected {} bytes", $len),
                        })?;
                Ok(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = MarketError;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(de::Error::custom)
            }
        }
    };
}

define_hex_id!(Address, 20, "Account identity of a business, counterparty or agent");
define_hex_id!(SlashRequestId, 32, "Key of a slash request, derived from target and creation time");
define_hex_id!(ContentHash, 32, "Hash of the deliverable a deal pays for");

impl Address {
    /// Derive a deterministic address from a label
    ///
    /// Takes the last 20 bytes of Keccak-256 over the label, the same way an
    /// account address is cut from a public-key hash.
    pub fn from_label(label: &str) -> Self {
        let hash = Keccak256::digest(label.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        Self(bytes)
    }
}

impl ContentHash {
    /// Hash arbitrary content with Keccak-256
    pub fn of(content: &[u8]) -> Self {
        Self(Keccak256::digest(content).into())
    }
}

/// Identifier of a deal, assigned sequentially starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DealId(pub u64);

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deal_{}", self.0)
    }
}

/// Identifier of a transferable asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// The chain's native currency, used for agent stakes
    pub fn native() -> Self {
        Self("NATIVE".to_string())
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_and_parse() {
        let addr = Address::from_label("business");
        let s = addr.to_string();
        assert!(s.starts_with("0x"));
        assert_eq!(s.len(), 42);
        assert_eq!(Address::parse(&s).unwrap(), addr);
        assert_eq!(Address::parse(&s[2..]).unwrap(), addr);
    }

    #[test]
    fn test_labels_are_distinct() {
        assert_ne!(Address::from_label("validator"), Address::from_label("moderator"));
        assert_eq!(Address::from_label("validator"), Address::from_label("validator"));
    }

    #[test]
    fn test_parse_rejects_wrong_width() {
        let err = Address::parse("0xdeadbeef").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_IDENTIFIER");
        assert!(SlashRequestId::parse("0xzz").is_err());
    }

    #[test]
    fn test_serde_uses_hex() {
        let addr = Address::from_label("counterparty");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_zero_address() {
        assert!(Address::ZERO.is_zero());
        assert!(!Address::from_label("x").is_zero());
    }
}
