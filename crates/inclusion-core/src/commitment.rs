//! Identity commitment and outbound request types

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Recipient, Result};

/// Decoded size of an identity commitment
pub const COMMITMENT_BYTES: usize = 32;

/// A validated `0x`-prefixed 32-byte hex scalar.
///
/// The original text is kept so the wire payload reproduces the user's
/// casing exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityCommitment {
    text: String,
    bytes: [u8; COMMITMENT_BYTES],
}

impl IdentityCommitment {
    /// Parse a commitment string, requiring `^0x[0-9a-fA-F]{64}$`
    pub fn parse(text: &str) -> Result<Self> {
        let digits = text.strip_prefix("0x").ok_or(Error::Validation)?;
        if digits.len() != COMMITMENT_BYTES * 2 {
            return Err(Error::Validation);
        }

        let mut bytes = [0u8; COMMITMENT_BYTES];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| Error::Validation)?;

        Ok(Self {
            text: text.to_string(),
            bytes,
        })
    }

    /// The commitment exactly as it will appear on the wire
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8; COMMITMENT_BYTES] {
        &self.bytes
    }
}

impl fmt::Display for IdentityCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for IdentityCommitment {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for IdentityCommitment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        IdentityCommitment::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// One outbound query
#[derive(Debug, Clone)]
pub struct Request {
    pub commitment: IdentityCommitment,
    pub recipient: Recipient,
    pub submitted_at: SystemTime,
}

impl Request {
    pub fn new(commitment: IdentityCommitment, recipient: Recipient) -> Self {
        Self {
            commitment,
            recipient,
            submitted_at: SystemTime::now(),
        }
    }
}
