//! Client configuration

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::constants::{
    COMMAND_TAG, DEFAULT_FOLLOWER_TIMEOUT_MS, DEFAULT_NETWORK_WAIT_MS, DEFAULT_RECIPIENT_ID,
    DEFAULT_RECIPIENT_PUBLIC_KEY, DEFAULT_ROUND_DASHBOARD_URL,
};
use crate::{Error, Result};

/// Transport addressing for the responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: Vec<u8>,
    pub public_key: Vec<u8>,
}

/// Configuration shared by the client and its transport.
///
/// Missing fields fall back to the deployed responder's values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Recipient address, base64
    pub recipient_id: String,
    /// Recipient public key, base64
    pub recipient_public_key: String,
    /// Literal prefix of every payload
    pub command_tag: String,
    /// Base URL for round-tracking links
    pub round_dashboard_url: String,
    /// How long the transport waits for the network to become healthy before a send
    pub network_follower_timeout_ms: u64,
    /// How long a caller waits for the request to finish
    pub network_wait_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            recipient_id: DEFAULT_RECIPIENT_ID.to_string(),
            recipient_public_key: DEFAULT_RECIPIENT_PUBLIC_KEY.to_string(),
            command_tag: COMMAND_TAG.to_string(),
            round_dashboard_url: DEFAULT_ROUND_DASHBOARD_URL.to_string(),
            network_follower_timeout_ms: DEFAULT_FOLLOWER_TIMEOUT_MS,
            network_wait_timeout_ms: DEFAULT_NETWORK_WAIT_MS,
        }
    }
}

impl ClientConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can address a responder
    pub fn validate(&self) -> Result<()> {
        if self.command_tag.is_empty() {
            return Err(Error::Config("command_tag must not be empty".into()));
        }
        self.recipient().map(|_| ())
    }

    /// Decode the base64 recipient values
    pub fn recipient(&self) -> Result<Recipient> {
        Ok(Recipient {
            address: decode_field("recipient_id", &self.recipient_id)?,
            public_key: decode_field("recipient_public_key", &self.recipient_public_key)?,
        })
    }

    /// Round-tracking URL for a round id
    pub fn round_url(&self, round_id: &str) -> String {
        format!("{}/{}", self.round_dashboard_url.trim_end_matches('/'), round_id)
    }
}

fn decode_field(field: &str, value: &str) -> Result<Vec<u8>> {
    let bytes = BASE64
        .decode(value.trim())
        .map_err(|e| Error::Config(format!("{} is not valid base64: {}", field, e)))?;
    if bytes.is_empty() {
        return Err(Error::Config(format!("{} must not be empty", field)));
    }
    Ok(bytes)
}
