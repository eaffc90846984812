//! Wire messages exchanged with validators.
//!
//! Newline-delimited JSON, adjacently tagged: `{"type": ...,
//! "data": ...}` with camelCase field names. Both unions are closed;
//! an unrecognized `type` is a protocol error, not a soft skip.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::models::TickTimings;

/// Validator -> hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum IncomingMessage {
    Signup(SignupRequest),
    Validate(ValidateReply),
    Heartbeat,
}

/// Hub -> validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum OutgoingMessage {
    Signup(SignupAck),
    Validate(ValidateRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub callback_id: Uuid,
    /// Base58 Ed25519 public key, the validator's stable identity.
    pub public_key: String,
    /// Detached signature over the canonical signup string, encoded
    /// as a JSON array of signature bytes.
    pub signed_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignupAck {
    pub validator_id: Uuid,
    pub callback_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub url: String,
    pub callback_id: Uuid,
    pub website_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidateReply {
    pub callback_id: Uuid,
    pub website_id: Uuid,
    pub validator_id: Uuid,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub name_lookup: Option<u64>,
    #[serde(default)]
    pub connection: Option<u64>,
    #[serde(default)]
    pub tls_handshake: Option<u64>,
    #[serde(default)]
    pub ttfb: Option<u64>,
    #[serde(default)]
    pub data_transfer: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    /// Detached signature over the canonical reply string.
    pub signed_message: String,
}

impl ValidateReply {
    /// The reply's error, treating an empty string as no error.
    pub fn error_text(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }

    /// Timing breakdown, present only for probes that completed far
    /// enough to measure a total.
    pub fn timings(&self) -> Option<TickTimings> {
        self.total.map(|total_ms| TickTimings {
            name_lookup_ms: self.name_lookup.unwrap_or(0),
            connection_ms: self.connection.unwrap_or(0),
            tls_handshake_ms: self.tls_handshake.unwrap_or(0),
            ttfb_ms: self.ttfb.unwrap_or(0),
            data_transfer_ms: self.data_transfer.unwrap_or(0),
            total_ms,
        })
    }
}
