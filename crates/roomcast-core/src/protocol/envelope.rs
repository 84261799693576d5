//! Client message envelope
//!
//! Every frame exchanged with a client is a JSON object of the form
//! `{ "event": string, "data": any, "ns"?: string }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name sent to a client whose frame could not be parsed
pub const ERROR_EVENT: &str = "error";

/// Application message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name
    pub event: String,

    /// Event payload
    #[serde(default)]
    pub data: Value,

    /// Namespace the message belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns: Option<String>,
}

impl Envelope {
    /// Create an envelope without namespace
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            ns: None,
        }
    }

    /// Attach a namespace
    #[must_use]
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.ns = Some(ns.into());
        self
    }

    /// Error envelope sent back for malformed frames
    #[must_use]
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(
            ERROR_EVENT,
            serde_json::json!({ "code": code, "message": message.into() }),
        )
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Borrowed form used when the same frame is encoded for many recipients
#[derive(Serialize)]
pub(crate) struct EnvelopeRef<'a> {
    pub event: &'a str,
    pub data: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ns: Option<&'a str>,
}

impl EnvelopeRef<'_> {
    pub(crate) fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
