//! # Push Wire Protocol
//!
//! Framed JSON messages over a single bidirectional channel (WebSocket text
//! frames). The control plane pushes full `config_snapshot` documents; the
//! data plane answers each one with `ack` or `nack`. Unknown inbound message
//! types are tolerated: they are surfaced as [`Inbound::Unknown`] for the
//! client to log and ignore. The data plane never sends `config_snapshot`.

use serde::{Deserialize, Serialize};

use super::errors::{ControlPlaneError, ControlPlaneResult};
use crate::config::ConfigDocument;

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A full configuration snapshot to validate and apply
    ConfigSnapshot(ConfigDocument),
    /// A message type this data plane does not understand
    Unknown(String),
}

/// Messages sent by the data plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataPlaneMessage {
    /// The named snapshot version validated and was published
    Ack { version: String },
    /// The named snapshot version was rejected
    Nack { version: String, error: String },
}

impl DataPlaneMessage {
    /// Serialize to a text frame body.
    pub fn to_json(&self) -> ControlPlaneResult<String> {
        serde_json::to_string(self).map_err(|e| ControlPlaneError::Send(e.to_string()))
    }
}

/// Decode one inbound text frame.
///
/// `config_snapshot` frames carry the same fields as the on-disk config
/// document, plus the `type` discriminant. A frame whose `type` is known
/// but whose document does not deserialize yields
/// [`ControlPlaneError::MalformedSnapshot`] with a best-effort version so
/// the caller can nack it.
pub fn parse_inbound(text: &str) -> ControlPlaneResult<Inbound> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ControlPlaneError::InvalidMessage(e.to_string()))?;

    let message_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| ControlPlaneError::InvalidMessage("missing 'type' field".to_string()))?
        .to_string();

    if message_type != "config_snapshot" {
        return Ok(Inbound::Unknown(message_type));
    }

    let version = value
        .get("version")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    match serde_json::from_value::<ConfigDocument>(value) {
        Ok(document) => Ok(Inbound::ConfigSnapshot(document)),
        Err(e) => Err(ControlPlaneError::MalformedSnapshot {
            version,
            reason: e.to_string(),
        }),
    }
}
