//! Payloads exchanged through the broker.
//!
//! Every payload is JSON. Decoding is strict about shape (unknown control
//! commands, missing urls and wrong types are rejected) so that callers can
//! drop bad messages instead of acting on half-parsed data.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::util::epoch_seconds;

/// A URL waiting to be explored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierItem {
    pub url: String,
    #[serde(default)]
    pub html: Option<String>,
}

impl FrontierItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: None,
        }
    }
}

/// A fetched page waiting for title extraction. `html` is absent when the
/// fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploitItem {
    pub url: String,
    #[serde(default)]
    pub html: Option<String>,
}

/// One extracted page, as appended to the result stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub url: String,
    pub title: String,
    /// Seconds since the Unix epoch, as a decimal string.
    pub timestamp: String,
    pub worker_id: String,
}

impl ResultRecord {
    pub fn now(url: impl Into<String>, title: impl Into<String>, worker_id: &str) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            timestamp: format!("{:.6}", epoch_seconds()),
            worker_id: worker_id.to_string(),
        }
    }
}

/// Readiness acknowledgment pushed by a worker node after spawning its pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerAck {
    pub status: String,
    pub num_workers: u32,
    pub timestamp: f64,
}

impl WorkerAck {
    pub const READY: &'static str = "ready";
    /// Sent once a node's pool has fully exited after a stop.
    pub const STOPPED: &'static str = "stopped";

    pub fn ready(num_workers: u32) -> Self {
        Self::with_status(Self::READY, num_workers)
    }

    pub fn stopped(num_workers: u32) -> Self {
        Self::with_status(Self::STOPPED, num_workers)
    }

    fn with_status(status: &str, num_workers: u32) -> Self {
        Self {
            status: status.to_string(),
            num_workers,
            timestamp: epoch_seconds(),
        }
    }
}

/// Command published on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ControlMessage {
    Start,
    /// `drain: true` asks nodes to let workers finish on their own (deadline
    /// stop); otherwise nodes terminate their pools after a grace period.
    Stop {
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        drain: bool,
    },
}

impl ControlMessage {
    pub fn decode(raw: &str) -> Result<Self, AppError> {
        decode(raw)
    }

    pub fn encode(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decode a broker payload, reporting shape problems as protocol errors.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, AppError> {
    serde_json::from_str(raw).map_err(|e| AppError::ProtocolError(format!("{e}: {raw:.120}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_wire_format() {
        assert_eq!(
            ControlMessage::Start.encode().unwrap(),
            r#"{"command":"start"}"#
        );
        assert_eq!(
            ControlMessage::Stop { drain: false }.encode().unwrap(),
            r#"{"command":"stop"}"#
        );
        assert_eq!(
            ControlMessage::Stop { drain: true }.encode().unwrap(),
            r#"{"command":"stop","drain":true}"#
        );
    }

    #[test]
    fn test_control_decode() {
        assert_eq!(
            ControlMessage::decode(r#"{"command": "start"}"#).unwrap(),
            ControlMessage::Start
        );
        assert_eq!(
            ControlMessage::decode(r#"{"command": "stop"}"#).unwrap(),
            ControlMessage::Stop { drain: false }
        );
    }

    #[test]
    fn test_control_rejects_unknown_shapes() {
        for raw in [
            r#"{"command": "pause"}"#,
            r#"{"cmd": "start"}"#,
            r#"start"#,
            r#"{"command": 1}"#,
        ] {
            assert!(
                matches!(ControlMessage::decode(raw), Err(AppError::ProtocolError(_))),
                "accepted {raw}"
            );
        }
    }

    #[test]
    fn test_frontier_item_serializes_null_html() {
        let json = serde_json::to_string(&FrontierItem::new("https://a.com/")).unwrap();
        assert_eq!(json, r#"{"url":"https://a.com/","html":null}"#);
    }

    #[test]
    fn test_queue_item_requires_url() {
        assert!(decode::<ExploitItem>(r#"{"html": "<p>x</p>"}"#).is_err());
        let item: ExploitItem = decode(r#"{"url": "https://a.com/"}"#).unwrap();
        assert!(item.html.is_none());
    }

    #[test]
    fn test_ack_ready() {
        let ack = WorkerAck::ready(4);
        assert_eq!(ack.status, "ready");
        assert_eq!(ack.num_workers, 4);
        assert!(ack.timestamp > 0.0);
    }

    #[test]
    fn test_ack_stopped() {
        let ack = WorkerAck::stopped(2);
        assert_eq!(ack.status, "stopped");
        assert_eq!(ack.num_workers, 2);
    }
}
