use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::PluginError;

// ════════════════════════════════════════════════════════════════
//  RawLine
// ════════════════════════════════════════════════════════════════

/// One unit of input as produced by a line supplier.
///
/// The bytes carry no guaranteed structure; the line terminator is already
/// stripped. `line_no` is 1-based and counts every line the supplier framed,
/// including empty and malformed ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawLine {
    pub line_no: u64,
    pub bytes: Vec<u8>,
}

impl RawLine {
    pub fn new(line_no: u64, bytes: impl Into<Vec<u8>>) -> Self {
        Self { line_no, bytes: bytes.into() }
    }

    pub fn is_blank(&self) -> bool {
        self.bytes.iter().all(|b| b.is_ascii_whitespace())
    }
}

// ════════════════════════════════════════════════════════════════
//  LogRecord
// ════════════════════════════════════════════════════════════════

/// A validated, structured log entry (field name → value).
///
/// Only parsers construct these, so a `LogRecord` always stands for a line
/// that parsed successfully.
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    /// Line number of the source line, kept for failure correlation.
    pub line_no: u64,
    pub fields: serde_json::Map<String, serde_json::Value>,
    /// Per-message timestamp override (Unix ms). `None` = broker assigns.
    pub timestamp_ms: Option<i64>,
}

impl LogRecord {
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }

    /// Canonical wire form: compact JSON, object keys sorted at every level.
    ///
    /// Independent of the `serde_json` map implementation, so the same record
    /// always serializes to the same bytes.
    pub fn to_payload(&self) -> Result<Vec<u8>, PluginError> {
        let sorted: BTreeMap<&str, Canonical<'_>> = self
            .fields
            .iter()
            .map(|(k, v)| (k.as_str(), Canonical(v)))
            .collect();
        Ok(serde_json::to_vec(&sorted)?)
    }
}

/// Serializes a JSON value with object keys in sorted order.
struct Canonical<'a>(&'a serde_json::Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::{SerializeMap, SerializeSeq};
        match self.0 {
            serde_json::Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut m = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    m.serialize_entry(k, &Canonical(v))?;
                }
                m.end()
            }
            serde_json::Value::Array(items) => {
                let mut s = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    s.serialize_element(&Canonical(item))?;
                }
                s.end()
            }
            other => other.serialize(serializer),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Outbound message
// ════════════════════════════════════════════════════════════════

/// What the broker client transmits. Messages carry no key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Arc<[u8]>,
    pub timestamp_ms: Option<i64>,
}

// ════════════════════════════════════════════════════════════════
//  PublishTicket
// ════════════════════════════════════════════════════════════════

/// Sequence number of a publish attempt. Assigned by the publisher,
/// strictly increasing within one run.
pub type TicketId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Pending,
    Acknowledged,
    Failed,
}

/// One in-flight publish attempt, owned by the delivery tracker from
/// registration until it reaches a terminal status.
#[derive(Clone, Debug)]
pub struct PublishTicket {
    pub id: TicketId,
    pub line_no: u64,
    pub topic: String,
    pub payload: Arc<[u8]>,
    pub status: TicketStatus,
    pub submitted_at: Instant,
}

impl PublishTicket {
    pub fn new(id: TicketId, line_no: u64, topic: impl Into<String>, payload: Arc<[u8]>) -> Self {
        Self {
            id,
            line_no,
            topic: topic.into(),
            payload,
            status: TicketStatus::Pending,
            submitted_at: Instant::now(),
        }
    }

    pub fn message(&self, timestamp_ms: Option<i64>) -> OutboundMessage {
        OutboundMessage {
            topic: self.topic.clone(),
            payload: self.payload.clone(),
            timestamp_ms,
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  DeliveryOutcome
// ════════════════════════════════════════════════════════════════

/// Classification of a negative acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The broker refused the message (too large, unknown topic, auth…).
    Rejected,
    /// The client gave up waiting for an acknowledgment.
    TimedOut,
    /// Connection-level failure while transmitting.
    Transport,
    /// The client shut down with the message still queued.
    Shutdown,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Rejected => f.write_str("rejected"),
            FailureKind::TimedOut => f.write_str("timed_out"),
            FailureKind::Transport => f.write_str("transport"),
            FailureKind::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Result of one ticket's resolution. Produced once per ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { topic: String, partition: i32, offset: i64 },
    Failed { kind: FailureKind, reason: String },
}

impl DeliveryOutcome {
    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        DeliveryOutcome::Failed { kind, reason: reason.into() }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> LogRecord {
        let serde_json::Value::Object(fields) = value else { panic!("object expected") };
        LogRecord { line_no: 1, fields, timestamp_ms: None }
    }

    #[test]
    fn payload_sorts_keys_at_every_level() {
        let r = record(json!({"b": 1, "a": {"z": true, "y": [ {"k2": 0, "k1": 1} ]}}));
        let payload = r.to_payload().unwrap();
        assert_eq!(
            std::str::from_utf8(&payload).unwrap(),
            r#"{"a":{"y":[{"k1":1,"k2":0}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn blank_line_detection() {
        assert!(RawLine::new(1, "").is_blank());
        assert!(RawLine::new(2, " \t").is_blank());
        assert!(!RawLine::new(3, "{}").is_blank());
    }
}
