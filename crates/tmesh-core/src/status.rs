//! Status lines
//!
//! One JSON object per processed or sent frame:
//!
//! ```text
//! {"device_id":5,"type":"t","value":21.5,"forwarded_via":[7,9],"action_taken":"forward"}
//! ```
//!
//! This is the node's observable record of every relay decision and is
//! what the scenario tests assert against.

use crate::mesh::frame::Frame;
use crate::mesh::validate::{RejectClass, RejectReason};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;

/// Action taken on a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Own reading transmitted
    Sent,
    /// Relayed with this node's id appended
    Forward,
    /// Dropped by flood control
    RejectSeenRecently,
    /// Dropped because it is our own reading coming back
    RejectOwnId,
    /// Dropped as undecryptable or garbled
    DecryptOrGarbage,
    /// Dropped as semantically invalid
    ValidationReject,
}

impl Action {
    /// Wire name used in status lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Sent => "sent",
            Action::Forward => "forward",
            Action::RejectSeenRecently => "reject_seen_recently",
            Action::RejectOwnId => "reject_own_id",
            Action::DecryptOrGarbage => "decrypt_or_garbage",
            Action::ValidationReject => "validation_reject",
        }
    }
}

impl From<RejectReason> for Action {
    fn from(reason: RejectReason) -> Self {
        match reason.class() {
            RejectClass::DecryptOrGarbage => Action::DecryptOrGarbage,
            RejectClass::ValidationReject => Action::ValidationReject,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusLine {
    /// Origin id (0 when invalid)
    pub device_id: u8,
    /// Message type character
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Payload value
    pub value: f32,
    /// Relay ids in hop order
    pub forwarded_via: Vec<u8>,
    /// What this node did with the frame
    pub action_taken: Action,
}

impl StatusLine {
    /// Project a frame and its outcome into a status record
    pub fn new(frame: &Frame, action: Action) -> Self {
        Self {
            device_id: frame.origin_id().get(),
            msg_type: frame.msg_type().as_char().to_string(),
            value: frame.value(),
            forwarded_via: frame.forwarded_via(),
            action_taken: action,
        }
    }

    /// Serialize as a single JSON line
    pub fn to_json(&self) -> String {
        // A struct of plain fields always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Consumer of status lines
pub trait StatusSink {
    /// Accept one status line
    fn emit(&mut self, line: &StatusLine);
}

/// Collects status lines in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Vec<StatusLine>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines collected so far
    pub fn lines(&self) -> &[StatusLine] {
        &self.lines
    }

    /// Take all collected lines
    pub fn drain(&mut self) -> Vec<StatusLine> {
        std::mem::take(&mut self.lines)
    }
}

impl StatusSink for MemorySink {
    fn emit(&mut self, line: &StatusLine) {
        self.lines.push(line.clone());
    }
}

/// Writes each status line as JSON followed by a newline
#[derive(Debug)]
pub struct JsonLineSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLineSink<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Unwrap the writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> StatusSink for JsonLineSink<W> {
    fn emit(&mut self, line: &StatusLine) {
        if let Err(e) = writeln!(self.writer, "{}", line.to_json()) {
            tracing::warn!("status line write failed: {}", e);
        }
    }
}

/// Discards status lines
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn emit(&mut self, _line: &StatusLine) {}
}
