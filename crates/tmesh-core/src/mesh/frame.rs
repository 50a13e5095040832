//! Mesh frame types and byte layout
//!
//! Every reading travels the mesh as one fixed-width 18-byte frame. The
//! layout is encapsulated here; the rest of the crate only uses the typed
//! accessors.
//!
//! ## Frame Structure
//!
//! ```text
//! ┌──────────┬──────────┬──────────────┬──────────────────────┬────────────┐
//! │ Origin   │ Type     │ Value        │ Hop trace            │ Terminator │
//! │ (1B)     │ (1B)     │ (4B, f32 LE) │ (11B, 0 = empty)     │ (1B, = 0)  │
//! └──────────┴──────────┴──────────────┴──────────────────────┴────────────┘
//!   0          1          2..6           6..17                  17
//! ```
//!
//! The frame keeps its raw bytes so that a decoded buffer is reproduced
//! exactly, including bytes that later fail validation.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical frame length in bytes
pub const FRAME_LEN: usize = 18;

/// Number of relay slots in the hop trace
pub const HOP_SLOTS: usize = 11;

/// Sentinel value marking an upstream extraction failure
pub const FAILURE_VALUE: f32 = -999.0;

const ORIGIN_OFFSET: usize = 0;
const TYPE_OFFSET: usize = 1;
const VALUE_OFFSET: usize = 2;
const HOP_OFFSET: usize = 6;
const TERMINATOR_OFFSET: usize = 17;

/// Device identifier, 1..=99; 0 means unknown/invalid
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u8);

impl NodeId {
    /// Unknown/invalid id
    pub const UNKNOWN: NodeId = NodeId(0);

    /// Highest assignable id
    pub const MAX: u8 = 99;

    /// Create an id, `None` when outside 1..=99
    pub fn new(id: u8) -> Option<Self> {
        if (1..=Self::MAX).contains(&id) {
            Some(NodeId(id))
        } else {
            None
        }
    }

    /// Interpret a raw byte, mapping anything outside 1..=99 to `UNKNOWN`
    pub fn from_raw(byte: u8) -> Self {
        Self::new(byte).unwrap_or(Self::UNKNOWN)
    }

    /// Raw id value
    pub fn get(&self) -> u8 {
        self.0
    }

    /// Check if this is the unknown id
    pub fn is_unknown(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One-character message type tag
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgType(u8);

impl MsgType {
    /// Temperature reading
    pub const TEMPERATURE: MsgType = MsgType(b't');
    /// Humidity reading
    pub const HUMIDITY: MsgType = MsgType(b'h');
    /// Diagnostic
    pub const DIAGNOSTIC: MsgType = MsgType(b'd');
    /// Error code
    pub const ERROR: MsgType = MsgType(b'e');

    /// Create from a raw byte
    pub fn from_byte(byte: u8) -> Self {
        MsgType(byte)
    }

    /// Create from an ASCII character, `None` for non-ASCII
    pub fn from_char(c: char) -> Option<Self> {
        if c.is_ascii() {
            Some(MsgType(c as u8))
        } else {
            None
        }
    }

    /// Raw byte value
    pub fn as_byte(&self) -> u8 {
        self.0
    }

    /// Character form; bytes above 0x7f map to their Latin-1 code point
    pub fn as_char(&self) -> char {
        char::from(self.0)
    }

    /// Printable ASCII (32..=126)
    pub fn is_printable(&self) -> bool {
        (32..=126).contains(&self.0)
    }
}

impl fmt::Debug for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsgType({:?})", self.as_char())
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// An 18-byte logical mesh frame
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// Build a fresh frame: empty hop trace, zero terminator
    pub fn new(origin: NodeId, msg_type: MsgType, value: f32) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[ORIGIN_OFFSET] = origin.get();
        bytes[TYPE_OFFSET] = msg_type.as_byte();
        LittleEndian::write_f32(&mut bytes[VALUE_OFFSET..HOP_OFFSET], value);
        Frame(bytes)
    }

    /// Wrap raw frame bytes
    pub fn from_bytes(bytes: [u8; FRAME_LEN]) -> Self {
        Frame(bytes)
    }

    /// Copy out the raw frame bytes
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        self.0
    }

    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Originating device; `UNKNOWN` when the byte is outside 1..=99
    pub fn origin_id(&self) -> NodeId {
        NodeId::from_raw(self.0[ORIGIN_OFFSET])
    }

    /// Raw origin byte, before range mapping
    pub fn raw_origin(&self) -> u8 {
        self.0[ORIGIN_OFFSET]
    }

    /// Message type tag
    pub fn msg_type(&self) -> MsgType {
        MsgType(self.0[TYPE_OFFSET])
    }

    /// Payload value
    pub fn value(&self) -> f32 {
        LittleEndian::read_f32(&self.0[VALUE_OFFSET..HOP_OFFSET])
    }

    /// Replace the payload value
    pub fn set_value(&mut self, value: f32) {
        LittleEndian::write_f32(&mut self.0[VALUE_OFFSET..HOP_OFFSET], value);
    }

    /// All hop trace slots, zero marks an empty slot
    pub fn hop_trace(&self) -> &[u8] {
        &self.0[HOP_OFFSET..TERMINATOR_OFFSET]
    }

    /// Relay ids recorded so far, up to the first empty slot
    pub fn forwarded_via(&self) -> Vec<u8> {
        self.hop_trace()
            .iter()
            .take_while(|&&id| id != 0)
            .copied()
            .collect()
    }

    /// Check if every hop slot is taken
    pub fn hop_trace_full(&self) -> bool {
        self.hop_trace().iter().all(|&id| id != 0)
    }

    /// Write `relay` into the first empty hop slot
    ///
    /// Returns false and leaves the trace untouched when all slots are
    /// taken. The frame is still forwarded in that case.
    pub fn append_hop(&mut self, relay: NodeId) -> bool {
        let trace = &mut self.0[HOP_OFFSET..TERMINATOR_OFFSET];
        match trace.iter_mut().find(|slot| **slot == 0) {
            Some(slot) => {
                *slot = relay.get();
                true
            }
            None => false,
        }
    }

    /// Terminator byte, zero on a cleanly decoded frame
    pub fn terminator(&self) -> u8 {
        self.0[TERMINATOR_OFFSET]
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("origin", &self.raw_origin())
            .field("type", &self.msg_type())
            .field("value", &self.value())
            .field("hops", &self.forwarded_via())
            .field("terminator", &self.terminator())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> NodeId {
        NodeId::new(n).unwrap()
    }

    #[test]
    fn test_node_id_range() {
        assert!(NodeId::new(0).is_none());
        assert!(NodeId::new(1).is_some());
        assert!(NodeId::new(99).is_some());
        assert!(NodeId::new(100).is_none());
        assert!(NodeId::from_raw(200).is_unknown());
        assert_eq!(NodeId::from_raw(42).get(), 42);
    }

    #[test]
    fn test_frame_layout() {
        let frame = Frame::new(id(5), MsgType::TEMPERATURE, 21.5);
        let bytes = frame.as_bytes();

        assert_eq!(bytes[0], 5);
        assert_eq!(bytes[1], b't');
        assert_eq!(&bytes[2..6], &21.5f32.to_le_bytes());
        assert!(bytes[6..].iter().all(|&b| b == 0));
        assert_eq!(frame.value(), 21.5);
        assert_eq!(frame.terminator(), 0);
    }

    #[test]
    fn test_origin_out_of_range_is_unknown() {
        let mut bytes = *Frame::new(id(5), MsgType::TEMPERATURE, 1.0).as_bytes();
        bytes[0] = 150;
        let frame = Frame::from_bytes(bytes);
        assert!(frame.origin_id().is_unknown());
        assert_eq!(frame.raw_origin(), 150);
    }

    #[test]
    fn test_append_hop_in_order() {
        let mut frame = Frame::new(id(5), MsgType::HUMIDITY, 40.0);
        assert!(frame.append_hop(id(7)));
        assert!(frame.append_hop(id(9)));
        assert_eq!(frame.forwarded_via(), vec![7, 9]);
        assert_eq!(frame.hop_trace()[2], 0);
    }

    #[test]
    fn test_append_hop_saturated() {
        let mut frame = Frame::new(id(5), MsgType::TEMPERATURE, 20.0);
        for relay in 10..10 + HOP_SLOTS as u8 {
            assert!(frame.append_hop(id(relay)));
        }
        assert!(frame.hop_trace_full());

        let before = frame;
        assert!(!frame.append_hop(id(42)));
        assert_eq!(frame, before);
        assert_eq!(frame.terminator(), 0);
    }

    #[test]
    fn test_set_value() {
        let mut frame = Frame::new(id(1), MsgType::ERROR, 4.0);
        frame.set_value(FAILURE_VALUE);
        assert_eq!(frame.value(), FAILURE_VALUE);
    }

    #[test]
    fn test_msg_type_printable() {
        assert!(MsgType::TEMPERATURE.is_printable());
        assert!(!MsgType::from_byte(0).is_printable());
        assert!(!MsgType::from_byte(127).is_printable());
        assert_eq!(MsgType::from_char('e'), Some(MsgType::ERROR));
        assert!(MsgType::from_char('é').is_none());
    }
}
