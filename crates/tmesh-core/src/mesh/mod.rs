//! Mesh Relay Protocol
//!
//! Fixed-size sensor readings flooded across a small broadcast mesh. Every
//! node both originates its own readings and relays everyone else's,
//! recording itself in the frame's hop trace.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          RelayEngine                                     │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │   decode    │  │  validate   │  │ own origin  │  │ flood ctrl  │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Frame / FrameCodec                                   │
//! │  ┌───────────────────────────┐  ┌─────────────────────────────────────┐  │
//! │  │  18-byte logical frame    │  │  19-byte CFB-style obfuscation      │  │
//! │  │  origin, type, value,     │  │  with random IV                     │  │
//! │  │  hop trace, terminator    │  │                                     │  │
//! │  └───────────────────────────┘  └─────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Radio Trait                                       │
//! │         (device radio, local UDP, or the in-memory simulator)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tmesh_core::mesh::{CipherKey, FrameCodec, Frame, MsgType, NodeId};
//!
//! let codec = FrameCodec::new(CipherKey::default());
//! let frame = Frame::new(NodeId::new(5).unwrap(), MsgType::TEMPERATURE, 21.5);
//! let wire = codec.encode(&frame, &mut rand::thread_rng());
//! assert_eq!(codec.decode(&wire), frame);
//! ```

pub mod cipher;
pub mod dedup;
pub mod frame;
pub mod relay;
pub mod simulation;
pub mod traits;
pub mod validate;

// Re-export main types
pub use cipher::{CipherKey, FrameCodec, WireFrame, KEY_LEN, WIRE_LEN};
pub use dedup::{DedupCache, DedupEntry};
pub use frame::{Frame, MsgType, NodeId, FAILURE_VALUE, FRAME_LEN, HOP_SLOTS};
pub use relay::{RelayConfig, RelayEngine, RelayOutcome, RelayReport, RelayStats};
pub use simulation::{MeshSimulator, NodePosition, SimConfig, SimStats, Topology};
pub use traits::{Clock, Radio, SensorBus};
pub use validate::{AllowedTypes, FrameValidator, RejectClass, RejectReason};
