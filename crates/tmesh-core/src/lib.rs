//! # Sensor Mesh Core Library
//!
//! This crate implements the relay protocol of a small battery-powered
//! sensor mesh: each node periodically broadcasts a temperature/humidity
//! reading and relays the readings of every other node it hears.
//!
//! ## Overview
//!
//! - **Frames**: 18-byte readings with a hop trace, obfuscated to 19 bytes
//!   on the wire by a byte-feedback cipher
//! - **Relay**: validation, own-origin rejection, time-windowed flood
//!   control, hop annotation and jittered re-broadcast
//! - **Sensor**: AHT calibration state machine with a bounded failure
//!   budget and a restart escalation
//! - **Node**: cooperative scheduling of the measure and transmit loops,
//!   radio receptions and buttons
//! - **Simulation**: many nodes in virtual time over a link topology
//!
//! ## Signal Flow
//!
//! ```text
//! TX: Sensor → Measurement → Frame → Encode(IV) → Radio
//! RX: Radio → Decode → Validate → Own-origin → Flood control → Append hop → Encode → Radio
//! ```
//!
//! Every received or sent frame produces one JSON [`StatusLine`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use tmesh_core::prelude::*;
//!
//! let nodes = vec![NodeConfig::for_device(5), NodeConfig::for_device(7)];
//! let mut sim = MeshSimulator::new(SimConfig::default(), nodes, Topology::line(2)).unwrap();
//! sim.press_button(0, Button::A);
//! sim.run_until(5_000);
//! for line in sim.status_lines(1) {
//!     println!("{}", line.to_json());
//! }
//! ```

pub mod config;
pub mod error;
pub mod node;
pub mod scheduler;
pub mod sensor;
pub mod status;

// Mesh relay protocol
pub mod mesh;

// Re-export main types
pub use config::NodeConfig;
pub use error::{BusError, ConfigError, RadioError, SensorError};
pub use mesh::{CipherKey, Frame, FrameCodec, MsgType, NodeId, RelayEngine, WireFrame};
pub use node::{SensorNode, Verbosity};
pub use scheduler::{Button, Event, Scheduler, Task};
pub use sensor::{SensorAcquisition, SimulatedAht};
pub use status::{Action, StatusLine, StatusSink};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::NodeConfig;
    pub use crate::mesh::{
        Clock, Frame, FrameCodec, MeshSimulator, MsgType, NodeId, Radio, SimConfig, Topology,
        WireFrame,
    };
    pub use crate::node::SensorNode;
    pub use crate::scheduler::Button;
    pub use crate::status::{Action, StatusLine, StatusSink};
}
