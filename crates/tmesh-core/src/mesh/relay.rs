//! Relay engine
//!
//! Every received wire frame runs to completion through:
//!
//! ```text
//! decode ─► validate ─┬─► reject (garbage / invalid)
//!                     └─► own-origin check ─┬─► reject (own id)
//!                                           └─► flood control ─┬─► suppress
//!                                                              └─► record, jitter,
//!                                                                  append hop, send
//! ```
//!
//! Own readings take the short path: build a fresh frame, encode, send. No
//! flood control applies to them.

use super::cipher::{CipherKey, FrameCodec, WireFrame};
use super::dedup::DedupCache;
use super::frame::{Frame, MsgType, NodeId};
use super::traits::{Clock, Radio};
use super::validate::{AllowedTypes, FrameValidator, RejectReason};
use crate::error::RadioError;
use crate::status::{Action, StatusLine};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tracing::{debug, warn};

/// Relay policy for one node
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// This node's id, written into hop traces
    pub node_id: NodeId,
    /// Drop frames whose origin is this node
    ///
    /// When off, a node relays its own readings like any other.
    pub reject_own_origin: bool,
    /// Upper bound (exclusive) of the random pre-relay delay, ms
    pub jitter_ms: u64,
    /// Flood control window
    pub flood_window: Duration,
    /// Accepted message types
    pub allowed_types: AllowedTypes,
}

impl RelayConfig {
    /// Default policy for `node_id`
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            reject_own_origin: true,
            jitter_ms: 100,
            flood_window: Duration::from_millis(540_000),
            allowed_types: AllowedTypes::default(),
        }
    }
}

/// Terminal outcome of processing one received frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RelayOutcome {
    /// Failed validation
    Rejected(RejectReason),
    /// Our own reading came back
    OwnOrigin,
    /// Seen inside the flood window
    Suppressed,
    /// Relayed; `hop_added` is false when the trace was already full
    Forwarded {
        /// Whether this node's id made it into the trace
        hop_added: bool,
    },
}

impl RelayOutcome {
    /// Status line action for this outcome
    pub fn action(&self) -> Action {
        match self {
            RelayOutcome::Rejected(reason) => Action::from(*reason),
            RelayOutcome::OwnOrigin => Action::RejectOwnId,
            RelayOutcome::Suppressed => Action::RejectSeenRecently,
            RelayOutcome::Forwarded { .. } => Action::Forward,
        }
    }
}

/// A processed frame together with what happened to it
#[derive(Debug, Clone, Copy)]
pub struct RelayReport {
    /// Decoded frame; for forwards, the frame as re-transmitted
    pub frame: Frame,
    /// Outcome
    pub outcome: RelayOutcome,
}

impl RelayReport {
    /// Status line for this report
    pub fn status_line(&self) -> StatusLine {
        StatusLine::new(&self.frame, self.outcome.action())
    }
}

/// Relay counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Wire frames received
    pub frames_rx: u64,
    /// Frames relayed
    pub forwarded: u64,
    /// Frames dropped by flood control
    pub suppressed: u64,
    /// Own frames dropped
    pub own_origin: u64,
    /// Frames dropped as garbage
    pub garbage: u64,
    /// Frames dropped as invalid
    pub invalid: u64,
    /// Own readings transmitted
    pub sent: u64,
    /// Radio refusals
    pub tx_errors: u64,
}

/// Receive/forward state machine and own-reading sender
#[derive(Debug)]
pub struct RelayEngine {
    config: RelayConfig,
    codec: FrameCodec,
    validator: FrameValidator,
    dedup: DedupCache,
    rng: StdRng,
    stats: RelayStats,
}

impl RelayEngine {
    /// Create an engine seeded from OS entropy
    pub fn new(config: RelayConfig, key: CipherKey) -> Self {
        Self::with_rng(config, key, StdRng::from_entropy())
    }

    /// Create an engine with a deterministic IV/jitter sequence
    pub fn with_seed(config: RelayConfig, key: CipherKey, seed: u64) -> Self {
        Self::with_rng(config, key, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: RelayConfig, key: CipherKey, rng: StdRng) -> Self {
        Self {
            codec: FrameCodec::new(key),
            validator: FrameValidator::new(config.allowed_types.clone()),
            dedup: DedupCache::new(config.flood_window),
            config,
            rng,
            stats: RelayStats::default(),
        }
    }

    /// This node's id
    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    /// Relay counters
    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// Flood control cache
    pub fn dedup(&self) -> &DedupCache {
        &self.dedup
    }

    /// Process one received wire frame to a terminal outcome
    pub fn on_receive<R, C>(&mut self, wire: &WireFrame, radio: &mut R, clock: &mut C) -> RelayReport
    where
        R: Radio + ?Sized,
        C: Clock + ?Sized,
    {
        self.stats.frames_rx += 1;
        let mut frame = self.codec.decode(wire);

        let outcome = self.classify(&frame, clock.now_ms());
        if let RelayOutcome::Forwarded { .. } = outcome {
            let jitter = if self.config.jitter_ms > 0 {
                self.rng.gen_range(0..self.config.jitter_ms)
            } else {
                0
            };
            clock.delay(Duration::from_millis(jitter));

            let hop_added = frame.append_hop(self.config.node_id);
            let out = self.codec.encode(&frame, &mut self.rng);
            if let Err(e) = radio.send(&out) {
                warn!(origin = frame.raw_origin(), "relay send failed: {}", e);
                self.stats.tx_errors += 1;
            }
            let report = RelayReport {
                frame,
                outcome: RelayOutcome::Forwarded { hop_added },
            };
            self.log(&report);
            return report;
        }

        let report = RelayReport { frame, outcome };
        self.log(&report);
        report
    }

    /// Decide the fate of a decoded frame, recording a forward decision
    fn classify(&mut self, frame: &Frame, now: u64) -> RelayOutcome {
        if let Err(reason) = self.validator.validate(frame) {
            match Action::from(reason) {
                Action::DecryptOrGarbage => self.stats.garbage += 1,
                _ => self.stats.invalid += 1,
            }
            return RelayOutcome::Rejected(reason);
        }

        let origin = frame.origin_id();
        let msg_type = frame.msg_type();
        if self.config.reject_own_origin && origin == self.config.node_id {
            self.stats.own_origin += 1;
            return RelayOutcome::OwnOrigin;
        }

        if !self.dedup.should_forward(origin, msg_type, now) {
            self.stats.suppressed += 1;
            return RelayOutcome::Suppressed;
        }

        self.dedup.record(origin, msg_type, now);
        self.stats.forwarded += 1;
        RelayOutcome::Forwarded { hop_added: false }
    }

    fn log(&self, report: &RelayReport) {
        let frame = &report.frame;
        match report.outcome {
            RelayOutcome::Rejected(reason) => debug!(
                node = %self.config.node_id,
                action = %report.outcome.action(),
                %reason,
                "frame rejected"
            ),
            outcome => debug!(
                node = %self.config.node_id,
                origin = %frame.origin_id(),
                msg_type = %frame.msg_type(),
                value = frame.value(),
                hops = ?frame.forwarded_via(),
                action = %outcome.action(),
                "frame processed"
            ),
        }
    }

    /// Build, encode and transmit one of this node's own readings
    pub fn send_reading<R>(&mut self, msg_type: MsgType, value: f32, radio: &mut R) -> Result<Frame, RadioError>
    where
        R: Radio + ?Sized,
    {
        let frame = Frame::new(self.config.node_id, msg_type, value);
        let wire = self.codec.encode(&frame, &mut self.rng);
        match radio.send(&wire) {
            Ok(()) => {
                self.stats.sent += 1;
                debug!(node = %self.config.node_id, %msg_type, value, "reading sent");
                Ok(frame)
            }
            Err(e) => {
                self.stats.tx_errors += 1;
                Err(e)
            }
        }
    }
}
