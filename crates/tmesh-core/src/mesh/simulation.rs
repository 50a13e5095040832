//! Multi-Node Mesh Simulation
//!
//! Runs a set of [`SensorNode`]s against each other in virtual time, without
//! hardware. It models:
//!
//! - a link topology (explicit links, line, full mesh, or random placement
//!   with a radio range)
//! - per-frame airtime and random loss
//! - each node's own clock, advanced by the waits its handlers perform
//!
//! Every node is driven one event at a time, always picking whichever node
//! or in-flight frame is due first, so relay decisions interleave the way
//! they would on real devices.
//!
//! ## Example
//!
//! ```ignore
//! use tmesh_core::mesh::simulation::{MeshSimulator, SimConfig, Topology};
//! use tmesh_core::config::NodeConfig;
//!
//! let nodes = vec![NodeConfig::for_device(5), NodeConfig::for_device(7)];
//! let mut sim = MeshSimulator::new(SimConfig::default(), nodes, Topology::line(2))?;
//! sim.press_button(0, Button::A);
//! sim.run_until(5_000);
//! for line in sim.status_lines(1) {
//!     println!("{}", line.to_json());
//! }
//! ```

use super::cipher::WireFrame;
use super::relay::RelayStats;
use super::traits::{Clock, Radio};
use crate::config::NodeConfig;
use crate::error::{ConfigError, RadioError};
use crate::node::SensorNode;
use crate::scheduler::Button;
use crate::sensor::SimulatedAht;
use crate::status::{MemorySink, StatusLine};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace};

/// Node position in 2D space (meters)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
}

impl NodePosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Distance to another node in meters
    pub fn distance_to(&self, other: &NodePosition) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Uniform random position within bounds
    pub fn random<R: Rng + ?Sized>(max_x: f64, max_y: f64, rng: &mut R) -> Self {
        Self {
            x: rng.gen::<f64>() * max_x,
            y: rng.gen::<f64>() * max_y,
        }
    }
}

/// Who hears whom
///
/// Links are symmetric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    adjacency: Vec<Vec<usize>>,
}

impl Topology {
    /// `n` nodes with no links
    pub fn isolated(n: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); n],
        }
    }

    /// Every node hears every other node
    pub fn full(n: usize) -> Self {
        let adjacency = (0..n)
            .map(|i| (0..n).filter(|&j| j != i).collect())
            .collect();
        Self { adjacency }
    }

    /// Node `i` hears only `i - 1` and `i + 1`
    pub fn line(n: usize) -> Self {
        let links: Vec<_> = (1..n).map(|i| (i - 1, i)).collect();
        Self::from_links(n, &links)
    }

    /// Explicit symmetric links; out-of-range and self links are ignored
    pub fn from_links(n: usize, links: &[(usize, usize)]) -> Self {
        let mut topology = Self::isolated(n);
        for &(a, b) in links {
            topology.link(a, b);
        }
        topology
    }

    /// Random placement in a `width` x `height` area, linking nodes within `range`
    pub fn random_geometric(
        n: usize,
        width: f64,
        height: f64,
        range: f64,
        seed: u64,
    ) -> (Self, Vec<NodePosition>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let positions: Vec<_> = (0..n)
            .map(|_| NodePosition::random(width, height, &mut rng))
            .collect();

        let mut topology = Self::isolated(n);
        for i in 0..n {
            for j in (i + 1)..n {
                if positions[i].distance_to(&positions[j]) <= range {
                    topology.link(i, j);
                }
            }
        }
        (topology, positions)
    }

    /// Add a symmetric link
    pub fn link(&mut self, a: usize, b: usize) {
        let n = self.adjacency.len();
        if a == b || a >= n || b >= n {
            return;
        }
        if !self.adjacency[a].contains(&b) {
            self.adjacency[a].push(b);
        }
        if !self.adjacency[b].contains(&a) {
            self.adjacency[b].push(a);
        }
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    /// Check if there are no nodes
    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// Nodes that hear node `idx`
    pub fn neighbors(&self, idx: usize) -> &[usize] {
        self.adjacency.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check if every node can reach every other node
    pub fn is_connected(&self) -> bool {
        let n = self.adjacency.len();
        if n == 0 {
            return true;
        }

        let mut visited = vec![false; n];
        let mut queue = VecDeque::new();
        visited[0] = true;
        queue.push_back(0);

        while let Some(node) = queue.pop_front() {
            for &neighbor in &self.adjacency[node] {
                if !visited[neighbor] {
                    visited[neighbor] = true;
                    queue.push_back(neighbor);
                }
            }
        }

        visited.iter().all(|&v| v)
    }
}

/// Simulation configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Time from transmit to reception, ms
    pub airtime_ms: u64,
    /// Probability that a single link drops a frame
    pub loss_rate: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            airtime_ms: 50,
            loss_rate: 0.0,
            seed: 42,
        }
    }
}

impl SimConfig {
    pub fn with_airtime(mut self, airtime_ms: u64) -> Self {
        self.airtime_ms = airtime_ms;
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Virtual node clock
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Rc<Cell<u64>>,
}

impl SimClock {
    /// Move forward to `t`; never moves backwards
    pub fn advance_to(&self, t: u64) {
        if t > self.now.get() {
            self.now.set(t);
        }
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn delay(&mut self, duration: Duration) {
        self.now.set(self.now.get() + duration.as_millis() as u64);
    }
}

/// Radio that queues frames for the simulator, stamped with send time
#[derive(Debug, Default)]
pub struct SimRadio {
    clock: Rc<Cell<u64>>,
    outbox: Vec<(u64, WireFrame)>,
}

impl SimRadio {
    fn drain(&mut self) -> Vec<(u64, WireFrame)> {
        std::mem::take(&mut self.outbox)
    }
}

impl Radio for SimRadio {
    fn send(&mut self, frame: &WireFrame) -> Result<(), RadioError> {
        self.outbox.push((self.clock.get(), *frame));
        Ok(())
    }
}

/// A node as run by the simulator
pub type SimNode = SensorNode<SimRadio, SimulatedAht, SimClock>;

/// Simulation statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Frames put on air
    pub frames_transmitted: u64,
    /// Frames handed to a receiving node
    pub deliveries: u64,
    /// Link-level losses
    pub frames_lost: u64,
}

/// Status line with where and when it happened
#[derive(Debug, Clone, PartialEq)]
pub struct TimedStatus {
    /// Node-local time, ms
    pub at: u64,
    /// Index of the emitting node
    pub node_idx: usize,
    /// The status line
    pub line: StatusLine,
}

struct InFlight {
    arrival: u64,
    seq: u64,
    to: usize,
    wire: WireFrame,
}

struct Slot {
    node: SimNode,
    lines: Vec<StatusLine>,
}

/// Multi-node mesh simulator
pub struct MeshSimulator {
    config: SimConfig,
    topology: Topology,
    slots: Vec<Slot>,
    in_flight: Vec<InFlight>,
    timeline: Vec<TimedStatus>,
    now: u64,
    seq: u64,
    rng: StdRng,
    stats: SimStats,
}

impl MeshSimulator {
    /// Build and boot one node per config, wired by `topology`
    pub fn new(
        config: SimConfig,
        nodes: Vec<NodeConfig>,
        topology: Topology,
    ) -> Result<Self, ConfigError> {
        if nodes.len() != topology.len() {
            return Err(ConfigError::Topology(format!(
                "{} nodes but topology has {}",
                nodes.len(),
                topology.len()
            )));
        }

        let mut slots = Vec::with_capacity(nodes.len());
        for (i, node_config) in nodes.into_iter().enumerate() {
            let clock = SimClock::default();
            let radio = SimRadio {
                clock: Rc::clone(&clock.now),
                outbox: Vec::new(),
            };
            let aht = SimulatedAht::new(20.0 + i as f32 * 0.5, 45.0);
            let seed = config.seed.wrapping_add(i as u64 * 1000);
            let node = SensorNode::with_seed(node_config, radio, aht, clock, seed)?;
            slots.push(Slot {
                node,
                lines: Vec::new(),
            });
        }

        let mut sim = Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            topology,
            slots,
            in_flight: Vec::new(),
            timeline: Vec::new(),
            now: 0,
            seq: 0,
            stats: SimStats::default(),
        };

        for idx in 0..sim.slots.len() {
            let mut sink = MemorySink::new();
            sim.slots[idx].node.boot(&mut sink);
            sim.collect(idx, sink);
        }
        Ok(sim)
    }

    /// Current simulation time, ms
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.slots.len()
    }

    /// Link topology
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Collected statistics
    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Node by index
    pub fn node(&self, idx: usize) -> Option<&SimNode> {
        self.slots.get(idx).map(|s| &s.node)
    }

    /// Node by index, mutably
    pub fn node_mut(&mut self, idx: usize) -> Option<&mut SimNode> {
        self.slots.get_mut(idx).map(|s| &mut s.node)
    }

    /// Sensor of node `idx`
    pub fn sensor_mut(&mut self, idx: usize) -> Option<&mut SimulatedAht> {
        self.node_mut(idx).map(|n| n.sensor_bus_mut())
    }

    /// Relay counters of node `idx`
    pub fn relay_stats(&self, idx: usize) -> Option<&RelayStats> {
        self.node(idx).map(|n| n.relay_stats())
    }

    /// Times node `idx` restarted
    pub fn restarts(&self, idx: usize) -> u32 {
        self.node(idx)
            .map(|n| n.boot_count().saturating_sub(1))
            .unwrap_or(0)
    }

    /// Status lines emitted by node `idx`, in order
    pub fn status_lines(&self, idx: usize) -> &[StatusLine] {
        self.slots
            .get(idx)
            .map(|s| s.lines.as_slice())
            .unwrap_or(&[])
    }

    /// Status lines of all nodes in emission order
    pub fn timeline(&self) -> &[TimedStatus] {
        &self.timeline
    }

    /// Hand a raw wire frame to node `idx` now
    pub fn inject(&mut self, idx: usize, wire: WireFrame) {
        let now = self.now;
        if let Some(slot) = self.slots.get_mut(idx) {
            slot.node.clock().advance_to(now);
            slot.node.deliver(wire);
        }
    }

    /// Press a button on node `idx` now
    pub fn press_button(&mut self, idx: usize, button: Button) {
        let now = self.now;
        if let Some(slot) = self.slots.get_mut(idx) {
            slot.node.clock().advance_to(now);
            slot.node.press_button(button);
        }
    }

    /// Run for `duration` of simulated time
    pub fn run_for(&mut self, duration: Duration) {
        let until = self.now.saturating_add(duration.as_millis() as u64);
        self.run_until(until);
    }

    /// Run until simulated time `until` (ms)
    pub fn run_until(&mut self, until: u64) {
        loop {
            let next_node = (0..self.slots.len())
                .filter_map(|i| self.ready_at(i).map(|t| (t, i)))
                .min();
            let next_rx = self
                .in_flight
                .iter()
                .enumerate()
                .min_by_key(|(_, f)| (f.arrival, f.seq))
                .map(|(pos, f)| (f.arrival, pos));

            match (next_rx, next_node) {
                (Some((arrival, pos)), node) if node.map_or(true, |(t, _)| arrival <= t) => {
                    if arrival > until {
                        break;
                    }
                    self.now = self.now.max(arrival);
                    let frame = self.in_flight.swap_remove(pos);
                    self.receive(frame);
                }
                (_, Some((t, idx))) => {
                    if t > until {
                        break;
                    }
                    self.now = self.now.max(t);
                    self.step_node(idx, t);
                }
                _ => break,
            }
        }
        self.now = self.now.max(until);
    }

    /// Earliest time node `idx` has something to do
    fn ready_at(&self, idx: usize) -> Option<u64> {
        let node = &self.slots[idx].node;
        let local = node.clock().now_ms();
        if node.has_events() || node.restart_pending() {
            return Some(local);
        }
        node.next_due().map(|due| due.max(local))
    }

    fn receive(&mut self, frame: InFlight) {
        self.stats.deliveries += 1;
        let node = &mut self.slots[frame.to].node;
        node.clock().advance_to(frame.arrival);
        trace!(to = frame.to, at = frame.arrival, "frame delivered");
        node.deliver(frame.wire);
    }

    fn step_node(&mut self, idx: usize, t: u64) {
        let mut sink = MemorySink::new();
        let node = &mut self.slots[idx].node;
        node.clock().advance_to(t);
        node.step(&mut sink);
        self.collect(idx, sink);
    }

    /// Record status lines and put queued transmissions on air
    fn collect(&mut self, idx: usize, mut sink: MemorySink) {
        let at = self.slots[idx].node.clock().now_ms();
        for line in sink.drain() {
            self.timeline.push(TimedStatus {
                at,
                node_idx: idx,
                line: line.clone(),
            });
            self.slots[idx].lines.push(line);
        }

        let outbox = self.slots[idx].node.radio_mut().drain();
        for (sent_at, wire) in outbox {
            self.stats.frames_transmitted += 1;
            for &to in self.topology.neighbors(idx) {
                if self.config.loss_rate > 0.0 && self.rng.gen::<f64>() < self.config.loss_rate {
                    self.stats.frames_lost += 1;
                    debug!(from = idx, to, "frame lost");
                    continue;
                }
                self.seq += 1;
                self.in_flight.push(InFlight {
                    arrival: sent_at + self.config.airtime_ms,
                    seq: self.seq,
                    to,
                    wire,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Action;

    fn configs(ids: &[u8]) -> Vec<NodeConfig> {
        ids.iter().map(|&id| NodeConfig::for_device(id)).collect()
    }

    #[test]
    fn test_node_position_distance() {
        let a = NodePosition::new(0.0, 0.0);
        let b = NodePosition::new(3.0, 4.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_topologies() {
        let line = Topology::line(4);
        assert_eq!(line.neighbors(0), &[1]);
        assert_eq!(line.neighbors(2), &[1, 3]);
        assert!(line.is_connected());

        let full = Topology::full(3);
        assert_eq!(full.neighbors(1), &[0, 2]);

        let split = Topology::from_links(4, &[(0, 1), (2, 3), (1, 1), (0, 9)]);
        assert!(!split.is_connected());
        assert_eq!(split.neighbors(1), &[0]);
    }

    #[test]
    fn test_random_geometric() {
        let (near, positions) = Topology::random_geometric(5, 100.0, 100.0, 1000.0, 7);
        assert_eq!(positions.len(), 5);
        assert_eq!(near, Topology::full(5));

        let (far, _) = Topology::random_geometric(5, 100.0, 100.0, 0.0, 7);
        assert!(!far.is_connected());
    }

    #[test]
    fn test_topology_mismatch() {
        let result = MeshSimulator::new(SimConfig::default(), configs(&[1, 2]), Topology::full(3));
        assert!(matches!(result, Err(ConfigError::Topology(_))));
    }

    #[test]
    fn test_simulator_boots_nodes() {
        let sim = MeshSimulator::new(SimConfig::default(), configs(&[1, 2, 3]), Topology::full(3))
            .unwrap();
        assert_eq!(sim.node_count(), 3);
        for idx in 0..3 {
            assert_eq!(sim.node(idx).unwrap().boot_count(), 1);
            assert_eq!(sim.restarts(idx), 0);
        }
    }

    #[test]
    fn test_flood_terminates_in_full_mesh() {
        let mut sim = MeshSimulator::new(
            SimConfig::default(),
            configs(&[1, 2, 3, 4]),
            Topology::full(4),
        )
        .unwrap();
        sim.run_until(1000);
        sim.press_button(0, Button::A);
        sim.run_until(10_000);

        // Origin sends t and h; each of the three others forwards each once
        let forwards = sim
            .timeline()
            .iter()
            .filter(|s| s.line.action_taken == Action::Forward)
            .count();
        assert_eq!(forwards, 6);
        assert_eq!(sim.stats().frames_transmitted, 8);
        assert!(sim.in_flight.is_empty());
    }

    #[test]
    fn test_total_loss() {
        let mut sim = MeshSimulator::new(
            SimConfig::default().with_loss_rate(1.0),
            configs(&[1, 2]),
            Topology::full(2),
        )
        .unwrap();
        sim.run_until(1000);
        sim.press_button(0, Button::A);
        sim.run_until(5000);

        assert_eq!(sim.stats().deliveries, 0);
        assert_eq!(sim.stats().frames_lost, 2);
        assert!(sim.status_lines(1).is_empty());
    }
}
