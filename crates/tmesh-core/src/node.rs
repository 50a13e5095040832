//! Sensor node
//!
//! Everything one device runs, driven by a [`Scheduler`]:
//!
//! - measure loop: read the sensor every `measure_interval_ms`, keep the
//!   latest values, show them when the verbosity allows
//! - transmit loop: wait half an interval, send the temperature (or a
//!   recalibration error code), wait the other half, send the humidity
//! - radio receive: hand the frame to the [`RelayEngine`]
//! - button A: send the latest readings now
//! - button B: cycle display verbosity
//!
//! Each event runs to completion. The one fatal path, exhausting sensor
//! calibration attempts, sends `e`/4, waits a second and restarts the node
//! with fresh volatile state.

use crate::config::NodeConfig;
use crate::error::{ConfigError, SensorError};
use crate::mesh::cipher::WireFrame;
use crate::mesh::frame::{MsgType, NodeId};
use crate::mesh::relay::{RelayConfig, RelayEngine, RelayStats};
use crate::mesh::traits::{Clock, Radio, SensorBus};
use crate::scheduler::{Button, Event, Scheduler, Task};
use crate::sensor::{
    CalibrationOutcome, Measurement, SensorAcquisition, CALIBRATION_FAILED_TEMP,
    CALIBRATION_SUCCESS_TEMP,
};
use crate::status::{Action, StatusLine, StatusSink};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Error code: runtime recalibration succeeded
pub const ERR_RECALIBRATED: f32 = 1.0;
/// Error code: runtime recalibration failed
pub const ERR_RECALIBRATION_FAILED: f32 = 2.0;
/// Error code: forced send without a valid temperature
pub const ERR_NO_TEMPERATURE: f32 = 3.0;
/// Error code: calibration attempts exhausted, restarting
pub const ERR_RESTARTING: f32 = 4.0;

/// Wait between the fatal error frame and the restart
pub const RESTART_DELAY: Duration = Duration::from_millis(1000);

/// What the node shows on its display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Readings and radio activity
    #[default]
    ShowAll,
    /// Radio activity only
    RadioOnly,
    /// Readings only
    TempOnly,
    /// Nothing
    Quiet,
}

impl Verbosity {
    /// Next level in the button B cycle
    pub fn next(self) -> Self {
        match self {
            Verbosity::ShowAll => Verbosity::RadioOnly,
            Verbosity::RadioOnly => Verbosity::TempOnly,
            Verbosity::TempOnly => Verbosity::Quiet,
            Verbosity::Quiet => Verbosity::ShowAll,
        }
    }

    /// Name shown when the level is selected
    pub fn label(&self) -> &'static str {
        match self {
            Verbosity::ShowAll => "SHOW ALL",
            Verbosity::RadioOnly => "RADIO ONLY",
            Verbosity::TempOnly => "TEMP ONLY",
            Verbosity::Quiet => "QUIET",
        }
    }

    /// Check if readings are displayed
    pub fn shows_readings(&self) -> bool {
        matches!(self, Verbosity::ShowAll | Verbosity::TempOnly)
    }

    /// Check if radio activity is displayed
    pub fn shows_radio(&self) -> bool {
        matches!(self, Verbosity::ShowAll | Verbosity::RadioOnly)
    }
}

/// One mesh node: relay, sensor and periodic tasks
pub struct SensorNode<R, B, C> {
    config: NodeConfig,
    node_id: NodeId,
    radio: R,
    sensor: SensorAcquisition<B>,
    clock: C,
    relay: RelayEngine,
    scheduler: Scheduler,
    verbosity: Verbosity,
    temperature: f32,
    humidity: Option<f32>,
    seed: Option<u64>,
    boot_count: u32,
    restart_pending: bool,
}

impl<R: Radio, B: SensorBus, C: Clock> SensorNode<R, B, C> {
    /// Create a node with OS-seeded randomness
    pub fn new(config: NodeConfig, radio: R, bus: B, clock: C) -> Result<Self, ConfigError> {
        Self::build(config, radio, bus, clock, None)
    }

    /// Create a node with deterministic IVs and jitter
    pub fn with_seed(
        config: NodeConfig,
        radio: R,
        bus: B,
        clock: C,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        Self::build(config, radio, bus, clock, Some(seed))
    }

    fn build(
        config: NodeConfig,
        radio: R,
        bus: B,
        clock: C,
        seed: Option<u64>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let relay_config = config.relay_config()?;
        let relay = Self::make_relay(&config, relay_config, seed, 0);
        Ok(Self {
            node_id: config.node_id()?,
            sensor: SensorAcquisition::new(bus, config.sensor.clone()),
            config,
            radio,
            clock,
            relay,
            scheduler: Scheduler::new(),
            verbosity: Verbosity::default(),
            temperature: CALIBRATION_FAILED_TEMP,
            humidity: None,
            seed,
            boot_count: 0,
            restart_pending: false,
        })
    }

    fn make_relay(
        config: &NodeConfig,
        relay_config: RelayConfig,
        seed: Option<u64>,
        boot_count: u32,
    ) -> RelayEngine {
        let key = config.protocol.key.clone();
        match seed {
            Some(seed) => {
                RelayEngine::with_seed(relay_config, key, seed.wrapping_add(u64::from(boot_count)))
            }
            None => RelayEngine::new(relay_config, key),
        }
    }

    /// This node's id
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Configuration
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Relay counters
    pub fn relay_stats(&self) -> &RelayStats {
        self.relay.stats()
    }

    /// Relay engine
    pub fn relay(&self) -> &RelayEngine {
        &self.relay
    }

    /// Sensor driver
    pub fn sensor(&self) -> &SensorAcquisition<B> {
        &self.sensor
    }

    /// Sensor bus, mutably
    pub fn sensor_bus_mut(&mut self) -> &mut B {
        self.sensor.bus_mut()
    }

    /// Radio transport
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Radio transport, mutably
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Clock
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Clock, mutably
    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Current display verbosity
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Latest temperature, possibly a recalibration sentinel
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Latest humidity
    pub fn humidity(&self) -> Option<f32> {
        self.humidity
    }

    /// Number of boots, including the first
    pub fn boot_count(&self) -> u32 {
        self.boot_count
    }

    /// Due time of the next timer
    pub fn next_due(&self) -> Option<u64> {
        self.scheduler.next_due()
    }

    /// Check if radio or button events are waiting
    pub fn has_events(&self) -> bool {
        self.scheduler.has_events()
    }

    /// Power-on sequence: calibrate the sensor and arm the periodic tasks
    pub fn boot(&mut self, sink: &mut dyn StatusSink) {
        self.boot_count += 1;
        info!(node = %self.node_id, boot = self.boot_count, "powered on, with ID {}", self.node_id);

        self.temperature = CALIBRATION_FAILED_TEMP;
        self.humidity = None;

        let now = self.clock.now_ms();
        self.scheduler.schedule_at(now, Task::Measure);
        self.scheduler
            .schedule_in(now, self.config.half_interval(), Task::TransmitTemperature);

        if self.sensor.init(&mut self.clock) == CalibrationOutcome::Exhausted {
            self.fatal(sink);
        }
    }

    /// Restart with fresh volatile state and boot again
    pub fn restart(&mut self, sink: &mut dyn StatusSink) {
        warn!(node = %self.node_id, "restarting");
        self.restart_pending = false;
        self.scheduler.clear();
        self.sensor.reset_state();
        self.verbosity = Verbosity::default();
        match self.config.relay_config() {
            Ok(relay_config) => {
                self.relay =
                    Self::make_relay(&self.config, relay_config, self.seed, self.boot_count);
            }
            // Validated at construction
            Err(e) => error!("relay config: {}", e),
        }
        self.boot(sink);
    }

    fn fatal(&mut self, sink: &mut dyn StatusSink) {
        error!(node = %self.node_id, "sensor calibration failed repeatedly, restarting");
        self.send_reading(MsgType::ERROR, ERR_RESTARTING, sink);
        self.clock.delay(RESTART_DELAY);
        self.restart_pending = true;
    }

    /// Check if a fatal error is waiting for the restart
    pub fn restart_pending(&self) -> bool {
        self.restart_pending
    }

    /// Queue a received wire frame
    pub fn deliver(&mut self, wire: WireFrame) {
        self.scheduler.push_event(Event::Radio(wire));
    }

    /// Queue a button press
    pub fn press_button(&mut self, button: Button) {
        self.scheduler.push_event(Event::Button(button));
    }

    /// Run everything that is ready now; returns the number of items handled
    pub fn poll(&mut self, sink: &mut dyn StatusSink) -> usize {
        let mut handled = 0;
        while self.step(sink) {
            handled += 1;
        }
        handled
    }

    /// Run the next ready item, if any
    ///
    /// A pending restart runs before anything else.
    pub fn step(&mut self, sink: &mut dyn StatusSink) -> bool {
        if self.restart_pending {
            self.restart(sink);
            return true;
        }
        match self.scheduler.pop_ready(self.clock.now_ms()) {
            Some(event) => {
                self.handle(event, sink);
                true
            }
            None => false,
        }
    }

    fn handle(&mut self, event: Event, sink: &mut dyn StatusSink) {
        match event {
            Event::Radio(wire) => self.on_radio(&wire, sink),
            Event::Button(Button::A) => self.on_button_a(sink),
            Event::Button(Button::B) => self.on_button_b(),
            Event::Timer(Task::Measure) => self.on_measure(sink),
            Event::Timer(Task::TransmitTemperature) => self.on_transmit_temperature(sink),
            Event::Timer(Task::TransmitHumidity) => self.on_transmit_humidity(sink),
        }
    }

    fn on_radio(&mut self, wire: &WireFrame, sink: &mut dyn StatusSink) {
        let report = self.relay.on_receive(wire, &mut self.radio, &mut self.clock);
        if self.verbosity.shows_radio() {
            debug!(node = %self.node_id, action = %report.outcome.action(), "radio activity");
        }
        self.emit(sink, report.status_line());
    }

    fn on_button_a(&mut self, sink: &mut dyn StatusSink) {
        if self.has_valid_temperature() {
            self.send_reading(MsgType::TEMPERATURE, self.temperature, sink);
        } else {
            warn!(node = %self.node_id, temperature = self.temperature, "error 3: bad temp");
            self.send_reading(MsgType::ERROR, ERR_NO_TEMPERATURE, sink);
        }
        if let Some(humidity) = self.humidity {
            self.send_reading(MsgType::HUMIDITY, humidity, sink);
        }
    }

    fn on_button_b(&mut self) {
        self.verbosity = self.verbosity.next();
        info!(node = %self.node_id, display = self.verbosity.label(), "verbosity changed");
    }

    fn on_measure(&mut self, sink: &mut dyn StatusSink) {
        match self.sensor.read(&mut self.clock) {
            Ok(measurement) => self.store(measurement),
            Err(SensorError::CalibrationExhausted { .. }) => {
                self.fatal(sink);
                return;
            }
            Err(e) => warn!(node = %self.node_id, "sensor read failed: {}", e),
        }

        let now = self.clock.now_ms();
        let interval = Duration::from_millis(self.config.schedule.measure_interval_ms);
        self.scheduler.schedule_in(now, interval, Task::Measure);
    }

    fn store(&mut self, measurement: Measurement) {
        self.temperature = measurement.temperature();
        self.humidity = measurement.humidity();

        if self.verbosity.shows_readings() {
            info!(node = %self.node_id, display = %format!("{:.1}C", self.temperature), "temperature");
            if let Some(humidity) = self.humidity {
                info!(node = %self.node_id, display = %format!("{}%", humidity.round()), "humidity");
            }
        }
    }

    fn on_transmit_temperature(&mut self, sink: &mut dyn StatusSink) {
        if self.temperature == CALIBRATION_SUCCESS_TEMP {
            info!(node = %self.node_id, "successful sensor runtime calibration");
            self.send_reading(MsgType::ERROR, ERR_RECALIBRATED, sink);
        } else if self.temperature == CALIBRATION_FAILED_TEMP {
            warn!(node = %self.node_id, "failed sensor runtime calibration");
            self.send_reading(MsgType::ERROR, ERR_RECALIBRATION_FAILED, sink);
        } else {
            self.send_reading(MsgType::TEMPERATURE, self.temperature, sink);
        }
        let now = self.clock.now_ms();
        self.scheduler
            .schedule_in(now, self.config.half_interval(), Task::TransmitHumidity);
    }

    fn on_transmit_humidity(&mut self, sink: &mut dyn StatusSink) {
        if let Some(humidity) = self.humidity {
            self.send_reading(MsgType::HUMIDITY, humidity, sink);
        }
        let now = self.clock.now_ms();
        self.scheduler
            .schedule_in(now, self.config.half_interval(), Task::TransmitTemperature);
    }

    fn has_valid_temperature(&self) -> bool {
        self.temperature != CALIBRATION_SUCCESS_TEMP && self.temperature != CALIBRATION_FAILED_TEMP
    }

    /// Transmit one of this node's own readings and report it
    pub fn send_reading(&mut self, msg_type: MsgType, value: f32, sink: &mut dyn StatusSink) {
        match self.relay.send_reading(msg_type, value, &mut self.radio) {
            Ok(frame) => self.emit(sink, StatusLine::new(&frame, Action::Sent)),
            Err(e) => warn!(node = %self.node_id, %msg_type, "send failed: {}", e),
        }
    }

    fn emit(&self, sink: &mut dyn StatusSink, line: StatusLine) {
        info!(node = %self.node_id, "{}", line.to_json());
        sink.emit(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RadioError;
    use crate::mesh::cipher::FrameCodec;
    use crate::mesh::frame::Frame;
    use crate::sensor::SimulatedAht;
    use crate::status::MemorySink;

    #[derive(Default)]
    struct TestRadio {
        sent: Vec<WireFrame>,
    }

    impl Radio for TestRadio {
        fn send(&mut self, frame: &WireFrame) -> Result<(), RadioError> {
            self.sent.push(*frame);
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestClock {
        now: u64,
    }

    impl Clock for TestClock {
        fn now_ms(&self) -> u64 {
            self.now
        }

        fn delay(&mut self, duration: Duration) {
            self.now += duration.as_millis() as u64;
        }
    }

    type TestNode = SensorNode<TestRadio, SimulatedAht, TestClock>;

    fn node(id: u8, aht: SimulatedAht) -> TestNode {
        let mut config = NodeConfig::for_device(id);
        config.schedule.tx_interval_ms = 20_000;
        SensorNode::with_seed(config, TestRadio::default(), aht, TestClock::default(), 7).unwrap()
    }

    fn run_to(node: &mut TestNode, t: u64, sink: &mut MemorySink) {
        while let Some(due) = node.next_due() {
            if due > t {
                break;
            }
            if node.clock().now < due {
                node.clock_mut().now = due;
            }
            node.poll(sink);
        }
        if node.clock().now < t {
            node.clock_mut().now = t;
        }
        node.poll(sink);
    }

    fn types(sink: &MemorySink) -> Vec<(String, f32)> {
        sink.lines()
            .iter()
            .filter(|l| l.action_taken == Action::Sent)
            .map(|l| (l.msg_type.clone(), l.value))
            .collect()
    }

    #[test]
    fn test_verbosity_cycle() {
        let mut v = Verbosity::default();
        let labels: Vec<_> = (0..5)
            .map(|_| {
                v = v.next();
                v.label()
            })
            .collect();
        assert_eq!(labels, ["RADIO ONLY", "TEMP ONLY", "QUIET", "SHOW ALL", "RADIO ONLY"]);
        assert!(Verbosity::TempOnly.shows_readings());
        assert!(!Verbosity::TempOnly.shows_radio());
    }

    #[test]
    fn test_boot_state() {
        let mut node = node(5, SimulatedAht::new(21.5, 48.0));
        let mut sink = MemorySink::new();
        node.boot(&mut sink);

        assert_eq!(node.boot_count(), 1);
        assert_eq!(node.temperature(), CALIBRATION_FAILED_TEMP);
        assert_eq!(node.humidity(), None);
        assert!(node.sensor().state().calibrated);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_transmit_cycle() {
        let mut node = node(5, SimulatedAht::new(21.5, 48.0));
        let mut sink = MemorySink::new();
        node.boot(&mut sink);

        run_to(&mut node, 10_500, &mut sink);
        let sent = types(&sink);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "t");
        assert!((sent[0].1 - 21.5).abs() < 0.01);

        run_to(&mut node, 20_500, &mut sink);
        let sent = types(&sink);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].0, "h");
        assert!((sent[1].1 - 48.0).abs() < 0.01);

        let codec = FrameCodec::new(node.config().protocol.key.clone());
        let frame: Frame = codec.decode(&node.radio().sent[0]);
        assert_eq!(frame.origin_id().get(), 5);
        assert_eq!(node.relay_stats().sent, 2);
    }

    #[test]
    fn test_recalibration_reported_as_error_frame() {
        let mut node = node(5, SimulatedAht::new(21.5, 48.0).with_zero_reading(true));
        let mut sink = MemorySink::new();
        node.boot(&mut sink);

        run_to(&mut node, 10_500, &mut sink);
        assert_eq!(node.temperature(), CALIBRATION_SUCCESS_TEMP);
        assert_eq!(types(&sink), vec![("e".to_string(), ERR_RECALIBRATED)]);

        node.sensor_bus_mut().set_calibrates(false);
        run_to(&mut node, 30_500, &mut sink);
        let sent = types(&sink);
        // No humidity after a recalibration
        assert_eq!(sent.last().unwrap(), &("e".to_string(), ERR_RECALIBRATION_FAILED));
        assert!(sent.iter().all(|(t, _)| t == "e"));
    }

    #[test]
    fn test_button_a_without_reading() {
        let mut node = node(5, SimulatedAht::new(21.5, 48.0));
        let mut sink = MemorySink::new();
        node.boot(&mut sink);

        // Before the first measurement runs
        node.press_button(Button::A);
        assert!(node.step(&mut sink));
        assert_eq!(types(&sink), vec![("e".to_string(), ERR_NO_TEMPERATURE)]);
    }

    #[test]
    fn test_button_a_sends_negative_reading() {
        let mut node = node(5, SimulatedAht::new(-12.0, 80.0));
        let mut sink = MemorySink::new();
        node.boot(&mut sink);
        run_to(&mut node, 100, &mut sink);

        node.press_button(Button::A);
        node.poll(&mut sink);
        let sent = types(&sink);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "t");
        assert!((sent[0].1 + 12.0).abs() < 0.01);
        assert_eq!(sent[1].0, "h");
    }

    #[test]
    fn test_button_b() {
        let mut node = node(5, SimulatedAht::new(21.5, 48.0));
        let mut sink = MemorySink::new();
        node.press_button(Button::B);
        node.press_button(Button::B);
        node.poll(&mut sink);
        assert_eq!(node.verbosity(), Verbosity::TempOnly);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_relay_status_lines() {
        let mut node = node(7, SimulatedAht::new(21.5, 48.0));
        let mut sink = MemorySink::new();
        let codec = FrameCodec::new(node.config().protocol.key.clone());

        let frame = Frame::new(NodeId::new(5).unwrap(), MsgType::TEMPERATURE, 19.0);
        node.clock_mut().now = 1000;
        node.deliver(codec.encode_with_iv(&frame, 3));
        assert!(node.step(&mut sink));

        node.clock_mut().now += 500;
        node.deliver(codec.encode_with_iv(&frame, 4));
        // All-equal bytes decode to an all-zero frame
        node.deliver(WireFrame::from_bytes([0xA5; 19]));
        assert_eq!(node.poll(&mut sink), 2);

        let actions: Vec<_> = sink.lines().iter().map(|l| l.action_taken).collect();
        assert_eq!(
            actions,
            vec![Action::Forward, Action::RejectSeenRecently, Action::DecryptOrGarbage]
        );
        assert_eq!(sink.lines()[0].forwarded_via, vec![7]);
        assert_eq!(node.radio().sent.len(), 1);
    }

    #[test]
    fn test_exhausted_calibration_restarts() {
        let mut node = node(5, SimulatedAht::new(21.5, 48.0).with_calibrates(false).with_zero_reading(true));
        let mut sink = MemorySink::new();
        node.boot(&mut sink);
        assert_eq!(node.sensor().state().consecutive_calibration_failures, 1);

        // Each measurement sees a zero field and fails to re-init
        let mut t = 0;
        while node.boot_count() == 1 && t < 200_000 {
            t += 1000;
            run_to(&mut node, t, &mut sink);
        }

        assert_eq!(node.boot_count(), 2);
        let fatal: Vec<_> = types(&sink)
            .into_iter()
            .filter(|(t, v)| t == "e" && *v == ERR_RESTARTING)
            .collect();
        assert_eq!(fatal.len(), 1);
        // Counter starts over after the restart
        assert!(node.sensor().state().consecutive_calibration_failures < 10);
        assert_eq!(node.verbosity(), Verbosity::ShowAll);

        // A healthy sensor after the restart brings the node back
        node.sensor_bus_mut().set_calibrates(true);
        node.sensor_bus_mut().set_zero_reading(false);
        run_to(&mut node, t + 10_000, &mut sink);
        assert!((node.temperature() - 21.5).abs() < 0.01);
        assert_eq!(node.boot_count(), 2);
    }
}
