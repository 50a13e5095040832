//! Temperature/humidity acquisition
//!
//! Drives an AHT-family sensor over a [`SensorBus`]:
//!
//! ```text
//! Uninitialized ─► Calibrating ─┬─► Calibrated
//!                               └─► CalibrationFailed ─► (next init) Calibrating
//! ```
//!
//! `init()` busy-waits on the sensor without a timeout. A sensor stuck busy
//! hangs the node; this matches deployed behavior and is a known liveness
//! risk. `read()` polls a bounded number of times.
//!
//! A temperature raw field of exactly zero is a malfunction signature. The
//! reading is discarded, the sensor re-initialized, and the outcome reported
//! as [`Measurement::Recalibrated`].

mod sim;

pub use sim::SimulatedAht;

use crate::error::{BusError, SensorError};
use crate::mesh::traits::{Clock, SensorBus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default I2C address
pub const AHT_ADDRESS: u8 = 0x38;

/// Soft reset command
pub const CMD_SOFTRESET: u8 = 0xBA;

/// Calibrate command
pub const CMD_CALIBRATE: [u8; 3] = [0xE1, 0x08, 0x00];

/// Trigger measurement command
pub const CMD_TRIGGER: [u8; 3] = [0xAC, 0x33, 0x00];

/// Status bit: measurement or calibration in progress
pub const STATUS_BUSY: u8 = 0x80;

/// Status bit: calibration coefficients loaded
pub const STATUS_CALIBRATED: u8 = 0x08;

/// Reserved temperature reported after a successful runtime recalibration
pub const CALIBRATION_SUCCESS_TEMP: f32 = -50.0;

/// Reserved temperature reported after a failed runtime recalibration
pub const CALIBRATION_FAILED_TEMP: f32 = -49.0;

/// Length of the measurement result register
pub const RESULT_LEN: usize = 6;

/// Sensor address, timing and retry limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// I2C address
    pub address: u8,
    /// Wait after soft reset, ms
    pub settle_ms: u64,
    /// Wait between busy polls during calibration, ms
    pub busy_poll_ms: u64,
    /// Wait after calibration completes before checking the flag, ms
    pub post_calibrate_ms: u64,
    /// Wait after triggering a measurement, ms
    pub measure_wait_ms: u64,
    /// Wait between busy polls during a read, ms
    pub read_poll_ms: u64,
    /// Busy polls allowed during a read
    pub read_attempts: u32,
    /// Consecutive calibration failures before the node restarts
    pub max_calibration_failures: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            address: AHT_ADDRESS,
            settle_ms: 20,
            busy_poll_ms: 10,
            post_calibrate_ms: 10,
            measure_wait_ms: 90,
            read_poll_ms: 20,
            read_attempts: 5,
            max_calibration_failures: 10,
        }
    }
}

/// Calibration bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorState {
    /// Last init succeeded
    pub calibrated: bool,
    /// Failed inits since the last success
    pub consecutive_calibration_failures: u32,
}

/// Result of one `init()` run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationOutcome {
    /// Calibrated flag set; failure counter reset
    Calibrated,
    /// Calibrated flag clear
    Failed {
        /// Failures counted so far, including this one
        consecutive: u32,
    },
    /// Failure limit reached; the node must restart
    Exhausted,
}

/// One measurement as seen by the node
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    /// A physical reading
    Reading {
        /// Degrees Celsius
        temperature: f32,
        /// Relative humidity, percent
        humidity: f32,
    },
    /// The reading was a malfunction signature and the sensor was re-initialized
    Recalibrated {
        /// Whether the re-init succeeded
        success: bool,
    },
}

impl Measurement {
    /// Temperature, with recalibrations mapped to their reserved sentinels
    pub fn temperature(&self) -> f32 {
        match self {
            Measurement::Reading { temperature, .. } => *temperature,
            Measurement::Recalibrated { success: true } => CALIBRATION_SUCCESS_TEMP,
            Measurement::Recalibrated { success: false } => CALIBRATION_FAILED_TEMP,
        }
    }

    /// Humidity, when the measurement carried one
    pub fn humidity(&self) -> Option<f32> {
        match self {
            Measurement::Reading { humidity, .. } => Some(*humidity),
            Measurement::Recalibrated { .. } => None,
        }
    }
}

/// Decoded contents of the result register
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    /// 20-bit humidity field
    pub humidity_raw: u32,
    /// 20-bit temperature field
    pub temperature_raw: u32,
}

impl RawSample {
    /// Unpack the two 20-bit fields from a result register
    pub fn unpack(buf: &[u8; RESULT_LEN]) -> Self {
        let humidity_raw =
            (u32::from(buf[1]) << 12) | (u32::from(buf[2]) << 4) | (u32::from(buf[3]) >> 4);
        let temperature_raw =
            (u32::from(buf[3] & 0x0F) << 16) | (u32::from(buf[4]) << 8) | u32::from(buf[5]);
        Self {
            humidity_raw,
            temperature_raw,
        }
    }

    /// Relative humidity in percent, [0, 100)
    pub fn humidity(&self) -> f32 {
        (f64::from(self.humidity_raw) * 100.0 / f64::from(1u32 << 20)) as f32
    }

    /// Temperature in degrees Celsius, [-50, 150)
    pub fn temperature(&self) -> f32 {
        (f64::from(self.temperature_raw) / f64::from(1u32 << 20) * 200.0 - 50.0) as f32
    }
}

/// AHT sensor driver with calibration failure tracking
#[derive(Debug)]
pub struct SensorAcquisition<B> {
    bus: B,
    config: SensorConfig,
    state: SensorState,
}

impl<B: SensorBus> SensorAcquisition<B> {
    /// Wrap a bus
    pub fn new(bus: B, config: SensorConfig) -> Self {
        Self {
            bus,
            config,
            state: SensorState::default(),
        }
    }

    /// Calibration bookkeeping
    pub fn state(&self) -> SensorState {
        self.state
    }

    /// Forget calibration history, as after a device reset
    pub fn reset_state(&mut self) {
        self.state = SensorState::default();
    }

    /// Underlying bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Underlying bus, mutably
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Reset and calibrate the sensor
    ///
    /// A bus error counts as a failed calibration attempt.
    pub fn init<C: Clock + ?Sized>(&mut self, clock: &mut C) -> CalibrationOutcome {
        info!("sensor reset and calibration");
        let calibrated = match self.calibrate(clock) {
            Ok(calibrated) => calibrated,
            Err(e) => {
                warn!("sensor calibration bus error: {}", e);
                false
            }
        };

        if calibrated {
            info!("sensor calibrated");
            self.state = SensorState {
                calibrated: true,
                consecutive_calibration_failures: 0,
            };
            return CalibrationOutcome::Calibrated;
        }

        self.state.calibrated = false;
        self.state.consecutive_calibration_failures += 1;
        let consecutive = self.state.consecutive_calibration_failures;
        warn!(consecutive, "sensor NOT calibrated");
        if consecutive >= self.config.max_calibration_failures {
            warn!(consecutive, "sensor calibration failure limit reached");
            CalibrationOutcome::Exhausted
        } else {
            CalibrationOutcome::Failed { consecutive }
        }
    }

    fn calibrate<C: Clock + ?Sized>(&mut self, clock: &mut C) -> Result<bool, BusError> {
        let addr = self.config.address;
        self.bus.write(addr, &[CMD_SOFTRESET])?;
        clock.delay(Duration::from_millis(self.config.settle_ms));
        self.bus.write(addr, &CMD_CALIBRATE)?;

        while self.status()? & STATUS_BUSY != 0 {
            debug!("sensor busy, waiting");
            clock.delay(Duration::from_millis(self.config.busy_poll_ms));
        }
        clock.delay(Duration::from_millis(self.config.post_calibrate_ms));

        Ok(self.status()? & STATUS_CALIBRATED != 0)
    }

    fn status(&mut self) -> Result<u8, BusError> {
        let mut status = [0u8; 1];
        self.bus.read(self.config.address, &mut status)?;
        Ok(status[0])
    }

    /// Trigger and read one measurement
    ///
    /// Fails with [`SensorError::CalibrationExhausted`] when a zero reading
    /// forced a re-init that hit the failure limit.
    pub fn read<C: Clock + ?Sized>(&mut self, clock: &mut C) -> Result<Measurement, SensorError> {
        let addr = self.config.address;
        self.bus.write(addr, &CMD_TRIGGER)?;
        clock.delay(Duration::from_millis(self.config.measure_wait_ms));

        for attempt in 0..self.config.read_attempts {
            if self.status()? & STATUS_BUSY == 0 {
                break;
            }
            clock.delay(Duration::from_millis(self.config.read_poll_ms));
            debug!(attempt, attempts = self.config.read_attempts, "sensor slow to finish");
        }

        let mut buf = [0u8; RESULT_LEN];
        self.bus.read(addr, &mut buf)?;
        let sample = RawSample::unpack(&buf);
        debug!(
            humidity = sample.humidity(),
            temperature = sample.temperature(),
            "sensor sample"
        );

        if sample.temperature_raw == 0 {
            warn!("zero temperature field, re-initializing sensor");
            return match self.init(clock) {
                CalibrationOutcome::Calibrated => Ok(Measurement::Recalibrated { success: true }),
                CalibrationOutcome::Failed { .. } => Ok(Measurement::Recalibrated { success: false }),
                CalibrationOutcome::Exhausted => Err(SensorError::CalibrationExhausted {
                    failures: self.state.consecutive_calibration_failures,
                }),
            };
        }

        Ok(Measurement::Reading {
            temperature: sample.temperature(),
            humidity: sample.humidity(),
        })
    }
}
