//! Simulated AHT sensor
//!
//! Answers the register protocol the driver speaks: soft reset, calibrate,
//! trigger, 1-byte status reads and 6-byte result reads. Used by the
//! simulator, the CLI node, and tests.

use super::{
    AHT_ADDRESS, CMD_CALIBRATE, CMD_SOFTRESET, CMD_TRIGGER, RESULT_LEN, STATUS_BUSY,
    STATUS_CALIBRATED,
};
use crate::error::BusError;
use crate::mesh::traits::SensorBus;

/// In-memory AHT sensor
#[derive(Debug, Clone)]
pub struct SimulatedAht {
    address: u8,
    temperature: f32,
    humidity: f32,
    calibrates: bool,
    calibrated: bool,
    busy_polls: u32,
    busy_remaining: u32,
    zero_reading: bool,
    offline: bool,
    writes: Vec<Vec<u8>>,
}

impl SimulatedAht {
    /// A healthy sensor reporting fixed values
    pub fn new(temperature: f32, humidity: f32) -> Self {
        Self {
            address: AHT_ADDRESS,
            temperature,
            humidity,
            calibrates: true,
            calibrated: false,
            busy_polls: 0,
            busy_remaining: 0,
            zero_reading: false,
            offline: false,
            writes: Vec::new(),
        }
    }

    /// Builder: whether calibration sets the calibrated flag
    pub fn with_calibrates(mut self, calibrates: bool) -> Self {
        self.calibrates = calibrates;
        self
    }

    /// Builder: status reads reporting busy after each command
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Builder: return an all-zero temperature field
    pub fn with_zero_reading(mut self, zero: bool) -> Self {
        self.zero_reading = zero;
        self
    }

    /// Builder: NACK every transfer
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Set whether calibration succeeds
    pub fn set_calibrates(&mut self, calibrates: bool) {
        self.calibrates = calibrates;
    }

    /// Set the malfunction signature on or off
    pub fn set_zero_reading(&mut self, zero: bool) {
        self.zero_reading = zero;
    }

    /// Change the simulated environment
    pub fn set_environment(&mut self, temperature: f32, humidity: f32) {
        self.temperature = temperature;
        self.humidity = humidity;
    }

    /// Every command written so far
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    fn status(&mut self) -> u8 {
        let mut status = 0;
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            status |= STATUS_BUSY;
        }
        if self.calibrated {
            status |= STATUS_CALIBRATED;
        }
        status
    }

    fn result(&mut self) -> [u8; RESULT_LEN] {
        let scale = f64::from(1u32 << 20);
        let h = ((f64::from(self.humidity.clamp(0.0, 100.0)) / 100.0 * scale) as u32).min(0xF_FFFF);
        let t: u32 = if self.zero_reading {
            0
        } else {
            let t = (f64::from(self.temperature.clamp(-50.0, 150.0)) + 50.0) / 200.0 * scale;
            (t as u32).min(0xF_FFFF)
        };

        [
            self.status(),
            (h >> 12) as u8,
            (h >> 4) as u8,
            (((h & 0x0F) << 4) | (t >> 16)) as u8,
            (t >> 8) as u8,
            t as u8,
        ]
    }
}

impl SensorBus for SimulatedAht {
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), BusError> {
        if self.offline || addr != self.address {
            return Err(BusError::Nack(addr));
        }
        self.writes.push(bytes.to_vec());

        if bytes == [CMD_SOFTRESET] {
            self.calibrated = false;
            self.busy_remaining = 0;
        } else if bytes == CMD_CALIBRATE {
            self.calibrated = self.calibrates;
            self.busy_remaining = self.busy_polls;
        } else if bytes == CMD_TRIGGER {
            self.busy_remaining = self.busy_polls;
        } else {
            return Err(BusError::Transfer(format!("unknown command {:02x?}", bytes)));
        }
        Ok(())
    }

    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), BusError> {
        if self.offline || addr != self.address {
            return Err(BusError::Nack(addr));
        }
        match buf.len() {
            1 => buf[0] = self.status(),
            RESULT_LEN => buf.copy_from_slice(&self.result()),
            n => return Err(BusError::Transfer(format!("unsupported read of {} bytes", n))),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::RawSample;

    #[test]
    fn test_result_encoding() {
        let mut aht = SimulatedAht::new(50.0, 50.0);
        aht.write(AHT_ADDRESS, &CMD_TRIGGER).unwrap();
        let mut buf = [0u8; RESULT_LEN];
        aht.read(AHT_ADDRESS, &mut buf).unwrap();
        assert_eq!(&buf[1..], &[0x80, 0x00, 0x08, 0x00, 0x00]);

        let sample = RawSample::unpack(&buf);
        assert_eq!(sample.temperature(), 50.0);
    }

    #[test]
    fn test_wrong_address_nacks() {
        let mut aht = SimulatedAht::new(20.0, 40.0);
        let mut buf = [0u8; 1];
        assert_eq!(aht.read(0x48, &mut buf), Err(BusError::Nack(0x48)));
        assert!(aht.write(AHT_ADDRESS, &[0x00]).is_err());
    }
}
