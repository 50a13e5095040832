//! Hardware-facing traits
//!
//! The relay and sensor logic only touch the outside world through these
//! narrow interfaces, so the same node code runs on a device, over a local
//! UDP socket, or inside the simulator.

use super::cipher::WireFrame;
use crate::error::{BusError, RadioError};
use std::time::Duration;

/// Broadcast radio transport
///
/// Sends a fixed-size opaque buffer to every node in range. There is no
/// delivery guarantee and no addressing beyond what the frame carries.
pub trait Radio {
    /// Transmit one wire frame
    fn send(&mut self, frame: &WireFrame) -> Result<(), RadioError>;

    /// Radio group (channel) this transport is tuned to
    fn group(&self) -> u8 {
        0
    }
}

/// Node time source and cooperative wait
///
/// `delay` is a suspension point: on a device it blocks, in the simulator
/// it advances virtual time.
pub trait Clock {
    /// Milliseconds since node start
    fn now_ms(&self) -> u64;

    /// Wait for `duration`
    fn delay(&mut self, duration: Duration);
}

/// Register-level sensor bus (I2C)
pub trait SensorBus {
    /// Write bytes to the device at `addr`
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), BusError>;

    /// Fill `buf` from the device at `addr`
    fn read(&mut self, addr: u8, buf: &mut [u8]) -> Result<(), BusError>;
}

impl<T: Radio + ?Sized> Radio for &mut T {
    fn send(&mut self, frame: &WireFrame) -> Result<(), RadioError> {
        (**self).send(frame)
    }

    fn group(&self) -> u8 {
        (**self).group()
    }
}

impl<T: Clock + ?Sized> Clock for &mut T {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn delay(&mut self, duration: Duration) {
        (**self).delay(duration)
    }
}
