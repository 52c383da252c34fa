//! Collaborator interfaces implemented by the board layer.
//!
//! Implementations must not block beyond the tick budget; the core never
//! retries a read inside a tick.

use crate::state::{AccelVector, GyroVector};

/// Transient failure reported by a sensor read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorFault {
    /// SPI/I2C transfer failed
    Bus,
    /// Reading outside the physical range of the part
    OutOfRange,
    /// No fresh sample available yet
    NotReady,
}

pub trait InertialSensor {
    /// Angular rates in °/s
    fn read_gyro(&mut self) -> Result<GyroVector, SensorFault>;
    /// Specific force in g
    fn read_accel(&mut self) -> Result<AccelVector, SensorFault>;
}

pub trait BatterySensor {
    /// Pack voltage in volts
    fn read_battery(&mut self) -> Result<f32, SensorFault>;
}

pub trait MotorOutput {
    /// `duty` is already inside the valid range; the driver must not clamp.
    fn write_duty(&mut self, motor_index: usize, duty: u16);
}
