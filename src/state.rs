//! Value types passed between the sensor layer, the link and the state machine.
//!
//! All types are `Copy`: a tick builds them fresh and drops them afterwards.

#[cfg_attr(test, allow(unused_imports))]
use micromath::F32Ext;

// ── Sensor samples ────────────────────────────────────────────────────────────

/// Angular rates in °/s.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GyroVector {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl GyroVector {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(roll: f32, pitch: f32, yaw: f32) -> Self {
        Self { roll, pitch, yaw }
    }

    pub fn magnitude(&self) -> f32 {
        (self.roll * self.roll + self.pitch * self.pitch + self.yaw * self.yaw).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.roll.is_finite() && self.pitch.is_finite() && self.yaw.is_finite()
    }

    pub fn sub(&self, other: &Self) -> Self {
        Self::new(self.roll - other.roll, self.pitch - other.pitch, self.yaw - other.yaw)
    }

    pub fn as_array(&self) -> [f32; 3] {
        [self.roll, self.pitch, self.yaw]
    }
}

/// Specific force in g, body frame.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AccelVector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl AccelVector {
    /// Resting on a level surface.
    pub const LEVEL: Self = Self::new(0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Default for AccelVector {
    fn default() -> Self {
        Self::LEVEL
    }
}

/// Estimated attitude. Roll and pitch in degrees; yaw is a rate in °/s since
/// there is no heading reference on board.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DroneAngles {
    pub roll: f32,
    pub pitch: f32,
    pub yaw_rate: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryStatus {
    /// Filtered pack voltage (V)
    pub voltage: f32,
    /// 0..=100 %
    pub level: u8,
    /// False until the first successful read
    pub valid: bool,
}

/// Everything the guards look at, rebuilt every tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DroneData {
    pub now_us: u64,
    /// Seconds since the previous tick (already clamped)
    pub dt: f32,
    pub angles: DroneAngles,
    /// Bias-corrected rates
    pub rates: GyroVector,
    /// Rates before the bias is removed, used while calibrating
    pub raw_rates: GyroVector,
    pub battery: BatteryStatus,
    /// Time since the last valid frame, `None` if nothing was ever received
    pub link_age_us: Option<u64>,
    pub is_still: bool,
    /// Consecutive IMU failures exceeded the configured limit
    pub sensor_fault: bool,
}

// ── Operator intent ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Command {
    /// Degrees
    pub roll: f32,
    /// Degrees
    pub pitch: f32,
    /// °/s
    pub yaw_rate: f32,
    /// 0..=THROTTLE_MAX
    pub throttle: u16,
    pub sequence: u16,
}

impl Command {
    pub const fn neutral() -> Self {
        Self {
            roll: 0.0,
            pitch: 0.0,
            yaw_rate: 0.0,
            throttle: 0,
            sequence: 0,
        }
    }

    /// Linear blend from `self` towards `target`, `t` in 0..=1.
    pub fn blend(&self, target: &Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let throttle = self.throttle as f32 + (target.throttle as f32 - self.throttle as f32) * t;
        Self {
            roll: self.roll + (target.roll - self.roll) * t,
            pitch: self.pitch + (target.pitch - self.pitch) * t,
            yaw_rate: self.yaw_rate + (target.yaw_rate - self.yaw_rate) * t,
            throttle: throttle.round() as u16,
            sequence: target.sequence,
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Self::neutral()
    }
}

/// Stabilised axis. The discriminant is the axis id used on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Axis {
    Pitch = 0,
    Roll = 1,
    Yaw = 2,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Pitch, Axis::Roll, Axis::Yaw];

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Pitch),
            1 => Some(Self::Roll),
            2 => Some(Self::Yaw),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_ramps_every_setpoint() {
        let from = Command::neutral();
        let to = Command {
            roll: 10.0,
            pitch: -20.0,
            yaw_rate: 40.0,
            throttle: 500,
            sequence: 7,
        };

        let half = from.blend(&to, 0.5);
        assert_eq!(half.roll, 5.0);
        assert_eq!(half.pitch, -10.0);
        assert_eq!(half.yaw_rate, 20.0);
        assert_eq!(half.throttle, 250);
        assert_eq!(half.sequence, 7);

        assert_eq!(from.blend(&to, 3.0), to);
    }

    #[test]
    fn axis_ids_match_wire_values() {
        for axis in Axis::ALL {
            assert_eq!(Axis::from_id(axis as u8), Some(axis));
        }
        assert_eq!(Axis::from_id(3), None);
    }

    #[test]
    fn gyro_magnitude() {
        assert_eq!(GyroVector::new(3.0, 4.0, 0.0).magnitude(), 5.0);
        assert!(!GyroVector::new(f32::NAN, 0.0, 0.0).is_finite());
    }
}
