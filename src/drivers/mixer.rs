use crate::config::{MOTOR_STOP, SATURATION_REPORT_TICKS, THROTTLE_MAX};

pub const MOTOR_COUNT: usize = 4;

/// Frame geometry. Motor order for `QuadX`: front-left, front-right,
/// rear-right, rear-left. For `QuadPlus`: front, right, rear, left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MixerLayout {
    QuadX,
    QuadPlus,
}

impl MixerLayout {
    /// Per motor `[roll, pitch, yaw]` factors.
    ///
    /// Positive roll raises the left side, positive pitch raises the nose,
    /// positive yaw turns the nose right (props spinning against it speed up).
    #[rustfmt::skip]
    fn factors(self) -> [[f32; 3]; MOTOR_COUNT] {
        match self {
            Self::QuadX => [
                [ 1.0,  1.0, -1.0],
                [-1.0,  1.0,  1.0],
                [-1.0, -1.0, -1.0],
                [ 1.0, -1.0,  1.0],
            ],
            Self::QuadPlus => [
                [ 0.0,  1.0, -1.0],
                [-1.0,  0.0,  1.0],
                [ 0.0, -1.0, -1.0],
                [ 1.0,  0.0,  1.0],
            ],
        }
    }
}

/// Valid motor command range (inclusive).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DutyRange {
    /// Armed idle
    pub min: u16,
    pub max: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorOutputs {
    pub duty: [u16; MOTOR_COUNT],
    /// Motors whose mixed value had to be clamped this tick
    pub saturated: [bool; MOTOR_COUNT],
}

impl MotorOutputs {
    /// Disarmed: every motor receives the stop command.
    pub const fn stopped() -> Self {
        Self {
            duty: [MOTOR_STOP; MOTOR_COUNT],
            saturated: [false; MOTOR_COUNT],
        }
    }

    pub fn any_saturated(&self) -> bool {
        self.saturated.iter().any(|&s| s)
    }
}

impl Default for MotorOutputs {
    fn default() -> Self {
        Self::stopped()
    }
}

pub struct MotorMixer {
    layout: MixerLayout,
    range: DutyRange,
    saturated_ticks: u32,
}

impl MotorMixer {
    pub fn new(layout: MixerLayout, range: DutyRange) -> Self {
        Self {
            layout,
            range,
            saturated_ticks: 0,
        }
    }

    pub fn range(&self) -> DutyRange {
        self.range
    }

    /// `throttle` is in 0..=THROTTLE_MAX, axis terms are in duty units.
    pub fn mix(&mut self, throttle: u16, pitch: f32, roll: f32, yaw: f32) -> MotorOutputs {
        let min = self.range.min as f32;
        let max = self.range.max as f32;

        // No correction may spin a motor up from zero throttle.
        if throttle == 0 {
            self.saturated_ticks = 0;
            return MotorOutputs {
                duty: [self.range.min; MOTOR_COUNT],
                saturated: [false; MOTOR_COUNT],
            };
        }

        let t = throttle.min(THROTTLE_MAX) as f32 / THROTTLE_MAX as f32;
        let base = min + t * (max - min);

        let mut out = MotorOutputs {
            duty: [self.range.min; MOTOR_COUNT],
            saturated: [false; MOTOR_COUNT],
        };
        for (i, [kr, kp, ky]) in self.layout.factors().into_iter().enumerate() {
            let value = base + kr * roll + kp * pitch + ky * yaw;
            out.saturated[i] = value < min || value > max || !value.is_finite();
            out.duty[i] = if value.is_finite() {
                value.clamp(min, max) as u16
            } else {
                self.range.min
            };
        }

        if out.any_saturated() {
            self.saturated_ticks = self.saturated_ticks.saturating_add(1);
        } else {
            self.saturated_ticks = 0;
        }
        out
    }

    pub fn saturated_ticks(&self) -> u32 {
        self.saturated_ticks
    }

    /// True once saturation has lasted `SATURATION_REPORT_TICKS` in a row.
    pub fn is_saturation_sustained(&self) -> bool {
        self.saturated_ticks >= SATURATION_REPORT_TICKS
    }

    pub fn reset(&mut self) {
        self.saturated_ticks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer(layout: MixerLayout) -> MotorMixer {
        MotorMixer::new(layout, DutyRange { min: 48, max: 2047 })
    }

    #[test]
    fn zero_throttle_forces_idle() {
        let mut m = mixer(MixerLayout::QuadX);
        let out = m.mix(0, 5.0, -3.0, 1.0);
        assert_eq!(out.duty, [48; MOTOR_COUNT]);
        assert!(!out.any_saturated());
    }

    #[test]
    fn level_hover_is_symmetric() {
        let mut m = mixer(MixerLayout::QuadX);
        let out = m.mix(500, 0.0, 0.0, 0.0);
        let expected = (48.0 + 0.5 * (2047.0 - 48.0)) as u16;
        assert_eq!(out.duty, [expected; MOTOR_COUNT]);
    }

    #[test]
    fn roll_raises_left_side() {
        let mut m = mixer(MixerLayout::QuadX);
        let out = m.mix(500, 0.0, 100.0, 0.0);
        // front-left and rear-left above front-right and rear-right
        assert!(out.duty[0] > out.duty[1]);
        assert!(out.duty[3] > out.duty[2]);
    }

    #[test]
    fn pitch_raises_front_on_plus_frame() {
        let mut m = mixer(MixerLayout::QuadPlus);
        let hover = m.mix(500, 0.0, 0.0, 0.0);
        let out = m.mix(500, 100.0, 0.0, 0.0);
        assert!(out.duty[0] > hover.duty[0]);
        assert!(out.duty[2] < hover.duty[2]);
        assert_eq!(out.duty[1], hover.duty[1]);
        assert_eq!(out.duty[3], hover.duty[3]);
    }

    #[test]
    fn clamps_and_flags_saturation() {
        let mut m = mixer(MixerLayout::QuadX);
        let out = m.mix(1000, 0.0, 500.0, 0.0);
        assert_eq!(out.duty[0], 2047);
        assert!(out.saturated[0]);
        assert!(out.saturated[3]);
        assert!(!out.saturated[1]);
        assert_eq!(m.saturated_ticks(), 1);
    }

    #[test]
    fn low_side_saturates_at_idle_not_wrapping() {
        let mut m = mixer(MixerLayout::QuadX);
        let out = m.mix(10, 0.0, -1000.0, 0.0);
        assert_eq!(out.duty[0], 48);
        assert!(out.saturated[0]);
    }

    #[test]
    fn sustained_saturation_is_reported() {
        let mut m = mixer(MixerLayout::QuadX);
        for _ in 0..SATURATION_REPORT_TICKS {
            m.mix(1000, 0.0, 500.0, 0.0);
        }
        assert!(m.is_saturation_sustained());

        m.mix(500, 0.0, 0.0, 0.0);
        assert!(!m.is_saturation_sustained());
    }
}
