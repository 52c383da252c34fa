
use crate::state::Axis;

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl PidGains {
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }

    pub fn is_finite(&self) -> bool {
        self.kp.is_finite() && self.ki.is_finite() && self.kd.is_finite()
    }
}

/// Closed loop on one scalar error signal.
///
/// Inputs are trusted: non-finite errors never reach this type.
#[derive(Clone, Debug)]
pub struct PidController {
    gains: PidGains,
    integral: f32,
    integral_limit: f32,
    prev_error: f32,
    last_output: f32,
}

impl PidController {
    /// Default anti-windup bound when none is configured.
    pub const DEFAULT_INTEGRAL_LIMIT: f32 = 100.0;

    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self::with_gains(PidGains::new(kp, ki, kd), Self::DEFAULT_INTEGRAL_LIMIT)
    }

    pub fn with_gains(gains: PidGains, integral_limit: f32) -> Self {
        Self {
            gains,
            integral: 0.0,
            integral_limit: integral_limit.abs(),
            prev_error: 0.0,
            last_output: 0.0,
        }
    }

    /// Zeroes the controller memory. Gains are kept.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
        self.last_output = 0.0;
    }

    pub fn update(&mut self, error: f32, dt: f32) -> f32 {
        self.integral += error * dt;
        self.integral = self
            .integral
            .clamp(-self.integral_limit, self.integral_limit);

        let derivative = if dt > 0.0 {
            (error - self.prev_error) / dt
        } else {
            0.0
        };
        self.prev_error = error;

        let output =
            self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative;
        self.last_output = output;
        output
    }

    /// Swaps the gains in flight; integral and previous error are untouched.
    pub fn update_constants(&mut self, kp: f32, ki: f32, kd: f32) {
        self.gains = PidGains::new(kp, ki, kd);
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn prev_error(&self) -> f32 {
        self.prev_error
    }

    pub fn last_output(&self) -> f32 {
        self.last_output
    }
}

/// One controller per stabilised axis, indexed by [`Axis`].
#[derive(Clone, Debug)]
pub struct AxisControllers {
    axes: [PidController; 3],
}

impl AxisControllers {
    pub fn new(pitch: PidGains, roll: PidGains, yaw: PidGains, integral_limit: f32) -> Self {
        Self {
            axes: [
                PidController::with_gains(pitch, integral_limit),
                PidController::with_gains(roll, integral_limit),
                PidController::with_gains(yaw, integral_limit),
            ],
        }
    }

    pub fn get(&self, axis: Axis) -> &PidController {
        &self.axes[axis.index()]
    }

    pub fn get_mut(&mut self, axis: Axis) -> &mut PidController {
        &mut self.axes[axis.index()]
    }

    pub fn update(&mut self, axis: Axis, error: f32, dt: f32) -> f32 {
        self.get_mut(axis).update(error, dt)
    }

    pub fn reset(&mut self) {
        for pid in self.axes.iter_mut() {
            pid.reset();
        }
    }
}
