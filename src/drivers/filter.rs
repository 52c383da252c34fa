#[cfg_attr(test, allow(unused_imports))]
use micromath::F32Ext;

/// Exponential smoothing with a fixed weight.
pub struct LowPassFilter {
    alpha: f32,
    last_output: f32,
    initialized: bool,
}

impl LowPassFilter {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            last_output: 0.0,
            initialized: false,
        }
    }

    pub fn filter(&mut self, input: f32) -> f32 {
        if !self.initialized {
            self.last_output = input;
            self.initialized = true;
        } else {
            self.last_output = self.alpha * input + (1.0 - self.alpha) * self.last_output;
        }
        self.last_output
    }

    pub fn value(&self) -> Option<f32> {
        self.initialized.then_some(self.last_output)
    }

    pub fn reset(&mut self) {
        self.initialized = false;
    }
}

/// PT1 Filter (First order low pass)
/// Frequency based alpha calculation
pub struct Pt1Filter {
    alpha: f32,
    state: f32,
    initialized: bool,
}

impl Pt1Filter {
    pub fn new(cutoff_freq: f32, sample_rate: f32) -> Self {
        let dt = 1.0 / sample_rate;
        let rc = 1.0 / (2.0 * core::f32::consts::PI * cutoff_freq);
        let alpha = dt / (rc + dt);
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            state: 0.0,
            initialized: false,
        }
    }

    pub fn filter(&mut self, input: f32) -> f32 {
        if !self.initialized {
            self.state = input;
            self.initialized = true;
        } else {
            self.state += self.alpha * (input - self.state);
        }
        self.state
    }

    pub fn reset(&mut self) {
        self.initialized = false;
    }
}

/// Gyro/accelerometer fusion for one tilt axis.
///
/// `angle = alpha * (angle + rate * dt) + (1 - alpha) * accel_angle`
pub struct ComplementaryFilter {
    alpha: f32,
    angle: f32,
}

impl ComplementaryFilter {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            angle: 0.0,
        }
    }

    /// `rate` in °/s, `accel_angle` in degrees.
    pub fn update(&mut self, rate: f32, accel_angle: f32, dt: f32) -> f32 {
        let gyro_angle = self.angle + rate * dt;
        self.angle = self.alpha * gyro_angle + (1.0 - self.alpha) * accel_angle;
        self.angle
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn reset(&mut self, angle: f32) {
        self.angle = angle;
    }
}

/// Tilt angles (roll, pitch) in degrees from a gravity vector in g.
pub fn accel_to_angles(ax: f32, ay: f32, az: f32) -> (f32, f32) {
    let pitch = (-ax).atan2((ay * ay + az * az).sqrt()).to_degrees();
    let roll = ay.atan2(az).to_degrees();
    (roll, pitch)
}
