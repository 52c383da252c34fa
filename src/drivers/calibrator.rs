use crate::state::GyroVector;

/// Gyro bias estimation over one contiguous still interval.
///
/// Progress only grows on still ticks; any motion throws the interval away,
/// so the bias never mixes samples from disjoint windows.
pub struct Calibrator {
    calibration_time_us: u64,
    variance_threshold: f32,
    still_threshold_dps: f32,

    progress_us: u64,
    last_still_us: Option<u64>,

    // Welford running statistics per axis
    samples: u32,
    mean: [f32; 3],
    m2: [f32; 3],
}

impl Calibrator {
    pub fn new(calibration_time_us: u64, variance_threshold: f32, still_threshold_dps: f32) -> Self {
        Self {
            calibration_time_us,
            variance_threshold,
            still_threshold_dps,
            progress_us: 0,
            last_still_us: None,
            samples: 0,
            mean: [0.0; 3],
            m2: [0.0; 3],
        }
    }

    pub fn is_drone_still(&self, rates: &GyroVector) -> bool {
        rates.magnitude() < self.still_threshold_dps
    }

    /// Adds one still sample taken at `now_us`.
    ///
    /// The first sample of an interval only starts the clock.
    pub fn update_progress(&mut self, rates: &GyroVector, now_us: u64) {
        if let Some(last) = self.last_still_us {
            self.progress_us = self
                .progress_us
                .saturating_add(now_us.saturating_sub(last));
        }
        self.last_still_us = Some(now_us);

        self.samples += 1;
        let n = self.samples as f32;
        for (i, x) in rates.as_array().into_iter().enumerate() {
            let delta = x - self.mean[i];
            self.mean[i] += delta / n;
            self.m2[i] += delta * (x - self.mean[i]);
        }
    }

    /// Motion seen: restart from scratch.
    pub fn reset_progress(&mut self) {
        self.progress_us = 0;
        self.last_still_us = None;
        self.samples = 0;
        self.mean = [0.0; 3];
        self.m2 = [0.0; 3];
    }

    pub fn progress_us(&self) -> u64 {
        self.progress_us
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Largest per-axis sample variance of the current interval.
    pub fn max_variance(&self) -> f32 {
        if self.samples < 2 {
            return f32::INFINITY;
        }
        let n = (self.samples - 1) as f32;
        self.m2.iter().fold(0.0f32, |acc, m2| acc.max(m2 / n))
    }

    pub fn is_finished(&self) -> bool {
        self.progress_us >= self.calibration_time_us
            && self.max_variance() < self.variance_threshold
    }

    /// Mean rate over the interval, i.e. the gyro bias.
    pub fn bias(&self) -> GyroVector {
        GyroVector::new(self.mean[0], self.mean[1], self.mean[2])
    }
}
