
use crate::config::{
    ACCEL_RANGE_G, COMPLEMENTARY_ALPHA, CONTROL_LOOP_HZ, GYRO_RANGE_DPS,
};
use crate::drivers::battery::BatteryMonitor;
use crate::drivers::filter::{accel_to_angles, ComplementaryFilter, Pt1Filter};
use crate::io::{BatterySensor, InertialSensor, SensorFault};
use crate::state::{AccelVector, BatteryStatus, DroneAngles, GyroVector};

/// Yaw rate smoothing cutoff (Hz)
const YAW_RATE_LPF_CUTOFF: f32 = 30.0;

/// Result of one [`AttitudeSource::sample`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttitudeSample {
    pub angles: DroneAngles,
    pub rates: GyroVector,
    pub raw_rates: GyroVector,
    pub battery: BatteryStatus,
    /// Last-known-good values were substituted this tick
    pub substituted: bool,
    pub consecutive_failures: u16,
}

/// Turns raw IMU/battery reads into the attitude estimate.
pub struct AttitudeSource {
    gyro_offset: GyroVector,
    roll: ComplementaryFilter,
    pitch: ComplementaryFilter,
    yaw_rate: Pt1Filter,
    angles: DroneAngles,
    battery: BatteryMonitor,

    last_gyro: GyroVector,
    last_accel: AccelVector,
    consecutive_failures: u16,
}

impl AttitudeSource {
    pub fn new() -> Self {
        Self {
            gyro_offset: GyroVector::ZERO,
            roll: ComplementaryFilter::new(COMPLEMENTARY_ALPHA),
            pitch: ComplementaryFilter::new(COMPLEMENTARY_ALPHA),
            yaw_rate: Pt1Filter::new(YAW_RATE_LPF_CUTOFF, CONTROL_LOOP_HZ as f32),
            angles: DroneAngles::default(),
            battery: BatteryMonitor::new(),
            last_gyro: GyroVector::ZERO,
            last_accel: AccelVector::LEVEL,
            consecutive_failures: 0,
        }
    }

    /// Installs the calibrated gyro bias.
    pub fn set_gyro_offset(&mut self, offset: GyroVector) {
        self.gyro_offset = offset;
    }

    pub fn gyro_offset(&self) -> GyroVector {
        self.gyro_offset
    }

    pub fn angles(&self) -> DroneAngles {
        self.angles
    }

    pub fn consecutive_failures(&self) -> u16 {
        self.consecutive_failures
    }

    /// Reads every sensor once and advances the estimate by `dt` seconds.
    pub fn sample<S, B>(&mut self, imu: &mut S, battery: &mut B, dt: f32) -> AttitudeSample
    where
        S: InertialSensor,
        B: BatterySensor,
    {
        let gyro = imu.read_gyro().and_then(validate_gyro);
        let accel = imu.read_accel().and_then(validate_accel);

        let substituted = match (gyro, accel) {
            (Ok(g), Ok(a)) => {
                self.last_gyro = g;
                self.last_accel = a;
                self.consecutive_failures = 0;
                false
            }
            (g, a) => {
                // Keep whichever half is still good.
                if let Ok(g) = g {
                    self.last_gyro = g;
                }
                if let Ok(a) = a {
                    self.last_accel = a;
                }
                let fault = g.err().or(a.err());
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                debug!(
                    "imu read failed ({} in a row): {}",
                    self.consecutive_failures,
                    fault
                );
                true
            }
        };

        let battery_reading = match battery.read_battery() {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("battery read failed: {}", e);
                None
            }
        };
        let battery = self.battery.update(battery_reading);

        let raw_rates = self.last_gyro;
        let rates = raw_rates.sub(&self.gyro_offset);
        let accel = self.last_accel;

        let (accel_roll, accel_pitch) = accel_to_angles(accel.x, accel.y, accel.z);
        self.angles = DroneAngles {
            roll: self.roll.update(rates.roll, accel_roll, dt),
            pitch: self.pitch.update(rates.pitch, accel_pitch, dt),
            yaw_rate: self.yaw_rate.filter(rates.yaw),
        };

        AttitudeSample {
            angles: self.angles,
            rates,
            raw_rates,
            battery,
            substituted,
            consecutive_failures: self.consecutive_failures,
        }
    }
}

impl Default for AttitudeSource {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_gyro(g: GyroVector) -> Result<GyroVector, SensorFault> {
    let in_range = g.as_array().iter().all(|r| r.abs() <= GYRO_RANGE_DPS);
    if g.is_finite() && in_range {
        Ok(g)
    } else {
        Err(SensorFault::OutOfRange)
    }
}

fn validate_accel(a: AccelVector) -> Result<AccelVector, SensorFault> {
    let in_range = [a.x, a.y, a.z].iter().all(|v| v.abs() <= ACCEL_RANGE_G);
    if a.is_finite() && in_range {
        Ok(a)
    } else {
        Err(SensorFault::OutOfRange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeImu {
        gyro: Result<GyroVector, SensorFault>,
        accel: Result<AccelVector, SensorFault>,
    }

    impl InertialSensor for FakeImu {
        fn read_gyro(&mut self) -> Result<GyroVector, SensorFault> {
            self.gyro
        }
        fn read_accel(&mut self) -> Result<AccelVector, SensorFault> {
            self.accel
        }
    }

    struct FakeBattery(Result<f32, SensorFault>);

    impl BatterySensor for FakeBattery {
        fn read_battery(&mut self) -> Result<f32, SensorFault> {
            self.0
        }
    }

    fn level_imu() -> FakeImu {
        FakeImu {
            gyro: Ok(GyroVector::ZERO),
            accel: Ok(AccelVector::LEVEL),
        }
    }

    #[test]
    fn level_sample() {
        let mut source = AttitudeSource::new();
        let sample = source.sample(&mut level_imu(), &mut FakeBattery(Ok(4.0)), 0.005);
        assert!(!sample.substituted);
        assert!(sample.angles.roll.abs() < 1e-4);
        assert!(sample.battery.valid);
    }

    #[test]
    fn offset_is_removed_from_rates() {
        let mut source = AttitudeSource::new();
        let mut imu = level_imu();
        imu.gyro = Ok(GyroVector::new(1.5, -0.5, 0.25));
        source.set_gyro_offset(GyroVector::new(1.5, -0.5, 0.25));

        let sample = source.sample(&mut imu, &mut FakeBattery(Ok(4.0)), 0.005);
        assert_eq!(sample.rates, GyroVector::ZERO);
        assert_eq!(sample.raw_rates, GyroVector::new(1.5, -0.5, 0.25));
    }

    #[test]
    fn gyro_rate_tilts_estimate() {
        let mut source = AttitudeSource::new();
        let mut imu = level_imu();
        imu.gyro = Ok(GyroVector::new(0.0, 100.0, 0.0));
        let sample = source.sample(&mut imu, &mut FakeBattery(Ok(4.0)), 0.01);
        assert!((sample.angles.pitch - 0.97).abs() < 1e-4);
        assert_eq!(sample.angles.roll, 0.0);
    }

    #[test]
    fn faults_substitute_last_good_sample() {
        let mut source = AttitudeSource::new();
        let mut imu = level_imu();
        imu.gyro = Ok(GyroVector::new(1.0, 0.0, 0.0));
        source.sample(&mut imu, &mut FakeBattery(Ok(4.0)), 0.005);

        imu.gyro = Err(SensorFault::Bus);
        let sample = source.sample(&mut imu, &mut FakeBattery(Ok(4.0)), 0.005);
        assert!(sample.substituted);
        assert_eq!(sample.raw_rates, GyroVector::new(1.0, 0.0, 0.0));
        assert_eq!(sample.consecutive_failures, 1);

        imu.gyro = Ok(GyroVector::ZERO);
        let sample = source.sample(&mut imu, &mut FakeBattery(Ok(4.0)), 0.005);
        assert_eq!(sample.consecutive_failures, 0);
    }

    #[test]
    fn non_finite_and_out_of_range_are_faults() {
        let mut source = AttitudeSource::new();
        let mut imu = level_imu();

        imu.gyro = Ok(GyroVector::new(f32::NAN, 0.0, 0.0));
        assert!(source.sample(&mut imu, &mut FakeBattery(Ok(4.0)), 0.005).substituted);

        imu.gyro = Ok(GyroVector::ZERO);
        imu.accel = Ok(AccelVector::new(0.0, 0.0, 40.0));
        let sample = source.sample(&mut imu, &mut FakeBattery(Ok(4.0)), 0.005);
        assert!(sample.substituted);
        assert_eq!(sample.consecutive_failures, 2);
    }

    #[test]
    fn battery_failure_keeps_last_voltage() {
        let mut source = AttitudeSource::new();
        source.sample(&mut level_imu(), &mut FakeBattery(Ok(3.9)), 0.005);
        let sample = source.sample(&mut level_imu(), &mut FakeBattery(Err(SensorFault::Bus)), 0.005);
        assert_eq!(sample.battery.voltage, 3.9);
        assert!(!sample.substituted);
    }
}
