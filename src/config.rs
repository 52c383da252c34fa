use crate::drivers::mixer::{DutyRange, MixerLayout};
use crate::drivers::pid::PidGains;

// ── Loop timing ───────────────────────────────────────────────────────────────

/// Control loop rate: one tick every 5 ms
pub const CONTROL_LOOP_HZ: u64 = 200;
/// Nominal tick period (µs), used for the first tick and as the dt fallback
pub const TICK_PERIOD_US: u64 = 1_000_000 / CONTROL_LOOP_HZ;
/// dt guard, seconds (1 ms … 20 ms)
pub const MIN_DT_S: f32 = 0.001;
pub const MAX_DT_S: f32 = 0.02;

// ── Calibration ───────────────────────────────────────────────────────────────

/// Contiguous still time needed before the gyro bias is trusted
pub const CALIBRATION_TIME_US: u64 = 2_000_000;
/// Maximum per-axis gyro variance ((°/s)²) accepted for the bias estimate
pub const CALIBRATION_THRESHOLD: f32 = 0.05;
/// Rate magnitude (°/s) under which the vehicle counts as still
pub const STILL_THRESHOLD_DPS: f32 = 5.0;

// ── Link ──────────────────────────────────────────────────────────────────────

/// No accepted command for this long means the controller is gone
pub const LINK_TIMEOUT_US: u64 = 500_000;
/// Setpoint ramp between two consecutive commands
pub const COMMAND_SMOOTHING_US: u64 = 20_000;

// ── Setpoint bounds ───────────────────────────────────────────────────────────

pub const THROTTLE_MAX: u16 = 1000;
pub const MAX_ANGLE_DEG: f32 = 45.0;
pub const MAX_YAW_RATE_DPS: f32 = 360.0;

// ── Sensors ───────────────────────────────────────────────────────────────────

/// ±2000 dps full scale
pub const GYRO_RANGE_DPS: f32 = 2000.0;
/// ±16 g full scale
pub const ACCEL_RANGE_G: f32 = 16.0;
/// Consecutive failed IMU reads tolerated before escalating to LANDING
pub const SENSOR_FAULT_LIMIT: u16 = 10;
/// Complementary filter weight of the integrated gyro angle
pub const COMPLEMENTARY_ALPHA: f32 = 0.97;

// ── Battery (1S LiPo) ─────────────────────────────────────────────────────────

pub const BATTERY_LOW_VOLTAGE: f32 = 3.5;
pub const BATTERY_EMPTY_VOLTAGE: f32 = 3.3;
pub const BATTERY_FULL_VOLTAGE: f32 = 4.2;

// ── Motors ────────────────────────────────────────────────────────────────────

/// DShot throttle range (0 is the stop command, 1..47 are special commands)
pub const DSHOT_THROTTLE_MIN: u16 = 48;
pub const DSHOT_THROTTLE_MAX: u16 = 2047;
pub const MOTOR_STOP: u16 = 0;
/// Saturated ticks in a row before the mixer reports sustained saturation
pub const SATURATION_REPORT_TICKS: u32 = 100;

/// Every tunable of the flight stack.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlightConfig {
    pub pitch_gains: PidGains,
    pub roll_gains: PidGains,
    pub yaw_gains: PidGains,
    /// Anti-windup bound applied to each axis integral
    pub integral_limit: f32,

    pub mixer_layout: MixerLayout,
    pub duty_range: DutyRange,

    pub calibration_time_us: u64,
    pub calibration_threshold: f32,
    pub still_threshold_dps: f32,

    pub link_timeout_us: u64,
    pub command_smoothing_us: u64,

    pub battery_low_voltage: f32,
    pub sensor_fault_limit: u16,

    /// Throttle units removed per second while landing
    pub landing_throttle_rate: f32,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            pitch_gains: PidGains::new(4.0, 0.5, 0.4),
            roll_gains: PidGains::new(4.0, 0.5, 0.4),
            yaw_gains: PidGains::new(3.0, 0.2, 0.0),
            integral_limit: 100.0,

            mixer_layout: MixerLayout::QuadX,
            duty_range: DutyRange {
                min: DSHOT_THROTTLE_MIN,
                max: DSHOT_THROTTLE_MAX,
            },

            calibration_time_us: CALIBRATION_TIME_US,
            calibration_threshold: CALIBRATION_THRESHOLD,
            still_threshold_dps: STILL_THRESHOLD_DPS,

            link_timeout_us: LINK_TIMEOUT_US,
            command_smoothing_us: COMMAND_SMOOTHING_US,

            battery_low_voltage: BATTERY_LOW_VOLTAGE,
            sensor_fault_limit: SENSOR_FAULT_LIMIT,

            landing_throttle_rate: 200.0,
        }
    }
}
