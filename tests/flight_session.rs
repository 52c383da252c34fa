//! Whole-session run against mock collaborators, fed through the byte framer
//! the way the firmware tasks feed it.

use quadrotor_fc::config::{MOTOR_STOP, TICK_PERIOD_US};
use quadrotor_fc::drivers::link::{
    self, encode_command, encode_gain_update, encode_telemetry_request, FrameDecoder, ProtocolError,
    FLAG_LANDED, TELEMETRY_HEADER, TELEMETRY_REPLY_LEN,
};
use quadrotor_fc::drivers::mixer::MOTOR_COUNT;
use quadrotor_fc::drivers::pid::PidGains;
use quadrotor_fc::io::{BatterySensor, InertialSensor, MotorOutput, SensorFault};
use quadrotor_fc::system::FrameOutcome;
use quadrotor_fc::{AccelVector, Axis, Command, FlightConfig, FlightController, GyroVector, SystemState};

struct MockImu {
    gyro: GyroVector,
    accel: AccelVector,
}

impl InertialSensor for MockImu {
    fn read_gyro(&mut self) -> Result<GyroVector, SensorFault> {
        Ok(self.gyro)
    }

    fn read_accel(&mut self) -> Result<AccelVector, SensorFault> {
        Ok(self.accel)
    }
}

struct MockBattery {
    volts: f32,
}

impl BatterySensor for MockBattery {
    fn read_battery(&mut self) -> Result<f32, SensorFault> {
        Ok(self.volts)
    }
}

#[derive(Default)]
struct MockMotors {
    duty: [u16; MOTOR_COUNT],
}

impl MotorOutput for MockMotors {
    fn write_duty(&mut self, motor_index: usize, duty: u16) {
        self.duty[motor_index] = duty;
    }
}

struct Session {
    fc: FlightController,
    imu: MockImu,
    battery: MockBattery,
    motors: MockMotors,
    decoder: FrameDecoder,
    now: u64,
    sequence: u16,
}

impl Session {
    fn new() -> Self {
        let config = FlightConfig {
            calibration_time_us: 200_000,
            ..FlightConfig::default()
        };
        Self {
            fc: FlightController::new(config),
            imu: MockImu {
                gyro: GyroVector::new(0.4, -0.3, 0.1),
                accel: AccelVector::LEVEL,
            },
            battery: MockBattery { volts: 4.1 },
            motors: MockMotors::default(),
            decoder: FrameDecoder::new(),
            now: 0,
            sequence: 0,
        }
    }

    /// Pushes raw bytes through the framer, returns what each frame did.
    fn receive(&mut self, bytes: &[u8]) -> Vec<Result<FrameOutcome, ProtocolError>> {
        let mut out = Vec::new();
        for &b in bytes {
            match self.decoder.push_byte(b) {
                Some(Ok(frame)) => out.push(self.fc.handle_frame(&frame, self.now)),
                Some(Err(e)) => out.push(Err(e)),
                None => {}
            }
        }
        out
    }

    fn command(&mut self, roll: f32, throttle: u16) {
        self.sequence = self.sequence.wrapping_add(1);
        let cmd = Command {
            roll,
            throttle,
            sequence: self.sequence,
            ..Command::neutral()
        };
        let res = self.receive(&encode_command(&cmd));
        assert!(matches!(res.as_slice(), [Ok(FrameOutcome::Command(_))]));
    }

    fn tick(&mut self) -> SystemState {
        let report = self
            .fc
            .tick(&mut self.imu, &mut self.battery, &mut self.motors, self.now);
        self.now += TICK_PERIOD_US;
        report.state
    }

    fn tick_until(&mut self, state: SystemState, max_ticks: u32) -> u32 {
        for n in 1..=max_ticks {
            if self.tick() == state {
                return n;
            }
        }
        panic!("state {} not reached in {} ticks", state.name(), max_ticks);
    }
}

#[test]
fn full_flight_session() {
    let mut s = Session::new();

    // Calibration: 200 ms of stillness at 5 ms per tick plus the completing tick
    let ticks = s.tick_until(SystemState::WaitingController, 200);
    assert!(ticks >= 41, "calibrated after {} ticks", ticks);
    let bias = s.fc.attitude().gyro_offset();
    assert!((bias.roll - 0.4).abs() < 1e-3);
    assert!((bias.pitch + 0.3).abs() < 1e-3);
    assert_eq!(s.motors.duty, [MOTOR_STOP; MOTOR_COUNT]);

    // Noise on the line before the first frame is skipped
    let res = s.receive(&[0x00, 0x11, 0xFE]);
    assert!(res.is_empty());

    s.command(0.0, 300);
    assert_eq!(s.tick(), SystemState::Flying);

    for _ in 0..50 {
        s.command(0.0, 300);
        assert_eq!(s.tick(), SystemState::Flying);
    }
    let hover = s.motors.duty;
    assert!(hover.iter().all(|&d| d > 48 && d < 2047));

    // Hot gain swap keeps flying
    let res = s.receive(&encode_gain_update(Axis::Roll, PidGains::new(5.0, 0.5, 0.4)));
    assert_eq!(res, vec![Ok(FrameOutcome::GainsApplied(Axis::Roll))]);
    assert_eq!(s.fc.pids().get(Axis::Roll).gains().kp, 5.0);

    // Roll right request: left motors work harder
    for _ in 0..20 {
        s.command(10.0, 300);
        s.tick();
    }
    assert!(s.motors.duty[0] > s.motors.duty[1]);
    assert!(s.motors.duty[3] > s.motors.duty[2]);

    // A replayed frame is stale and does not refresh the link
    let replay = Command {
        roll: 10.0,
        throttle: 300,
        sequence: s.sequence,
        ..Command::neutral()
    };
    let res = s.receive(&encode_command(&replay));
    assert_eq!(res, vec![Err(ProtocolError::StaleSequence)]);

    let res = s.receive(&encode_telemetry_request());
    assert_eq!(res, vec![Ok(FrameOutcome::TelemetryRequested)]);
    let mut buf = [0u8; 32];
    let n = s.fc.telemetry_frame(&mut buf, s.now);
    assert_eq!(n, TELEMETRY_REPLY_LEN);
    assert_eq!(buf[0], TELEMETRY_HEADER);
    assert_eq!(buf[1], SystemState::Flying as u8);
    assert_eq!(link::checksum(&buf[..n - 1]), buf[n - 1]);

    // Controller goes silent: failsafe landing, then motors stop for good
    s.tick_until(SystemState::Landing, 200);
    for _ in 0..1_000 {
        s.tick();
        if s.fc.landed() {
            break;
        }
    }
    assert!(s.fc.landed());
    assert_eq!(s.motors.duty, [MOTOR_STOP; MOTOR_COUNT]);

    s.fc.telemetry_frame(&mut buf, s.now);
    assert_ne!(buf[16] & FLAG_LANDED, 0);

    // Controller comes back: still no re-arm
    s.command(0.0, 500);
    for _ in 0..20 {
        assert_eq!(s.tick(), SystemState::Landing);
    }
    assert_eq!(s.motors.duty, [MOTOR_STOP; MOTOR_COUNT]);
}

#[test]
fn shaking_on_the_bench_delays_calibration() {
    let mut s = Session::new();
    for _ in 0..30 {
        assert_eq!(s.tick(), SystemState::Calibrating);
    }
    s.imu.gyro = GyroVector::new(20.0, 0.0, 0.0);
    for _ in 0..100 {
        assert_eq!(s.tick(), SystemState::Calibrating);
    }
    assert_eq!(s.fc.fsm().calibrator.progress_us(), 0);

    s.imu.gyro = GyroVector::new(0.4, -0.3, 0.1);
    let ticks = s.tick_until(SystemState::WaitingController, 200);
    assert!(ticks >= 41);
}

#[test]
fn low_battery_forces_landing() {
    let mut s = Session::new();
    s.tick_until(SystemState::WaitingController, 200);
    s.command(0.0, 300);
    s.tick();

    s.battery.volts = 3.2;
    let mut state = SystemState::Flying;
    for _ in 0..200 {
        s.command(0.0, 300);
        state = s.tick();
        if state == SystemState::Landing {
            break;
        }
    }
    assert_eq!(state, SystemState::Landing);
}

#[test]
fn corrupt_frames_are_dropped() {
    let mut s = Session::new();
    s.tick_until(SystemState::WaitingController, 200);

    let mut frame = encode_command(&Command {
        throttle: 300,
        sequence: 1,
        ..Command::neutral()
    });
    frame[5] ^= 0x40;
    let res = s.receive(&frame);
    assert_eq!(res, vec![Err(ProtocolError::ChecksumMismatch)]);

    for _ in 0..20 {
        assert_eq!(s.tick(), SystemState::WaitingController);
    }
    assert_eq!(s.fc.link().link_age_us(s.now), None);
}
