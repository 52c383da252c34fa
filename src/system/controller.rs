use crate::config::{FlightConfig, MAX_DT_S, MIN_DT_S, SATURATION_REPORT_TICKS, TICK_PERIOD_US};
use crate::drivers::attitude::AttitudeSource;
use crate::drivers::calibrator::Calibrator;
use crate::drivers::link::{
    self, CommandLink, Message, ProtocolError, Telemetry, FLAG_LANDED, FLAG_LINK_CONNECTED,
    FLAG_SATURATED, FLAG_SENSOR_FAULT,
};
use crate::drivers::mixer::{MotorMixer, MotorOutputs, MOTOR_COUNT};
use crate::drivers::pid::AxisControllers;
use crate::io::{BatterySensor, InertialSensor, MotorOutput};
use crate::state::{Axis, Command, DroneData};
use crate::system::fsm::{select_transition, FsmDrone, SystemState, Transition};

/// What a received frame did.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameOutcome {
    Command(Command),
    GainsApplied(Axis),
    /// Gains are frozen while the bias estimate is running
    GainsRejected(Axis),
    TelemetryRequested,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickReport {
    pub state: SystemState,
    pub transition: Option<(SystemState, SystemState)>,
    pub outputs: MotorOutputs,
    pub data: DroneData,
}

/// Owns every piece of flight state. One instance per vehicle, driven by
/// [`FlightController::tick`] at the control rate.
pub struct FlightController {
    config: FlightConfig,
    fsm: FsmDrone,
    attitude: AttitudeSource,
    pids: AxisControllers,
    mixer: MotorMixer,
    link: CommandLink,

    outputs: MotorOutputs,
    /// Throttle of the last flying tick
    flight_throttle: u16,
    landing_throttle: f32,
    last_tick_us: Option<u64>,
    last_data: DroneData,
}

// ── Transition table ──────────────────────────────────────────────────────────
//
// Rows are tried top to bottom; every state ends with an unconditional row, so
// each tick has exactly one next state. Fault rows come before nominal ones.

type Row = Transition<FlightController>;

#[rustfmt::skip]
static TRANSITIONS: [Row; 12] = [
    Row { from: SystemState::Calibrating, guard: is_calibration_finished, action: Some(finish_calibration), to: SystemState::WaitingController },
    Row { from: SystemState::Calibrating, guard: is_drone_still, action: Some(update_calibration_progress), to: SystemState::Calibrating },
    Row { from: SystemState::Calibrating, guard: always, action: Some(reset_calibration_progress), to: SystemState::Calibrating },

    Row { from: SystemState::WaitingController, guard: is_controller_connected, action: Some(do_controller_connected), to: SystemState::Flying },
    Row { from: SystemState::WaitingController, guard: always, action: Some(do_stop_motors), to: SystemState::WaitingController },

    Row { from: SystemState::Flying, guard: is_battery_low, action: Some(do_inform_battery_below_threshold), to: SystemState::Landing },
    Row { from: SystemState::Flying, guard: is_link_lost, action: Some(do_start_landing), to: SystemState::Landing },
    Row { from: SystemState::Flying, guard: is_sensor_faulted, action: Some(do_sensor_fault_landing), to: SystemState::Landing },
    Row { from: SystemState::Flying, guard: always, action: Some(do_update_drone_motors), to: SystemState::Flying },

    Row { from: SystemState::Landing, guard: is_landed, action: Some(do_stop_motors), to: SystemState::Landing },
    Row { from: SystemState::Landing, guard: is_landing_complete, action: Some(do_finish_landing), to: SystemState::Landing },
    Row { from: SystemState::Landing, guard: always, action: Some(do_landing_step), to: SystemState::Landing },
];

// ── Guards ────────────────────────────────────────────────────────────────────

fn always(_: &FlightController, _: &DroneData) -> bool {
    true
}

fn is_drone_still(_: &FlightController, d: &DroneData) -> bool {
    d.is_still
}

fn is_calibration_finished(c: &FlightController, d: &DroneData) -> bool {
    d.is_still && c.fsm.calibrator.is_finished()
}

fn is_controller_connected(c: &FlightController, d: &DroneData) -> bool {
    d.link_age_us
        .map_or(false, |age| age < c.config.link_timeout_us)
}

fn is_link_lost(c: &FlightController, d: &DroneData) -> bool {
    !is_controller_connected(c, d)
}

fn is_battery_low(c: &FlightController, d: &DroneData) -> bool {
    d.battery.valid && d.battery.voltage < c.config.battery_low_voltage
}

fn is_sensor_faulted(_: &FlightController, d: &DroneData) -> bool {
    d.sensor_fault
}

fn is_landed(c: &FlightController, _: &DroneData) -> bool {
    c.fsm.landed()
}

/// Throttle ramped out and the vehicle at rest. A dead IMU can never report
/// rest, so idle throttle alone is enough then.
fn is_landing_complete(c: &FlightController, d: &DroneData) -> bool {
    c.landing_throttle <= 0.0 && (d.is_still || d.sensor_fault)
}

// ── Actions ───────────────────────────────────────────────────────────────────

fn update_calibration_progress(c: &mut FlightController, d: &DroneData) {
    if c.fsm.calibration_start_us().is_none() {
        c.fsm.set_calibration_start(Some(d.now_us));
    }
    c.fsm.calibrator.update_progress(&d.raw_rates, d.now_us);
}

fn reset_calibration_progress(c: &mut FlightController, _: &DroneData) {
    if c.fsm.calibrator.samples() > 0 {
        debug!(
            "motion during calibration, restarting after {} us",
            c.fsm.calibrator.progress_us()
        );
    }
    c.fsm.calibrator.reset_progress();
    c.fsm.set_calibration_start(None);
}

fn finish_calibration(c: &mut FlightController, _: &DroneData) {
    let bias = c.fsm.calibrator.bias();
    c.attitude.set_gyro_offset(bias);
    info!(
        "gyro bias: roll={} pitch={} yaw={} dps",
        bias.roll,
        bias.pitch,
        bias.yaw
    );
}

fn do_controller_connected(_: &mut FlightController, _: &DroneData) {
    info!("controller connected");
}

fn do_stop_motors(c: &mut FlightController, _: &DroneData) {
    c.outputs = MotorOutputs::stopped();
}

fn do_inform_battery_below_threshold(c: &mut FlightController, d: &DroneData) {
    warn!("battery low ({} V), landing", d.battery.voltage);
    c.start_landing();
}

fn do_start_landing(c: &mut FlightController, d: &DroneData) {
    warn!("link lost (age {} us), landing", d.link_age_us.unwrap_or(u64::MAX));
    c.start_landing();
}

fn do_sensor_fault_landing(c: &mut FlightController, _: &DroneData) {
    error!(
        "imu failed {} times in a row, landing",
        c.attitude.consecutive_failures()
    );
    c.start_landing();
}

fn do_update_drone_motors(c: &mut FlightController, d: &DroneData) {
    let command = c
        .link
        .effective_command(d.now_us, c.config.command_smoothing_us);
    c.fly(d, &command);
    c.flight_throttle = command.throttle;
}

fn do_landing_step(c: &mut FlightController, d: &DroneData) {
    c.landing_throttle = (c.landing_throttle - c.config.landing_throttle_rate * d.dt).max(0.0);
    let command = Command {
        throttle: (c.landing_throttle + 0.5) as u16,
        ..Command::neutral()
    };
    c.fly(d, &command);
}

fn do_finish_landing(c: &mut FlightController, _: &DroneData) {
    c.fsm.set_landed();
    c.outputs = MotorOutputs::stopped();
    info!("landed, motors stopped");
}

// ── Controller ────────────────────────────────────────────────────────────────

impl FlightController {
    pub fn new(config: FlightConfig) -> Self {
        let calibrator = Calibrator::new(
            config.calibration_time_us,
            config.calibration_threshold,
            config.still_threshold_dps,
        );
        Self {
            fsm: FsmDrone::new(calibrator),
            attitude: AttitudeSource::new(),
            pids: AxisControllers::new(
                config.pitch_gains,
                config.roll_gains,
                config.yaw_gains,
                config.integral_limit,
            ),
            mixer: MotorMixer::new(config.mixer_layout, config.duty_range),
            link: CommandLink::new(),
            outputs: MotorOutputs::stopped(),
            flight_throttle: 0,
            landing_throttle: 0.0,
            last_tick_us: None,
            last_data: DroneData::default(),
            config,
        }
    }

    /// Applies one received frame. Call before [`Self::tick`] so a tick never
    /// sees half-ingested link state.
    pub fn handle_frame(&mut self, frame: &[u8], now_us: u64) -> Result<FrameOutcome, ProtocolError> {
        match self.link.process_instruction(frame, now_us)? {
            Message::Command(cmd) => Ok(FrameOutcome::Command(cmd)),
            Message::GainUpdate { axis, gains } => {
                if self.fsm.state() == SystemState::Calibrating {
                    warn!("gain update for axis {} ignored while calibrating", axis as u8);
                    return Ok(FrameOutcome::GainsRejected(axis));
                }
                self.pids
                    .get_mut(axis)
                    .update_constants(gains.kp, gains.ki, gains.kd);
                info!(
                    "axis {} gains: kp={} ki={} kd={}",
                    axis as u8,
                    gains.kp,
                    gains.ki,
                    gains.kd
                );
                Ok(FrameOutcome::GainsApplied(axis))
            }
            Message::TelemetryRequest => Ok(FrameOutcome::TelemetryRequested),
        }
    }

    /// Runs one control cycle: sample, guard, act, write every motor.
    pub fn tick<S, B, M>(&mut self, imu: &mut S, battery: &mut B, motors: &mut M, now_us: u64) -> TickReport
    where
        S: InertialSensor,
        B: BatterySensor,
        M: MotorOutput,
    {
        let dt = match self.last_tick_us {
            Some(last) => now_us.saturating_sub(last) as f32 / 1_000_000.0,
            None => TICK_PERIOD_US as f32 / 1_000_000.0,
        }
        .clamp(MIN_DT_S, MAX_DT_S);
        self.last_tick_us = Some(now_us);

        let sample = self.attitude.sample(imu, battery, dt);
        let sensor_fault = sample.consecutive_failures > self.config.sensor_fault_limit;
        let data = DroneData {
            now_us,
            dt,
            angles: sample.angles,
            rates: sample.rates,
            raw_rates: sample.raw_rates,
            battery: sample.battery,
            link_age_us: self.link.link_age_us(now_us),
            is_still: !sample.substituted && self.fsm.calibrator.is_drone_still(&sample.rates),
            sensor_fault,
        };
        self.last_data = data;

        let from = self.fsm.state();
        let mut transition = None;
        match select_transition(&TRANSITIONS, from, self, &data) {
            Some(row) => {
                let to = row.to;
                if let Some(action) = row.action {
                    action(self, &data);
                }
                if to != from {
                    self.enter(from, to);
                    transition = Some((from, to));
                }
            }
            None => self.outputs = MotorOutputs::stopped(),
        }

        if self.fsm.state() != SystemState::Flying && self.fsm.state() != SystemState::Landing {
            self.outputs = MotorOutputs::stopped();
        }
        for i in 0..MOTOR_COUNT {
            motors.write_duty(i, self.outputs.duty[i]);
        }

        TickReport {
            state: self.fsm.state(),
            transition,
            outputs: self.outputs,
            data,
        }
    }

    fn enter(&mut self, from: SystemState, to: SystemState) {
        // Controller memory never survives active control.
        if from == SystemState::Flying || to == SystemState::Flying {
            self.pids.reset();
            self.mixer.reset();
        }
        info!("state {} -> {}", from.name(), to.name());
        self.fsm.set_state(to);
    }

    fn start_landing(&mut self) {
        self.landing_throttle = self.flight_throttle as f32;
    }

    /// Attitude loop for one tick: angle errors through the PIDs into the mixer.
    fn fly(&mut self, d: &DroneData, command: &Command) {
        // On the ground: nothing to correct, keep the integrals empty.
        if command.throttle == 0 {
            self.pids.reset();
        }

        let pitch = self
            .pids
            .update(Axis::Pitch, command.pitch - d.angles.pitch, d.dt);
        let roll = self
            .pids
            .update(Axis::Roll, command.roll - d.angles.roll, d.dt);
        let yaw = self
            .pids
            .update(Axis::Yaw, command.yaw_rate - d.angles.yaw_rate, d.dt);

        self.outputs = self.mixer.mix(command.throttle, pitch, roll, yaw);
        if self.mixer.saturated_ticks() == SATURATION_REPORT_TICKS {
            warn!("motor saturation for {} ticks", SATURATION_REPORT_TICKS);
        }
    }

    pub fn state(&self) -> SystemState {
        self.fsm.state()
    }

    pub fn fsm(&self) -> &FsmDrone {
        &self.fsm
    }

    pub fn landed(&self) -> bool {
        self.fsm.landed()
    }

    pub fn config(&self) -> &FlightConfig {
        &self.config
    }

    pub fn link(&self) -> &CommandLink {
        &self.link
    }

    pub fn pids(&self) -> &AxisControllers {
        &self.pids
    }

    pub fn attitude(&self) -> &AttitudeSource {
        &self.attitude
    }

    pub fn outputs(&self) -> MotorOutputs {
        self.outputs
    }

    pub fn telemetry(&self, now_us: u64) -> Telemetry {
        let d = &self.last_data;
        let mut flags = 0;
        if self.outputs.any_saturated() {
            flags |= FLAG_SATURATED;
        }
        if d.sensor_fault {
            flags |= FLAG_SENSOR_FAULT;
        }
        if self
            .link
            .is_controller_connected(now_us, self.config.link_timeout_us)
        {
            flags |= FLAG_LINK_CONNECTED;
        }
        if self.fsm.landed() {
            flags |= FLAG_LANDED;
        }

        Telemetry {
            state: self.fsm.state() as u8,
            angles: d.angles,
            battery_mv: (d.battery.voltage * 1000.0 + 0.5) as u16,
            flags,
        }
    }

    /// Encodes the telemetry reply into `buf`, returns its length.
    pub fn telemetry_frame(&self, buf: &mut [u8], now_us: u64) -> usize {
        link::encode_telemetry(buf, &self.telemetry(now_us))
    }
}
