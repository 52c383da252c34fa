use crate::drivers::calibrator::Calibrator;
use crate::state::DroneData;

/// Lifecycle of one flight session. The discriminant is reported in telemetry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SystemState {
    Calibrating = 0,
    WaitingController = 1,
    Flying = 2,
    /// Terminal for the session
    Landing = 3,
}

impl SystemState {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Calibrating),
            1 => Some(Self::WaitingController),
            2 => Some(Self::Flying),
            3 => Some(Self::Landing),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Calibrating => "CALIBRATING",
            Self::WaitingController => "WAITING_CONTROLLER",
            Self::Flying => "FLYING",
            Self::Landing => "LANDING",
        }
    }
}

pub type Guard<C> = fn(&C, &DroneData) -> bool;
pub type Action<C> = fn(&mut C, &DroneData);

/// One row of a transition table.
pub struct Transition<C> {
    pub from: SystemState,
    pub guard: Guard<C>,
    pub action: Option<Action<C>>,
    pub to: SystemState,
}

/// First row leaving `state` whose guard holds. Row order is priority order.
pub fn select_transition<'t, C>(
    table: &'t [Transition<C>],
    state: SystemState,
    ctx: &C,
    data: &DroneData,
) -> Option<&'t Transition<C>> {
    table
        .iter()
        .find(|t| t.from == state && (t.guard)(ctx, data))
}

/// State machine instance: current state plus the calibration bookkeeping.
pub struct FsmDrone {
    state: SystemState,
    pub calibrator: Calibrator,
    calibration_start_us: Option<u64>,
    landed: bool,
}

impl FsmDrone {
    pub fn new(calibrator: Calibrator) -> Self {
        Self {
            state: SystemState::Calibrating,
            calibrator,
            calibration_start_us: None,
            landed: false,
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SystemState) {
        self.state = state;
    }

    /// Start of the current still interval.
    pub fn calibration_start_us(&self) -> Option<u64> {
        self.calibration_start_us
    }

    pub(crate) fn set_calibration_start(&mut self, at: Option<u64>) {
        self.calibration_start_us = at;
    }

    pub fn landed(&self) -> bool {
        self.landed
    }

    pub(crate) fn set_landed(&mut self) {
        self.landed = true;
    }
}
