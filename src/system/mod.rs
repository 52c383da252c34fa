//! Lifecycle state machine and the per-tick glue around it.

pub mod controller;
pub mod fsm;

pub use controller::{FlightController, FrameOutcome, TickReport};
pub use fsm::{FsmDrone, SystemState};
