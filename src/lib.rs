//! Quadrotor flight-controller core.
//!
//! Everything in this crate is hardware independent: the firmware binary
//! (`src/main.rs`, feature `firmware`) supplies the sensor, motor and
//! transport collaborators through the traits in [`io`] and runs
//! [`system::FlightController::tick`] at a fixed rate.
//!
//! - [`drivers`]: PID, mixer, attitude estimation, calibration, command link
//! - [`system`]: lifecycle state machine and the per-tick controller glue
//! - [`config`]: compile-time constants and the runtime [`config::FlightConfig`]
#![cfg_attr(not(test), no_std)]

// Must stay first so the logging macros are visible to every module below.
#[macro_use]
mod fmt;

pub mod config;
pub mod drivers;
pub mod io;
pub mod state;
pub mod system;

pub use config::FlightConfig;
pub use state::{AccelVector, Axis, BatteryStatus, Command, DroneAngles, DroneData, GyroVector};
pub use system::{FlightController, SystemState};
