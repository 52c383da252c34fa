pub mod attitude;
pub mod battery;
pub mod calibrator;
pub mod filter;
pub mod link;
pub mod mixer;
pub mod pid;
pub mod status_led;
