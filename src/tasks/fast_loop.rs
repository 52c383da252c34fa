use core::sync::atomic::Ordering;

use embassy_executor::task;
use embassy_stm32::peripherals::SPI1;
use embassy_time::{Duration, Instant, Ticker};

use quadrotor_fc::config::CONTROL_LOOP_HZ;
use quadrotor_fc::drivers::link::{Frame, MAX_FRAME_LEN};
use quadrotor_fc::system::FrameOutcome;
use quadrotor_fc::{FlightConfig, FlightController};

use super::{FrameReceiver, ReplySender};
use crate::board::battery::AdcBattery;
use crate::board::dshot::SharedMotors;
use crate::board::icm42688::Icm42688;
use crate::{LANDED, SYSTEM_STATE};

// ── Task ─────────────────────────────────────────────────────────────────────

/// Control loop at 200 Hz. Owns the flight controller; the link tasks only
/// ever reach it through the frame queues drained at the top of each tick.
#[task]
pub async fn fast_loop_task(
    mut imu: Icm42688<'static, SPI1>,
    mut battery: AdcBattery,
    radio_rx: FrameReceiver,
    radio_reply: ReplySender,
    console_rx: FrameReceiver,
    console_reply: ReplySender,
) {
    let mut fc = FlightController::new(FlightConfig::default());
    let mut motors = SharedMotors;

    let mut ticker = Ticker::every(Duration::from_hz(CONTROL_LOOP_HZ));

    loop {
        ticker.next().await;
        let now = Instant::now().as_micros();

        // ── A. Ingest everything queued since the last tick ──────────────────
        while let Ok(frame) = radio_rx.try_receive() {
            ingest(&mut fc, &frame, now, &radio_reply);
        }
        while let Ok(frame) = console_rx.try_receive() {
            ingest(&mut fc, &frame, now, &console_reply);
        }

        // ── B. Guard → action → mix → write ──────────────────────────────────
        let report = fc.tick(&mut imu, &mut battery, &mut motors, now);

        // ── C. Publish for the LED ───────────────────────────────────────────
        SYSTEM_STATE.store(report.state as u8, Ordering::Relaxed);
        LANDED.store(fc.landed(), Ordering::Relaxed);
    }
}

fn ingest(fc: &mut FlightController, frame: &Frame, now: u64, reply: &ReplySender) {
    match fc.handle_frame(frame, now) {
        Ok(FrameOutcome::TelemetryRequested) => {
            let mut buf = [0u8; MAX_FRAME_LEN];
            let n = fc.telemetry_frame(&mut buf, now);
            if let Ok(out) = Frame::from_slice(&buf[..n]) {
                // Previous reply still unsent: drop this one
                let _ = reply.try_send(out);
            }
        }
        Ok(_) => {}
        Err(e) => defmt::debug!("frame dropped: {}", e),
    }
}
