pub mod console_task;
pub mod fast_loop;
pub mod link_task;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};

use quadrotor_fc::drivers::link::{Frame, FrameDecoder};

/// Frames buffered per transport between two control ticks
pub const FRAME_QUEUE: usize = 4;

pub type FrameSender = Sender<'static, CriticalSectionRawMutex, Frame, FRAME_QUEUE>;
pub type FrameReceiver = Receiver<'static, CriticalSectionRawMutex, Frame, FRAME_QUEUE>;
pub type ReplySender = Sender<'static, CriticalSectionRawMutex, Frame, 1>;
pub type ReplyReceiver = Receiver<'static, CriticalSectionRawMutex, Frame, 1>;

/// Cuts `bytes` into frames and queues them for the fast loop.
/// A full queue drops the frame; the link timeout covers what gets lost.
pub fn feed(decoder: &mut FrameDecoder, bytes: &[u8], frames: &FrameSender, source: &'static str) {
    for &b in bytes {
        match decoder.push_byte(b) {
            Some(Ok(frame)) => {
                if frames.try_send(frame).is_err() {
                    defmt::warn!("{}: frame queue full, dropped", source);
                }
            }
            Some(Err(e)) => defmt::debug!("{}: bad frame: {}", source, e),
            None => {}
        }
    }
}
