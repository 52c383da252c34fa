use embassy_executor::task;
use embassy_futures::join::join;

use quadrotor_fc::drivers::link::FrameDecoder;

use super::{feed, FrameSender, ReplyReceiver};
use crate::usb::{UsbSerial, MAX_PACKET_SIZE};

/// Wired ground station over USB CDC-ACM. Same framing as the radio.
#[task]
pub async fn console_task(usb_serial: UsbSerial<'static>, frames_tx: FrameSender, replies_rx: ReplyReceiver) {
    let (mut sender, mut receiver) = usb_serial.split();

    let rx_loop = async {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; MAX_PACKET_SIZE as usize];
        loop {
            receiver.wait_connection().await;
            defmt::info!("console: host connected");
            // Err means the host went away; wait for the next connection.
            while let Ok(n) = receiver.read_packet(&mut buf).await {
                feed(&mut decoder, &buf[..n], &frames_tx, "console");
            }
            decoder = FrameDecoder::new();
        }
    };

    let tx_loop = async {
        loop {
            let reply = replies_rx.receive().await;
            let _ = sender.write_packet(&reply).await;
        }
    };

    join(rx_loop, tx_loop).await;
}
