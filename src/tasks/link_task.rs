use embassy_executor::task;
use embassy_futures::join::join;
use embassy_stm32::peripherals::{DMA1_CH2, DMA1_CH4, UART4};
use embassy_stm32::usart::{UartRx, UartTx};

use quadrotor_fc::drivers::link::{FrameDecoder, MAX_FRAME_LEN};

use super::{feed, FrameSender, ReplyReceiver};

/// Radio link on UART4: received bytes become frames for the fast loop,
/// telemetry replies go back out on the same port.
#[task]
pub async fn link_task(
    mut uart_rx: UartRx<'static, UART4, DMA1_CH2>,
    mut uart_tx: UartTx<'static, UART4, DMA1_CH4>,
    frames_tx: FrameSender,
    replies_rx: ReplyReceiver,
) {
    let rx_loop = async {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 2 * MAX_FRAME_LEN];
        loop {
            // Frames are short and bursty; hand over whatever arrived before the line idled.
            match uart_rx.read_until_idle(&mut buf).await {
                Ok(n) => feed(&mut decoder, &buf[..n], &frames_tx, "radio"),
                Err(_) => defmt::debug!("radio: uart error"),
            }
        }
    };

    let tx_loop = async {
        loop {
            let reply = replies_rx.receive().await;
            let _ = uart_tx.write(&reply).await;
        }
    };

    join(rx_loop, tx_loop).await;
}
