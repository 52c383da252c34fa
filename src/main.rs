#![no_std]
#![no_main]

mod board;
mod tasks;
mod usb;

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use embassy_executor::Spawner;
use embassy_stm32::adc::Adc;
use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{Level, Output, Pin, Speed};
use embassy_stm32::spi::{Config as SpiConfig, Spi};
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::usart::{Config as UsartConfig, Uart};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Delay, Duration, Instant, Timer};
use {defmt_rtt as _, panic_probe as _};

use quadrotor_fc::drivers::link::Frame;
use quadrotor_fc::drivers::mixer::MOTOR_COUNT;
use quadrotor_fc::drivers::status_led::led_level;
use quadrotor_fc::SystemState;

use crate::board::battery::AdcBattery;
use crate::board::dshot::{Dshot300, MOTOR_CMD};
use crate::board::icm42688::Icm42688;
use crate::board::Board;
use crate::tasks::fast_loop::fast_loop_task;
use crate::tasks::FRAME_QUEUE;

// ── Shared flight status (written by fast_loop only) ──────────────────────────
pub static SYSTEM_STATE: AtomicU8 = AtomicU8::new(SystemState::Calibrating as u8);
pub static LANDED: AtomicBool = AtomicBool::new(false);

// ── Inter-task channels ───────────────────────────────────────────────────────
//  One queue per transport: single writer (its link task), single reader (fast_loop).
static RADIO_FRAMES:    Channel<CriticalSectionRawMutex, Frame, FRAME_QUEUE> = Channel::new();
static CONSOLE_FRAMES:  Channel<CriticalSectionRawMutex, Frame, FRAME_QUEUE> = Channel::new();

// Telemetry replies back to whichever transport asked
static RADIO_REPLIES:   Channel<CriticalSectionRawMutex, Frame, 1> = Channel::new();
static CONSOLE_REPLIES: Channel<CriticalSectionRawMutex, Frame, 1> = Channel::new();

// ── Interrupt bindings ────────────────────────────────────────────────────────
bind_interrupts!(struct Irqs {
    UART4 => embassy_stm32::usart::InterruptHandler<peripherals::UART4>;
});

// ── DShot task ────────────────────────────────────────────────────────────────
/// Streams the latest motor commands at 1 kHz; ESCs disarm without a steady signal.
#[embassy_executor::task]
async fn dshot_task(mut motors: [Dshot300; MOTOR_COUNT]) {
    loop {
        for (motor, cmd) in motors.iter_mut().zip(MOTOR_CMD.iter()) {
            motor.send_command(cmd.load(Ordering::Relaxed), false);
        }
        Timer::after(Duration::from_micros(1000)).await;
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL)
    let board = Board::init();
    let p = board.p;
    defmt::info!("quadrotor-fc boot");

    // 2. USB (CDC-ACM ground-station console)
    let (usb_dev, usb_serial) = usb::init(p.USB_OTG_FS, p.PA12, p.PA11);
    spawner.spawn(usb::usb_task(usb_dev)).unwrap();

    // 3. SPI1 @ 10 MHz: ICM-42688 IMU (SCK=PA5, MOSI=PA7, MISO=PA6, CS=PB12)
    let mut spi_config = SpiConfig::default();
    spi_config.frequency = TimeHertz(10_000_000);
    let spi = Spi::new(
        p.SPI1,
        p.PA5, p.PA7, p.PA6,
        NoDma, NoDma,
        spi_config,
    );
    let cs_gyro = Output::new(p.PB12.degrade(), Level::High, Speed::VeryHigh);
    let mut imu = Icm42688::new(spi, cs_gyro);

    // 4. Battery sense on PC2 (ADC1)
    let adc = Adc::new(p.ADC1, &mut Delay);
    let battery = AdcBattery::new(adc, p.PC2);

    // 5. DShot300 motors M1..M4 (PB0, PB1, PA3, PA2), stopped until the core says otherwise
    let motors = [
        Dshot300::new(p.PB0.degrade()),
        Dshot300::new(p.PB1.degrade()),
        Dshot300::new(p.PA3.degrade()),
        Dshot300::new(p.PA2.degrade()),
    ];
    spawner.spawn(dshot_task(motors)).unwrap();

    // 6. Radio link UART4 @ 115200 (TX=PA0, RX=PA1)
    let mut radio_config = UsartConfig::default();
    radio_config.baudrate = 115_200;
    let radio_uart = Uart::new(
        p.UART4, p.PA1, p.PA0,
        Irqs,
        p.DMA1_CH4, p.DMA1_CH2,
        radio_config,
    ).unwrap();
    let (radio_tx, radio_rx) = radio_uart.split();

    // 7. Status LED (PC13)
    let mut led = Output::new(p.PC13, Level::Low, Speed::Low);

    // 8. IMU hardware init; the gyro bias is estimated later by the core
    Timer::after(Duration::from_millis(100)).await;
    if imu.init().await.is_err() {
        defmt::error!("imu init failed, reads will fault until it answers");
    }

    // 9. Spawn all tasks
    spawner.spawn(fast_loop_task(
        imu,
        battery,
        RADIO_FRAMES.receiver(),
        RADIO_REPLIES.sender(),
        CONSOLE_FRAMES.receiver(),
        CONSOLE_REPLIES.sender(),
    )).unwrap();

    spawner.spawn(tasks::link_task::link_task(
        radio_rx,
        radio_tx,
        RADIO_FRAMES.sender(),
        RADIO_REPLIES.receiver(),
    )).unwrap();

    spawner.spawn(tasks::console_task::console_task(
        usb_serial,
        CONSOLE_FRAMES.sender(),
        CONSOLE_REPLIES.receiver(),
    )).unwrap();

    // 10. Main task: status LED pattern for the current state
    loop {
        let state = SystemState::from_u8(SYSTEM_STATE.load(Ordering::Relaxed))
            .unwrap_or(SystemState::Landing);
        let landed = LANDED.load(Ordering::Relaxed);
        led.set_level(led_level(state, landed, Instant::now().as_micros()).into());
        Timer::after(Duration::from_millis(50)).await;
    }
}
