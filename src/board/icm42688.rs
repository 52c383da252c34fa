use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{AnyPin, Output};
use embassy_stm32::spi::{Error, Instance, Spi};
use embassy_time::{Duration, Timer};

use quadrotor_fc::io::{InertialSensor, SensorFault};
use quadrotor_fc::{AccelVector, GyroVector};

// ── Registers (bank 0) ────────────────────────────────────────────────────────
const REG_DEVICE_CONFIG: u8 = 0x11;
const REG_ACCEL_DATA_X1: u8 = 0x1F;
const REG_GYRO_DATA_X1: u8 = 0x25;
const REG_PWR_MGMT0: u8 = 0x4E;
const REG_GYRO_CONFIG0: u8 = 0x4F;
const REG_ACCEL_CONFIG0: u8 = 0x50;
const REG_WHO_AM_I: u8 = 0x75;

const WHO_AM_I: u8 = 0x47;

/// ±2000 dps, 1 kHz ODR
const GYRO_CONFIG0: u8 = 0x06;
/// ±16 g, 1 kHz ODR
const ACCEL_CONFIG0: u8 = 0x06;

/// ±2000 dps → 16.4 LSB/dps
const GYRO_LSB_PER_DPS: f32 = 16.4;
/// ±16 g → 2048 LSB/g
const ACCEL_LSB_PER_G: f32 = 2048.0;

/// Output registers hold this value until the first sample is ready.
const INVALID_SAMPLE: i16 = i16::MIN;

pub struct Icm42688<'d, T: Instance> {
    spi: Spi<'d, T, NoDma, NoDma>,
    cs: Output<'d, AnyPin>,
}

impl<'d, T: Instance> Icm42688<'d, T> {
    pub fn new(spi: Spi<'d, T, NoDma, NoDma>, cs: Output<'d, AnyPin>) -> Self {
        Self { spi, cs }
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), Error> {
        let buf = [reg & 0x7F, value];
        self.cs.set_low();
        let res = self.spi.blocking_write(&buf);
        self.cs.set_high();
        res
    }

    fn read_reg(&mut self, reg: u8) -> Result<u8, Error> {
        let tx = [reg | 0x80, 0x00];
        let mut rx = [0u8; 2];

        self.cs.set_low();
        let res = self.spi.blocking_transfer(&mut rx, &tx);
        self.cs.set_high();

        res?;
        Ok(rx[1])
    }

    pub async fn init(&mut self) -> Result<(), Error> {
        // Soft reset
        self.write_reg(REG_DEVICE_CONFIG, 0x01)?;
        Timer::after(Duration::from_millis(10)).await;

        let id = self.read_reg(REG_WHO_AM_I)?;
        if id != WHO_AM_I {
            defmt::warn!("icm42688: unexpected WHO_AM_I {=u8:#x}", id);
        }

        self.write_reg(REG_GYRO_CONFIG0, GYRO_CONFIG0)?;
        self.write_reg(REG_ACCEL_CONFIG0, ACCEL_CONFIG0)?;

        // Gyro and accel in low noise mode
        self.write_reg(REG_PWR_MGMT0, 0x0F)?;
        Timer::after(Duration::from_millis(50)).await;

        Ok(())
    }

    /// Three big-endian axes starting at `reg`.
    fn read_axes(&mut self, reg: u8) -> Result<[i16; 3], SensorFault> {
        let mut tx = [0u8; 7];
        tx[0] = reg | 0x80;
        let mut rx = [0u8; 7];

        self.cs.set_low();
        let res = self.spi.blocking_transfer(&mut rx, &tx);
        self.cs.set_high();
        res.map_err(|_| SensorFault::Bus)?;

        let axes = [
            i16::from_be_bytes([rx[1], rx[2]]),
            i16::from_be_bytes([rx[3], rx[4]]),
            i16::from_be_bytes([rx[5], rx[6]]),
        ];
        if axes.contains(&INVALID_SAMPLE) {
            return Err(SensorFault::NotReady);
        }
        Ok(axes)
    }
}

impl<'d, T: Instance> InertialSensor for Icm42688<'d, T> {
    fn read_gyro(&mut self) -> Result<GyroVector, SensorFault> {
        let [x, y, z] = self.read_axes(REG_GYRO_DATA_X1)?;
        Ok(GyroVector::new(
            x as f32 / GYRO_LSB_PER_DPS,
            y as f32 / GYRO_LSB_PER_DPS,
            z as f32 / GYRO_LSB_PER_DPS,
        ))
    }

    fn read_accel(&mut self) -> Result<AccelVector, SensorFault> {
        let [x, y, z] = self.read_axes(REG_ACCEL_DATA_X1)?;
        Ok(AccelVector::new(
            x as f32 / ACCEL_LSB_PER_G,
            y as f32 / ACCEL_LSB_PER_G,
            z as f32 / ACCEL_LSB_PER_G,
        ))
    }
}
