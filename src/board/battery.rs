use embassy_stm32::adc::Adc;
use embassy_stm32::peripherals::{ADC1, PC2};

use quadrotor_fc::drivers::battery::{adc_to_voltage, ADC_OVERSAMPLE};
use quadrotor_fc::io::{BatterySensor, SensorFault};

/// 1S pack behind two equal resistors, ratio 2
const VBAT_DIVIDER: f32 = 2.0;

pub struct AdcBattery {
    adc: Adc<'static, ADC1>,
    pin: PC2,
}

impl AdcBattery {
    pub fn new(adc: Adc<'static, ADC1>, pin: PC2) -> Self {
        Self { adc, pin }
    }
}

impl BatterySensor for AdcBattery {
    fn read_battery(&mut self) -> Result<f32, SensorFault> {
        let mut sum: u32 = 0;
        for _ in 0..ADC_OVERSAMPLE {
            sum += self.adc.read(&mut self.pin) as u32;
        }
        let avg = (sum / ADC_OVERSAMPLE) as u16;
        Ok(adc_to_voltage(avg, VBAT_DIVIDER))
    }
}
