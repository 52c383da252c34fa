use crate::config::{BATTERY_EMPTY_VOLTAGE, BATTERY_FULL_VOLTAGE};
use crate::drivers::filter::LowPassFilter;
use crate::state::BatteryStatus;

/// ADC reference (mV)
pub const ADC_VREF_MV: u32 = 3300;
/// 12-bit converter
pub const ADC_MAX: u32 = 4095;
/// Samples averaged per battery reading
pub const ADC_OVERSAMPLE: u32 = 64;

/// Averaged raw ADC counts → pack voltage, `divider` = Vbat / Vpin.
pub fn adc_to_voltage(raw_avg: u16, divider: f32) -> f32 {
    let pin_mv = raw_avg.min(ADC_MAX as u16) as u32 * ADC_VREF_MV / ADC_MAX;
    pin_mv as f32 / 1000.0 * divider
}

/// Linear state of charge between the empty and full cell voltage.
pub fn voltage_to_level(voltage: f32) -> u8 {
    let span = BATTERY_FULL_VOLTAGE - BATTERY_EMPTY_VOLTAGE;
    let fraction = ((voltage - BATTERY_EMPTY_VOLTAGE) / span).clamp(0.0, 1.0);
    (fraction * 100.0) as u8
}

pub struct BatteryMonitor {
    lpf: LowPassFilter,
    status: BatteryStatus,
}

impl BatteryMonitor {
    pub fn new() -> Self {
        Self {
            lpf: LowPassFilter::new(0.05),
            status: BatteryStatus::default(),
        }
    }

    /// Feeds one reading. Failed or implausible reads keep the last status.
    pub fn update(&mut self, reading: Option<f32>) -> BatteryStatus {
        if let Some(volts) = reading.filter(|v| v.is_finite() && *v >= 0.0) {
            let voltage = self.lpf.filter(volts);
            self.status = BatteryStatus {
                voltage,
                level: voltage_to_level(voltage),
                valid: true,
            };
        }
        self.status
    }

    pub fn status(&self) -> BatteryStatus {
        self.status
    }
}

impl Default for BatteryMonitor {
    fn default() -> Self {
        Self::new()
    }
}
