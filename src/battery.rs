// 电压修正系数（实测 ADC 读数偏低约 2%）。
const CORRECTION: f32 = 1.02;
const ADC_MAX_RAW: f32 = 4095.0;
const ADC_FULL_SCALE_MV: f32 = 3600.0;

const MIN_VOLTAGE_MV: u32 = 3300;
const MAX_VOLTAGE_MV: u32 = 4200;

/// 电池/太阳能两路分压比。
pub const BATTERY_DIVIDER_RATIO: u32 = 2;
pub const SOLAR_DIVIDER_RATIO: u32 = 2;

/// 12bit 原始值按满量程线性换算为引脚电压。
pub fn raw_to_millivolts(raw: u16) -> u32 {
    ((raw as f32 / ADC_MAX_RAW) * ADC_FULL_SCALE_MV).round() as u32
}

/// ADC 引脚电压 -> 实际电压（修正 + 分压）。
pub fn scale_millivolts(pin_mv: u32, divider_ratio: u32) -> u32 {
    (pin_mv as f32 * CORRECTION * divider_ratio as f32).round() as u32
}

/// 锂电池电量百分比（3.3V~4.2V 线性映射，向下取整）。
pub fn capacity_percent(voltage_mv: u32) -> u8 {
    if voltage_mv <= MIN_VOLTAGE_MV {
        return 0;
    }
    if voltage_mv >= MAX_VOLTAGE_MV {
        return 100;
    }
    let span = (MAX_VOLTAGE_MV - MIN_VOLTAGE_MV) as f32;
    ((voltage_mv - MIN_VOLTAGE_MV) as f32 * 100.0 / span) as u8
}

#[cfg(target_os = "espidf")]
pub use esp::BatteryMonitor;

#[cfg(target_os = "espidf")]
mod esp {
    use esp_idf_hal::adc::attenuation::DB_12;
    use esp_idf_hal::adc::oneshot::config::AdcChannelConfig;
    use esp_idf_hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
    use esp_idf_hal::adc::ADC1;
    use esp_idf_hal::gpio::{Gpio35, Gpio36};

    use super::{raw_to_millivolts, scale_millivolts, BATTERY_DIVIDER_RATIO, SOLAR_DIVIDER_RATIO};
    use crate::error::ModemError;

    /// 电池与太阳能板电压采样（ADC1 单次采样）。
    pub struct BatteryMonitor {
        adc: &'static AdcDriver<'static, ADC1>,
        battery: AdcChannelDriver<'static, Gpio35, &'static AdcDriver<'static, ADC1>>,
        solar: AdcChannelDriver<'static, Gpio36, &'static AdcDriver<'static, ADC1>>,
    }

    impl BatteryMonitor {
        pub fn new(adc1: ADC1, battery_pin: Gpio35, solar_pin: Gpio36) -> Result<Self, ModemError> {
            let adc = AdcDriver::new(adc1)
                .map_err(|err| ModemError::HardwareConfig(format!("adc1: {:?}", err)))?;
            // 通道驱动借用 ADC 驱动，整个运行期常驻
            let adc: &'static AdcDriver<'static, ADC1> = Box::leak(Box::new(adc));
            let config = AdcChannelConfig {
                attenuation: DB_12,
                ..Default::default()
            };
            let battery = AdcChannelDriver::new(adc, battery_pin, &config)
                .map_err(|err| ModemError::HardwareConfig(format!("battery adc: {:?}", err)))?;
            let solar = AdcChannelDriver::new(adc, solar_pin, &config)
                .map_err(|err| ModemError::HardwareConfig(format!("solar adc: {:?}", err)))?;
            Ok(Self { adc, battery, solar })
        }

        /// 电池电压（mV），读取失败返回 0。
        pub fn battery_mv(&mut self) -> u32 {
            match self.adc.read_raw(&mut self.battery) {
                Ok(raw) => scale_millivolts(raw_to_millivolts(raw), BATTERY_DIVIDER_RATIO),
                Err(err) => {
                    log::warn!("Battery ADC read failed: {:?}", err);
                    0
                }
            }
        }

        pub fn solar_mv(&mut self) -> u32 {
            match self.adc.read_raw(&mut self.solar) {
                Ok(raw) => scale_millivolts(raw_to_millivolts(raw), SOLAR_DIVIDER_RATIO),
                Err(err) => {
                    log::warn!("Solar ADC read failed: {:?}", err);
                    0
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_clamped() {
        assert_eq!(capacity_percent(0), 0);
        assert_eq!(capacity_percent(3300), 0);
        assert_eq!(capacity_percent(4200), 100);
        assert_eq!(capacity_percent(5000), 100);
    }

    #[test]
    fn capacity_is_linear_and_truncated() {
        assert_eq!(capacity_percent(3750), 50);
        assert_eq!(capacity_percent(3308), 0);
        assert_eq!(capacity_percent(3309), 1);
    }

    #[test]
    fn raw_conversion_and_scaling() {
        assert_eq!(raw_to_millivolts(0), 0);
        assert_eq!(raw_to_millivolts(4095), 3600);
        assert_eq!(scale_millivolts(1900, BATTERY_DIVIDER_RATIO), 3876);
    }
}
