use esp_idf_hal::gpio::{AnyInputPin, AnyOutputPin, Input, Output, PinDriver};

use crate::error::ModemError;
use crate::power::ModemLines;

pub type OutputLine = PinDriver<'static, AnyOutputPin, Output>;
pub type StatusLine = PinDriver<'static, AnyInputPin, Input>;

fn output(pin: AnyOutputPin, name: &str) -> Result<OutputLine, ModemError> {
    PinDriver::output(pin)
        .map_err(|err| ModemError::HardwareConfig(format!("{} gpio: {:?}", name, err)))
}

/// 构造调制解调器控制线，初始电平由时序器首次复位时写入。
pub fn modem_lines(
    power_key: AnyOutputPin,
    flight_mode: AnyOutputPin,
    dtr: AnyOutputPin,
    status: AnyInputPin,
    led: AnyOutputPin,
) -> Result<ModemLines<OutputLine, StatusLine>, ModemError> {
    let lines = ModemLines {
        power_key: output(power_key, "power_key")?,
        flight_mode: output(flight_mode, "flight_mode")?,
        dtr: output(dtr, "dtr")?,
        status: PinDriver::input(status)
            .map_err(|err| ModemError::HardwareConfig(format!("status gpio: {:?}", err)))?,
        indicator: Some(output(led, "led")?),
    };
    log::info!(
        "Modem lines: PWRKEY={} FLIGHT={} DTR={} STATUS={} LED={}",
        lines.power_key.pin(),
        lines.flight_mode.pin(),
        lines.dtr.pin(),
        lines.status.pin(),
        led_pin(&lines)
    );
    Ok(lines)
}

fn led_pin(lines: &ModemLines<OutputLine, StatusLine>) -> i32 {
    lines.indicator.as_ref().map_or(-1, |led| led.pin())
}
