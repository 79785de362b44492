use serde::Serialize;

use crate::battery::capacity_percent;
use crate::model::{ModemPowerState, SessionNegotiationResult};

/// 周期性系统状态快照（电池/太阳能/调制解调器）。
#[derive(Clone, Debug, Serialize)]
pub struct SystemStatus {
    pub battery_mv: u32,
    pub battery_percent: u8,
    pub solar_mv: u32,
    pub modem_power: ModemPowerState,
    pub connected: bool,
    pub stations: u32,
    pub session: Option<SessionNegotiationResult>,
}

impl SystemStatus {
    pub fn new(battery_mv: u32, solar_mv: u32, modem_power: ModemPowerState) -> Self {
        Self {
            battery_mv,
            battery_percent: capacity_percent(battery_mv),
            solar_mv,
            modem_power,
            connected: false,
            stations: 0,
            session: None,
        }
    }

    /// 一行可读日志。
    pub fn summary(&self) -> String {
        format!(
            "Battery: {}mV ({}%), Solar {}mV",
            self.battery_mv, self.battery_percent, self.solar_mv
        )
    }

    /// 序列化为 JSON 字符串。
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
