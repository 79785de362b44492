use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// 调制解调器供电状态（由 STATUS 线推导，不做持久化）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ModemPowerState {
    Off,
    PoweringOn,
    PoweredOn,
    PoweringOff,
}

impl ModemPowerState {
    /// 根据 STATUS 线电平得到稳定状态。
    pub fn from_status(is_high: bool) -> Self {
        if is_high {
            ModemPowerState::PoweredOn
        } else {
            ModemPowerState::Off
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModemPowerState::Off => "off",
            ModemPowerState::PoweringOn => "powering_on",
            ModemPowerState::PoweredOn => "powered_on",
            ModemPowerState::PoweringOff => "powering_off",
        }
    }
}

/// 一次 PWRKEY 按键脉冲：拉低等待 -> 拉高保持 -> 拉低稳定。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerButtonPulse {
    pub pre_delay: Duration,
    pub assert_duration: Duration,
    pub settle_delay: Duration,
}

impl PowerButtonPulse {
    /// 开机短按。
    pub const POWER_ON: Self = Self {
        pre_delay: Duration::from_millis(500),
        assert_duration: Duration::from_millis(500),
        settle_delay: Duration::from_millis(500),
    };

    /// 关机长按（模块已开机时强制关机）。
    pub const POWER_OFF: Self = Self {
        pre_delay: Duration::from_millis(500),
        assert_duration: Duration::from_millis(3000),
        settle_delay: Duration::from_millis(500),
    };

    /// 按目标状态选择脉冲。
    pub fn for_target(target: ModemPowerState) -> Self {
        match target {
            ModemPowerState::PoweredOn | ModemPowerState::PoweringOn => Self::POWER_ON,
            ModemPowerState::Off | ModemPowerState::PoweringOff => Self::POWER_OFF,
        }
    }
}

/// DCE 工作模式。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ModemMode {
    Command,
    Data,
}

impl ModemMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModemMode::Command => "command",
            ModemMode::Data => "data",
        }
    }
}

/// 会话协商的步骤（用于错误定位）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationStep {
    SimPin,
    BaudRate,
    SignalQuality,
    DataMode,
}

/// AT+CSQ 信号质量。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SignalQuality {
    pub rssi: i32,
    pub ber: i32,
}

impl SignalQuality {
    // 3GPP 27.007：99 表示未知或不可检测
    const UNKNOWN: i32 = 99;

    /// rssi 为 99 时视为未知。
    pub fn from_raw(rssi: i32, ber: i32) -> Option<Self> {
        if rssi == Self::UNKNOWN || rssi < 0 {
            return None;
        }
        Some(Self { rssi, ber })
    }

    /// 近似换算为 dBm（0 -> -113 dBm，31 -> -51 dBm）。
    pub fn rssi_dbm(&self) -> i32 {
        -113 + 2 * self.rssi.min(31)
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rssi={} ({} dBm), ber={}", self.rssi, self.rssi_dbm(), self.ber)
    }
}

/// 单次上线协商结果，仅用于日志/遥测。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SessionNegotiationResult {
    pub baud_rate: u32,
    pub signal: Option<SignalQuality>,
    pub mode: ModemMode,
}

/// 调制解调器 UART 参数。
#[derive(Clone, Debug)]
pub struct UartSettings {
    pub port: i32,
    pub tx_pin: i32,
    pub rx_pin: i32,
    pub rts_pin: i32,
    pub cts_pin: i32,
    pub rx_buffer_size: usize,
    pub tx_buffer_size: usize,
    pub event_queue_size: usize,
}

impl Default for UartSettings {
    fn default() -> Self {
        Self {
            port: 1,
            tx_pin: 27,
            rx_pin: 26,
            // 不使用硬件流控
            rts_pin: -1,
            cts_pin: -1,
            rx_buffer_size: 16 * 1024,
            tx_buffer_size: 2 * 1024,
            event_queue_size: 30,
        }
    }
}

/// 上下电轮询参数（脉冲时长是硬件常量，不在此配置）。
#[derive(Clone, Debug)]
pub struct PowerTiming {
    pub power_on_poll: Duration,
    pub power_off_poll: Duration,
    pub power_on_timeout: Duration,
    pub power_off_timeout: Duration,
    /// 关机确认后的额外等待。
    pub power_off_settle: Duration,
    /// 开机后等待模块注册网络。
    pub warm_up: Duration,
}

impl Default for PowerTiming {
    fn default() -> Self {
        Self {
            power_on_poll: Duration::from_millis(1000),
            power_off_poll: Duration::from_millis(100),
            power_on_timeout: Duration::from_secs(30),
            power_off_timeout: Duration::from_secs(15),
            power_off_settle: Duration::from_millis(100),
            warm_up: Duration::from_secs(17),
        }
    }
}

/// 调制解调器会话参数。
#[derive(Clone, Debug)]
pub struct ModemSettings {
    pub apn: String,
    pub uart: UartSettings,
    pub default_baud: u32,
    pub target_baud: u32,
    /// 需要解锁时才填写。
    pub sim_pin: Option<String>,
    pub engine_task_stack_size: usize,
    pub engine_task_priority: u32,
    pub power: PowerTiming,
}

impl Default for ModemSettings {
    fn default() -> Self {
        let sim_pin = option_env!("SIM_PIN")
            .map(str::trim)
            .filter(|pin| !pin.is_empty())
            .map(str::to_string);
        Self {
            apn: option_env!("MODEM_PPP_APN").unwrap_or("internet").to_string(),
            uart: UartSettings::default(),
            default_baud: 115_200,
            target_baud: 3_000_000,
            sim_pin,
            engine_task_stack_size: 4096,
            engine_task_priority: 5,
            power: PowerTiming::default(),
        }
    }
}

/// 热点参数。
#[derive(Clone, Debug)]
pub struct AccessPointSettings {
    pub ssid: String,
    pub password: String,
    pub channel: u8,
    pub max_connections: u16,
}

impl AccessPointSettings {
    /// 空密码时使用开放认证。
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

impl Default for AccessPointSettings {
    fn default() -> Self {
        Self {
            ssid: option_env!("AP_WIFI_SSID").unwrap_or("AirGateway").to_string(),
            password: option_env!("AP_WIFI_PASS").unwrap_or("").to_string(),
            channel: option_env!("AP_WIFI_CHANNEL")
                .and_then(|value| value.parse::<u8>().ok())
                .unwrap_or(6),
            max_connections: option_env!("AP_MAX_STA_CONN")
                .and_then(|value| value.parse::<u16>().ok())
                .unwrap_or(4),
        }
    }
}

/// 网关运行参数（可配置项）。
#[derive(Clone, Debug)]
pub struct GatewaySettings {
    pub modem: ModemSettings,
    pub access_point: AccessPointSettings,
    /// 整个上线流程的尝试次数，耗尽后重启。
    pub bring_up_attempts: u32,
    /// None 表示无限等待 IP。
    pub connect_watchdog: Option<Duration>,
    pub status_log_interval: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            modem: ModemSettings::default(),
            access_point: AccessPointSettings::default(),
            bring_up_attempts: 3,
            connect_watchdog: None,
            status_log_interval: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_off_pulse_is_longer_than_power_on() {
        assert!(
            PowerButtonPulse::POWER_OFF.assert_duration > PowerButtonPulse::POWER_ON.assert_duration
        );
        assert_eq!(
            PowerButtonPulse::for_target(ModemPowerState::Off),
            PowerButtonPulse::POWER_OFF
        );
    }

    #[test]
    fn unknown_rssi_has_no_quality() {
        assert_eq!(SignalQuality::from_raw(99, 99), None);
        let quality = SignalQuality::from_raw(15, 2).unwrap();
        assert_eq!(quality.rssi_dbm(), -83);
    }
}
