use std::time::Duration;

use thiserror::Error;

use crate::model::{ModemPowerState, NegotiationStep};

/// 调制解调器控制引擎返回的失败（操作名 + 底层错误码）。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{op} failed with {code}")]
pub struct EngineError {
    pub op: &'static str,
    pub code: i32,
}

impl EngineError {
    pub fn new(op: &'static str, code: i32) -> Self {
        Self { op, code }
    }
}

#[cfg(target_os = "espidf")]
impl EngineError {
    /// 从 ESP-IDF 错误码构造。
    pub fn from_esp(op: &'static str, err: esp_idf_svc::sys::EspError) -> Self {
        Self::new(op, err.code())
    }
}

/// 调制解调器生命周期的错误分类。
#[derive(Debug, Error)]
pub enum ModemError {
    /// GPIO/ADC 等硬件初始化失败，调用方应重启。
    #[error("hardware configuration failed: {0}")]
    HardwareConfig(String),
    /// 状态线在限定时间内没有到达目标状态。
    #[error("modem status line did not reach {target:?} within {waited:?}")]
    PowerSequenceTimeout {
        target: ModemPowerState,
        waited: Duration,
    },
    #[error("negotiation step {step:?} failed: {source}")]
    NegotiationStepFailure {
        step: NegotiationStep,
        #[source]
        source: EngineError,
    },
    #[error("no IP address within {0:?}")]
    ConnectivityTimeout(Duration),
    #[error("wait for connectivity was cancelled")]
    Cancelled,
    /// 网络接口/事件订阅/引擎创建失败。
    #[error("network stack error: {0}")]
    NetworkStack(String),
    /// 热点（softAP + NAPT）启动失败。
    #[error("access point error: {0}")]
    AccessPoint(String),
    #[error("no active modem session")]
    NoActiveSession,
    #[error("modem session already active")]
    SessionAlreadyActive,
}

impl ModemError {
    /// 硬件错误之外的失败都可以从上电流程重新尝试。
    pub fn is_fatal(&self) -> bool {
        matches!(self, ModemError::HardwareConfig(_))
    }

    /// 将 embedded-hal 引脚错误映射为硬件配置错误。
    pub fn gpio<E: embedded_hal::digital::Error>(line: &str, err: E) -> Self {
        ModemError::HardwareConfig(format!("{} line: {:?}", line, err.kind()))
    }
}

#[cfg(target_os = "espidf")]
impl From<esp_idf_svc::sys::EspError> for ModemError {
    fn from(err: esp_idf_svc::sys::EspError) -> Self {
        ModemError::NetworkStack(format!("{:?}", err))
    }
}
