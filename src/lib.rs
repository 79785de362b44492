// 模块划分：上电时序、连通性事件、会话协商、生命周期控制，以及电池/指示灯/热点
pub mod battery;
pub mod blinking;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod negotiator;
pub mod power;
pub mod status;

#[cfg(target_os = "espidf")]
pub mod access_point;
#[cfg(target_os = "espidf")]
pub mod board;
#[cfg(target_os = "espidf")]
pub mod esp_modem;
