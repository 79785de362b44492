use crate::error::EngineError;
use crate::model::{ModemMode, SignalQuality};

/// 调制解调器控制引擎（DCE 命令/数据模式抽象）。
///
/// 生命周期由控制器独占：创建于上线流程，`destroy` 于下线流程。
pub trait ModemEngine {
    /// 切换模块波特率（只改模块一侧）。
    fn set_baud(&mut self, baud: u32) -> Result<(), EngineError>;

    /// 模块已切换后，把本端 UART 调整到同一波特率。
    fn retune_host(&mut self, baud: u32) -> Result<(), EngineError>;

    /// SIM 是否已就绪（无需再输入 PIN）。
    fn pin_ready(&mut self) -> Result<bool, EngineError>;

    fn set_pin(&mut self, pin: &str) -> Result<(), EngineError>;

    /// 返回原始 (rssi, ber)。
    fn signal_quality(&mut self) -> Result<(i32, i32), EngineError>;

    fn set_mode(&mut self, mode: ModemMode) -> Result<(), EngineError>;

    /// 释放引擎资源。
    fn destroy(self);
}

/// 便于日志输出的信号描述。
pub fn describe_signal(signal: Option<&SignalQuality>) -> String {
    match signal {
        Some(quality) => quality.to_string(),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::ModemEngine;
    use crate::error::EngineError;
    use crate::model::ModemMode;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Call {
        SetBaud(u32),
        RetuneHost(u32),
        PinReady,
        SetPin(String),
        SignalQuality,
        SetMode(ModemMode),
        Destroy,
    }

    /// 可注入失败的引擎，记录所有调用。
    pub struct FakeEngine {
        pub calls: Rc<RefCell<Vec<Call>>>,
        pub fail_baud: bool,
        pub fail_retune: bool,
        pub pin_ready: Result<bool, EngineError>,
        pub fail_pin: bool,
        pub signal: Result<(i32, i32), EngineError>,
        pub fail_data_mode: bool,
        pub fail_command_mode: bool,
    }

    impl FakeEngine {
        pub fn new() -> Self {
            Self {
                calls: Rc::new(RefCell::new(Vec::new())),
                fail_baud: false,
                fail_retune: false,
                pin_ready: Ok(true),
                fail_pin: false,
                signal: Ok((20, 0)),
                fail_data_mode: false,
                fail_command_mode: false,
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }

        fn record(&self, call: Call) {
            self.calls.borrow_mut().push(call);
        }
    }

    impl ModemEngine for FakeEngine {
        fn set_baud(&mut self, baud: u32) -> Result<(), EngineError> {
            self.record(Call::SetBaud(baud));
            if self.fail_baud {
                return Err(EngineError::new("set_baud", -1));
            }
            Ok(())
        }

        fn retune_host(&mut self, baud: u32) -> Result<(), EngineError> {
            self.record(Call::RetuneHost(baud));
            if self.fail_retune {
                return Err(EngineError::new("uart_set_baudrate", -1));
            }
            Ok(())
        }

        fn pin_ready(&mut self) -> Result<bool, EngineError> {
            self.record(Call::PinReady);
            self.pin_ready.clone()
        }

        fn set_pin(&mut self, pin: &str) -> Result<(), EngineError> {
            self.record(Call::SetPin(pin.to_string()));
            if self.fail_pin {
                return Err(EngineError::new("set_pin", -1));
            }
            Ok(())
        }

        fn signal_quality(&mut self) -> Result<(i32, i32), EngineError> {
            self.record(Call::SignalQuality);
            self.signal.clone()
        }

        fn set_mode(&mut self, mode: ModemMode) -> Result<(), EngineError> {
            self.record(Call::SetMode(mode));
            let fail = match mode {
                ModemMode::Data => self.fail_data_mode,
                ModemMode::Command => self.fail_command_mode,
            };
            if fail {
                return Err(EngineError::new("set_mode", -1));
            }
            Ok(())
        }

        fn destroy(self) {
            self.record(Call::Destroy);
        }
    }
}
