use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::error::ModemError;
use crate::model::{ModemPowerState, PowerButtonPulse, PowerTiming};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// 调制解调器控制线（PWRKEY/FLIGHT/DTR/STATUS + 指示灯）。
pub struct ModemLines<O, I> {
    pub power_key: O,
    /// 低电平进入飞行模式。
    pub flight_mode: O,
    pub dtr: O,
    pub status: I,
    /// 按键期间跟随 PWRKEY 闪亮，上线后交给闪烁任务。
    pub indicator: Option<O>,
}

/// 上下电时序器：按键脉冲 + 轮询 STATUS 线。
pub struct PowerSequencer<O, I, D> {
    lines: ModemLines<O, I>,
    delay: D,
    timing: PowerTiming,
    state: ModemPowerState,
    // 首次开机前是否已确认模块处于干净的上电状态
    reset_done: bool,
}

impl<O, I, D> PowerSequencer<O, I, D>
where
    O: OutputPin,
    I: InputPin,
    D: DelayNs,
{
    pub fn new(lines: ModemLines<O, I>, delay: D, timing: PowerTiming) -> Self {
        Self {
            lines,
            delay,
            timing,
            state: ModemPowerState::Off,
            reset_done: false,
        }
    }

    /// 最近一次观测/驱动到的状态。
    pub fn state(&self) -> ModemPowerState {
        self.state
    }

    /// 读取 STATUS 线。
    pub fn is_powered(&mut self) -> Result<bool, ModemError> {
        self.lines
            .status
            .is_high()
            .map_err(|err| ModemError::gpio("status", err))
    }

    /// 将控制线恢复到已知的释放状态，不做任何轮询。
    pub fn reset_lines(&mut self) -> Result<(), ModemError> {
        self.lines
            .power_key
            .set_low()
            .map_err(|err| ModemError::gpio("power_key", err))?;
        if let Some(indicator) = self.lines.indicator.as_mut() {
            indicator
                .set_low()
                .map_err(|err| ModemError::gpio("indicator", err))?;
        }
        self.lines
            .dtr
            .set_low()
            .map_err(|err| ModemError::gpio("dtr", err))?;
        self.lines
            .flight_mode
            .set_high()
            .map_err(|err| ModemError::gpio("flight_mode", err))?;
        Ok(())
    }

    /// 确保模块已开机。
    ///
    /// 新建的时序器第一次发现模块已开机时会先强制关机再开机，
    /// 之后的调用在 STATUS 为高时直接返回，不产生任何脉冲。
    pub fn ensure_powered_on(&mut self) -> Result<(), ModemError> {
        self.reset_lines()?;
        let mut powered = self.is_powered()?;
        if powered && !self.reset_done {
            log::warn!("Modem already on at boot, power cycling...");
            self.power_off()?;
            powered = false;
        }
        self.reset_done = true;
        if powered {
            self.state = ModemPowerState::PoweredOn;
            log::debug!("Modem already powered on");
            return Ok(());
        }

        log::info!("Turning on modem...");
        self.state = ModemPowerState::PoweringOn;
        self.press(PowerButtonPulse::for_target(ModemPowerState::PoweredOn))?;
        let (interval, timeout) = (self.timing.power_on_poll, self.timing.power_on_timeout);
        self.wait_for(ModemPowerState::PoweredOn, interval, timeout)?;
        // 等待模块完成网络注册，不可跳过
        self.sleep(self.timing.warm_up);
        self.state = ModemPowerState::PoweredOn;
        log::info!("Modem is powered up and ready");
        Ok(())
    }

    /// 确保模块已关机。
    pub fn ensure_powered_off(&mut self) -> Result<(), ModemError> {
        self.reset_lines()?;
        if !self.is_powered()? {
            self.state = ModemPowerState::Off;
            log::debug!("Modem already powered off");
            return Ok(());
        }
        self.power_off()
    }

    /// 协商阶段复用同一个阻塞延时。
    pub fn delay_mut(&mut self) -> &mut D {
        &mut self.delay
    }

    /// 交出指示灯引脚（上线完成后给闪烁任务使用）。
    pub fn take_indicator(&mut self) -> Option<O> {
        self.lines.indicator.take()
    }

    fn power_off(&mut self) -> Result<(), ModemError> {
        log::warn!("Turning off modem...");
        self.state = ModemPowerState::PoweringOff;
        self.press(PowerButtonPulse::for_target(ModemPowerState::Off))?;
        let (interval, timeout) = (self.timing.power_off_poll, self.timing.power_off_timeout);
        self.wait_for(ModemPowerState::Off, interval, timeout)?;
        self.sleep(self.timing.power_off_settle);
        self.state = ModemPowerState::Off;
        log::info!("Modem is powered off");
        Ok(())
    }

    fn press(&mut self, pulse: PowerButtonPulse) -> Result<(), ModemError> {
        log::debug!(
            "PWRKEY pulse {}ms",
            pulse.assert_duration.as_millis()
        );
        self.drive_key(false)?;
        self.sleep(pulse.pre_delay);
        self.drive_key(true)?;
        self.sleep(pulse.assert_duration);
        self.drive_key(false)?;
        self.sleep(pulse.settle_delay);
        Ok(())
    }

    fn drive_key(&mut self, high: bool) -> Result<(), ModemError> {
        let key = if high {
            self.lines.power_key.set_high()
        } else {
            self.lines.power_key.set_low()
        };
        key.map_err(|err| ModemError::gpio("power_key", err))?;
        if let Some(indicator) = self.lines.indicator.as_mut() {
            let led = if high {
                indicator.set_high()
            } else {
                indicator.set_low()
            };
            led.map_err(|err| ModemError::gpio("indicator", err))?;
        }
        Ok(())
    }

    fn wait_for(
        &mut self,
        target: ModemPowerState,
        interval: Duration,
        timeout: Duration,
    ) -> Result<(), ModemError> {
        let want_high = target == ModemPowerState::PoweredOn;
        // 零间隔时 waited 永远不增长，轮询至少间隔 1ms
        let interval = interval.max(MIN_POLL_INTERVAL);
        let mut waited = Duration::ZERO;
        loop {
            if self.is_powered()? == want_high {
                return Ok(());
            }
            if waited >= timeout {
                self.state = ModemPowerState::from_status(!want_high);
                log::error!(
                    "Modem status stuck while waiting for {} ({}ms)",
                    target.as_str(),
                    waited.as_millis()
                );
                return Err(ModemError::PowerSequenceTimeout { target, waited });
            }
            self.sleep(interval);
            waited += interval;
        }
    }

    fn sleep(&mut self, duration: Duration) {
        let ms = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
        self.delay.delay_ms(ms);
    }
}
