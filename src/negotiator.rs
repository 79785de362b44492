use embedded_hal::delay::DelayNs;

use crate::engine::ModemEngine;
use crate::error::ModemError;
use crate::model::{ModemMode, ModemSettings, NegotiationStep, SessionNegotiationResult, SignalQuality};

// 设置 PIN / 切换波特率后等待模块稳定
const STEP_SETTLE_MS: u32 = 1000;

/// 会话协商：SIM 解锁 -> 提升波特率 -> 信号质量 -> 进入数据模式。
///
/// 步骤顺序固定，内部不重试；只有模块拒绝波特率时可以继续，
/// 模块已切换而本端 UART 调整失败则中止。
/// 成功返回后 PPP 开始异步拨号，等待 IP 由调用方负责。
pub fn negotiate_session<E, D>(
    engine: &mut E,
    settings: &ModemSettings,
    delay: &mut D,
) -> Result<SessionNegotiationResult, ModemError>
where
    E: ModemEngine,
    D: DelayNs,
{
    if let Some(pin) = settings.sim_pin.as_deref() {
        unlock_sim(engine, pin, delay)?;
    }

    let baud_rate = match engine.set_baud(settings.target_baud) {
        Ok(()) => {
            // 模块已在新波特率上，本端跟不上则链路不可用
            engine.retune_host(settings.target_baud).map_err(|source| {
                log::error!("Host UART retune to {} failed: {}", settings.target_baud, source);
                ModemError::NegotiationStepFailure {
                    step: NegotiationStep::BaudRate,
                    source,
                }
            })?;
            log::info!("Baud rate raised to {}", settings.target_baud);
            settings.target_baud
        }
        Err(err) => {
            log::error!("Failed to set baud rate: {}", err);
            settings.default_baud
        }
    };
    delay.delay_ms(STEP_SETTLE_MS);

    let (rssi, ber) = engine.signal_quality().map_err(|source| {
        log::error!("Signal quality query failed: {}", source);
        ModemError::NegotiationStepFailure {
            step: NegotiationStep::SignalQuality,
            source,
        }
    })?;
    let signal = SignalQuality::from_raw(rssi, ber);
    log::info!("Signal quality: rssi={}, ber={}", rssi, ber);

    engine.set_mode(ModemMode::Data).map_err(|source| {
        log::error!("Switching to data mode failed: {}", source);
        ModemError::NegotiationStepFailure {
            step: NegotiationStep::DataMode,
            source,
        }
    })?;

    Ok(SessionNegotiationResult {
        baud_rate,
        signal,
        mode: ModemMode::Data,
    })
}

fn unlock_sim<E, D>(engine: &mut E, pin: &str, delay: &mut D) -> Result<(), ModemError>
where
    E: ModemEngine,
    D: DelayNs,
{
    match engine.pin_ready() {
        Ok(true) => {
            log::debug!("SIM ready, PIN not needed");
            Ok(())
        }
        Ok(false) => {
            engine.set_pin(pin).map_err(|source| {
                log::error!("Setting SIM PIN failed: {}", source);
                ModemError::NegotiationStepFailure {
                    step: NegotiationStep::SimPin,
                    source,
                }
            })?;
            log::info!("SIM unlocked");
            delay.delay_ms(STEP_SETTLE_MS);
            Ok(())
        }
        // 查询失败时跳过解锁，后续步骤会暴露问题
        Err(err) => {
            log::warn!("SIM PIN state query failed: {}", err);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fakes::{Call, FakeEngine};
    use crate::error::EngineError;
    use crate::power::fakes::Rig;

    fn settings() -> ModemSettings {
        ModemSettings {
            sim_pin: None,
            ..ModemSettings::default()
        }
    }

    #[test]
    fn baud_failure_still_queries_signal() {
        let rig = Rig::new(&[]);
        let mut engine = FakeEngine::new();
        engine.fail_baud = true;
        engine.signal = Ok((15, 2));

        let result = negotiate_session(&mut engine, &settings(), &mut rig.delay()).unwrap();

        assert_eq!(result.baud_rate, 115_200);
        assert_eq!(result.signal, SignalQuality::from_raw(15, 2));
        assert_eq!(result.mode, ModemMode::Data);
        assert_eq!(
            engine.calls(),
            vec![
                Call::SetBaud(3_000_000),
                Call::SignalQuality,
                Call::SetMode(ModemMode::Data)
            ]
        );
    }

    #[test]
    fn signal_failure_skips_mode_switch() {
        let rig = Rig::new(&[]);
        let mut engine = FakeEngine::new();
        engine.signal = Err(EngineError::new("get_signal_quality", 0x107));

        let err = negotiate_session(&mut engine, &settings(), &mut rig.delay()).unwrap_err();

        assert!(matches!(
            err,
            ModemError::NegotiationStepFailure {
                step: NegotiationStep::SignalQuality,
                ..
            }
        ));
        assert!(!engine.calls().contains(&Call::SetMode(ModemMode::Data)));
    }

    #[test]
    fn data_mode_failure_is_reported() {
        let rig = Rig::new(&[]);
        let mut engine = FakeEngine::new();
        engine.fail_data_mode = true;

        let err = negotiate_session(&mut engine, &settings(), &mut rig.delay()).unwrap_err();
        assert!(matches!(
            err,
            ModemError::NegotiationStepFailure {
                step: NegotiationStep::DataMode,
                ..
            }
        ));
    }

    #[test]
    fn successful_baud_is_reported() {
        let rig = Rig::new(&[]);
        let mut engine = FakeEngine::new();
        let result = negotiate_session(&mut engine, &settings(), &mut rig.delay()).unwrap();
        assert_eq!(result.baud_rate, 3_000_000);
        assert_eq!(rig.delays(), vec![1000]);
        assert_eq!(
            &engine.calls()[..2],
            &[Call::SetBaud(3_000_000), Call::RetuneHost(3_000_000)]
        );
    }

    #[test]
    fn host_retune_failure_aborts_negotiation() {
        let rig = Rig::new(&[]);
        let mut engine = FakeEngine::new();
        engine.fail_retune = true;

        let err = negotiate_session(&mut engine, &settings(), &mut rig.delay()).unwrap_err();

        assert!(matches!(
            err,
            ModemError::NegotiationStepFailure {
                step: NegotiationStep::BaudRate,
                ..
            }
        ));
        // 不能在失配的链路上继续查询
        assert_eq!(
            engine.calls(),
            vec![Call::SetBaud(3_000_000), Call::RetuneHost(3_000_000)]
        );
        assert!(rig.delays().is_empty());
    }

    #[test]
    fn locked_sim_is_unlocked_first() {
        let rig = Rig::new(&[]);
        let mut engine = FakeEngine::new();
        engine.pin_ready = Ok(false);
        let settings = ModemSettings {
            sim_pin: Some("1234".to_string()),
            ..ModemSettings::default()
        };

        negotiate_session(&mut engine, &settings, &mut rig.delay()).unwrap();

        let calls = engine.calls();
        assert_eq!(calls[0], Call::PinReady);
        assert_eq!(calls[1], Call::SetPin("1234".to_string()));
        assert_eq!(calls[2], Call::SetBaud(3_000_000));
        assert_eq!(rig.delays(), vec![1000, 1000]);
    }

    #[test]
    fn pin_failure_aborts_before_baud() {
        let rig = Rig::new(&[]);
        let mut engine = FakeEngine::new();
        engine.pin_ready = Ok(false);
        engine.fail_pin = true;
        let settings = ModemSettings {
            sim_pin: Some("0000".to_string()),
            ..ModemSettings::default()
        };

        let err = negotiate_session(&mut engine, &settings, &mut rig.delay()).unwrap_err();

        assert!(matches!(
            err,
            ModemError::NegotiationStepFailure {
                step: NegotiationStep::SimPin,
                ..
            }
        ));
        assert_eq!(engine.calls().len(), 2);
    }

    #[test]
    fn ready_sim_skips_pin() {
        let rig = Rig::new(&[]);
        let mut engine = FakeEngine::new();
        let settings = ModemSettings {
            sim_pin: Some("1234".to_string()),
            ..ModemSettings::default()
        };
        negotiate_session(&mut engine, &settings, &mut rig.delay()).unwrap();
        assert!(!engine
            .calls()
            .iter()
            .any(|call| matches!(call, Call::SetPin(_))));
    }
}
