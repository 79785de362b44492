use std::net::Ipv4Addr;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::connectivity::{CancelToken, ConnectivityBit, ConnectivityFlags, WaitOutcome};
use crate::engine::{describe_signal, ModemEngine};
use crate::error::ModemError;
use crate::model::{ModemMode, ModemPowerState, ModemSettings, SessionNegotiationResult};
use crate::negotiator::negotiate_session;
use crate::power::PowerSequencer;

/// 网络栈能力：PPP 接口、事件订阅与引擎创建。
pub trait NetworkStack {
    /// PPP 网络接口句柄。
    type Netif;
    type Engine: ModemEngine;
    /// 事件订阅，drop 即注销。
    type Subscription;

    /// 注册 IP / PPP 事件回调，回调只写入 `flags`。
    fn subscribe(&mut self, flags: &ConnectivityFlags) -> Result<Self::Subscription, ModemError>;

    fn create_netif(&mut self) -> Result<Self::Netif, ModemError>;

    /// 创建绑定到 `netif` 的控制引擎。
    fn create_engine(&mut self, netif: &Self::Netif) -> Result<Self::Engine, ModemError>;

    /// 主/备 DNS。
    fn dns_servers(&self, netif: &Self::Netif) -> [Option<Ipv4Addr>; 2];

    fn destroy_netif(&mut self, netif: Self::Netif);
}

struct Session<N: NetworkStack> {
    netif: N::Netif,
    engine: N::Engine,
    _subscription: N::Subscription,
}

/// 调制解调器生命周期控制器。
///
/// 独占上电时序器、网络接口与引擎；所有修改操作都经由 `&mut self`，
/// 事件回调只能通过 [`ConnectivityFlags`] 与其交互。
pub struct ModemController<N: NetworkStack, O, I, D> {
    power: PowerSequencer<O, I, D>,
    stack: N,
    settings: ModemSettings,
    flags: ConnectivityFlags,
    session: Option<Session<N>>,
    last_negotiation: Option<SessionNegotiationResult>,
}

impl<N, O, I, D> ModemController<N, O, I, D>
where
    N: NetworkStack,
    O: OutputPin,
    I: InputPin,
    D: DelayNs,
{
    pub fn new(power: PowerSequencer<O, I, D>, stack: N, settings: ModemSettings) -> Self {
        Self {
            power,
            stack,
            settings,
            flags: ConnectivityFlags::new(),
            session: None,
            last_negotiation: None,
        }
    }

    /// 开机（启动时的上电复位路径，幂等）。
    pub fn ensure_powered_on(&mut self) -> Result<(), ModemError> {
        self.power.ensure_powered_on()
    }

    pub fn ensure_powered_off(&mut self) -> Result<(), ModemError> {
        self.power.ensure_powered_off()
    }

    /// 只把控制线恢复到释放状态，不等待 STATUS。
    pub fn disable(&mut self) -> Result<(), ModemError> {
        log::info!("Parking modem control lines");
        self.power.reset_lines()
    }

    /// 上线：开机 -> 注册事件 -> 创建 PPP 接口 -> 协商会话。
    ///
    /// 返回后 PPP 在后台拨号，需再调用 [`Self::wait_connected`]。
    /// 协商失败时已创建的资源会被释放，调用方可以直接重试。
    pub fn bring_up(&mut self) -> Result<SessionNegotiationResult, ModemError> {
        if self.session.is_some() {
            return Err(ModemError::SessionAlreadyActive);
        }
        self.power.ensure_powered_on()?;
        self.flags.clear_all();

        let subscription = self.stack.subscribe(&self.flags)?;
        let netif = self.stack.create_netif()?;
        log::info!("Initializing modem engine (APN {})...", self.settings.apn);
        let mut engine = match self.stack.create_engine(&netif) {
            Ok(engine) => engine,
            Err(err) => {
                self.stack.destroy_netif(netif);
                drop(subscription);
                return Err(err);
            }
        };

        match negotiate_session(&mut engine, &self.settings, self.power.delay_mut()) {
            Ok(result) => {
                log::info!(
                    "Modem session negotiated: baud={} signal={} mode={}",
                    result.baud_rate,
                    describe_signal(result.signal.as_ref()),
                    result.mode.as_str()
                );
                self.last_negotiation = Some(result);
                self.session = Some(Session {
                    netif,
                    engine,
                    _subscription: subscription,
                });
                Ok(result)
            }
            Err(err) => {
                log::warn!("Bring-up aborted, releasing modem resources");
                engine.destroy();
                self.stack.destroy_netif(netif);
                drop(subscription);
                Err(err)
            }
        }
    }

    /// 等待 PPP 拿到 IP。`timeout` 为 `None` 时无限等待。
    pub fn wait_connected(
        &self,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<(), ModemError> {
        match self.flags.wait(ConnectivityBit::Connected, timeout, cancel) {
            WaitOutcome::Signaled => Ok(()),
            WaitOutcome::TimedOut => Err(ModemError::ConnectivityTimeout(
                timeout.unwrap_or_default(),
            )),
            WaitOutcome::Cancelled => Err(ModemError::Cancelled),
        }
    }

    /// 下线：切回命令模式（失败继续）-> 销毁引擎 -> 销毁接口。
    pub fn tear_down(&mut self) -> Result<(), ModemError> {
        let Some(session) = self.session.take() else {
            log::warn!("Tear-down requested without an active modem session");
            return Err(ModemError::NoActiveSession);
        };
        let Session {
            netif,
            mut engine,
            _subscription,
        } = session;

        if let Err(err) = engine.set_mode(ModemMode::Command) {
            log::error!("Switching to command mode failed: {}", err);
        }
        engine.destroy();
        self.stack.destroy_netif(netif);
        drop(_subscription);
        self.flags.clear_all();
        self.last_negotiation = None;
        log::info!("Modem session closed");
        Ok(())
    }

    pub fn is_session_active(&self) -> bool {
        self.session.is_some()
    }

    /// PPP 当前是否持有 IP（不阻塞）。
    pub fn is_connected(&self) -> bool {
        self.flags.is_set(ConnectivityBit::Connected)
    }

    /// 只读访问 PPP 接口（会话期间有效）。
    pub fn network_interface(&self) -> Option<&N::Netif> {
        self.session.as_ref().map(|session| &session.netif)
    }

    pub fn connectivity_flags(&self) -> ConnectivityFlags {
        self.flags.clone()
    }

    pub fn dns_servers(&self) -> Option<[Option<Ipv4Addr>; 2]> {
        self.network_interface()
            .map(|netif| self.stack.dns_servers(netif))
    }

    pub fn last_negotiation(&self) -> Option<SessionNegotiationResult> {
        self.last_negotiation
    }

    pub fn power_state(&self) -> ModemPowerState {
        self.power.state()
    }

    /// 交出指示灯引脚给闪烁任务。
    pub fn take_indicator(&mut self) -> Option<O> {
        self.power.take_indicator()
    }
}
