use std::ffi::{CStr, CString};
use std::net::Ipv4Addr;
use std::ptr;

use esp_idf_svc::eventloop::{
    EspEvent, EspEventDeserializer, EspEventSource, EspSubscription, EspSystemEventLoop, System,
};
use esp_idf_svc::netif::{EspNetif, IpEvent, NetifConfiguration};
use esp_idf_svc::sys::{self, esp, esp_modem as ffi, EspError};

use crate::connectivity::{dispatch_net_event, ConnectivityFlags, IpInfo, NetEvent};
use crate::engine::ModemEngine;
use crate::error::{EngineError, ModemError};
use crate::lifecycle::NetworkStack;
use crate::model::{ModemMode, ModemSettings};

/// SIM7600 DCE（esp_modem 组件）。
pub struct EspModemEngine {
    dce: *mut ffi::esp_modem_dce_t,
    uart_port: sys::uart_port_t,
    _apn: CString,
}

// DCE 只在上线/下线线程中使用
unsafe impl Send for EspModemEngine {}

impl EspModemEngine {
    /// 创建 DCE 并绑定到 PPP 接口。
    pub fn new(settings: &ModemSettings, netif: &EspNetif) -> Result<Self, ModemError> {
        let apn = CString::new(settings.apn.as_str())
            .map_err(|_| ModemError::NetworkStack("APN contains NUL".to_string()))?;
        let uart = &settings.uart;

        // SAFETY: 纯 C 配置结构体，全零是合法的初始值
        let mut uart_config: ffi::esp_modem_uart_term_config = unsafe { core::mem::zeroed() };
        uart_config.port_num = uart.port;
        uart_config.tx_io_num = uart.tx_pin;
        uart_config.rx_io_num = uart.rx_pin;
        uart_config.rts_io_num = uart.rts_pin;
        uart_config.cts_io_num = uart.cts_pin;
        uart_config.baud_rate = settings.default_baud as _;
        uart_config.data_bits = sys::uart_word_length_t_UART_DATA_8_BITS;
        uart_config.stop_bits = sys::uart_stop_bits_t_UART_STOP_BITS_1;
        uart_config.parity = sys::uart_parity_t_UART_PARITY_DISABLE;
        uart_config.flow_control = ffi::esp_modem_flow_ctrl_t_ESP_MODEM_FLOW_CONTROL_NONE;
        uart_config.source_clk = sys::soc_periph_uart_clk_src_legacy_t_UART_SCLK_DEFAULT;
        uart_config.rx_buffer_size = uart.rx_buffer_size as _;
        uart_config.tx_buffer_size = uart.tx_buffer_size as _;
        uart_config.event_queue_size = uart.event_queue_size as _;

        // SAFETY: 同上
        let mut dte_config: ffi::esp_modem_dte_config_t = unsafe { core::mem::zeroed() };
        dte_config.dte_buffer_size = uart.rx_buffer_size / 2;
        dte_config.task_stack_size = settings.engine_task_stack_size as _;
        dte_config.task_priority = settings.engine_task_priority as _;
        dte_config.__bindgen_anon_1.uart_config = uart_config;

        let dce_config = ffi::esp_modem_dce_config_t { apn: apn.as_ptr() };

        log::info!("Initializing esp_modem for the SIM7600 module...");
        // SAFETY: 配置在调用期间有效，netif 由控制器持有直到 DCE 销毁之后
        let dce = unsafe {
            ffi::esp_modem_new_dev(
                ffi::esp_modem_dce_device_ESP_MODEM_DCE_SIM7600,
                &dte_config,
                &dce_config,
                netif.handle() as *mut _,
            )
        };
        if dce.is_null() {
            return Err(ModemError::NetworkStack("esp_modem_new_dev returned NULL".to_string()));
        }
        Ok(Self {
            dce,
            uart_port: uart.port,
            _apn: apn,
        })
    }
}

fn check(op: &'static str, code: sys::esp_err_t) -> Result<(), EngineError> {
    esp!(code).map_err(|err: EspError| EngineError::from_esp(op, err))
}

impl ModemEngine for EspModemEngine {
    fn set_baud(&mut self, baud: u32) -> Result<(), EngineError> {
        // SAFETY: dce 在 destroy 之前一直有效
        check("esp_modem_set_baud", unsafe {
            ffi::esp_modem_set_baud(self.dce, baud as _)
        })
    }

    fn retune_host(&mut self, baud: u32) -> Result<(), EngineError> {
        check("uart_set_baudrate", unsafe {
            sys::uart_set_baudrate(self.uart_port, baud)
        })
    }

    fn pin_ready(&mut self) -> Result<bool, EngineError> {
        let mut ready = false;
        check("esp_modem_read_pin", unsafe {
            ffi::esp_modem_read_pin(self.dce, &mut ready)
        })?;
        Ok(ready)
    }

    fn set_pin(&mut self, pin: &str) -> Result<(), EngineError> {
        let pin = CString::new(pin)
            .map_err(|_| EngineError::new("esp_modem_set_pin", sys::ESP_ERR_INVALID_ARG))?;
        check("esp_modem_set_pin", unsafe {
            ffi::esp_modem_set_pin(self.dce, pin.as_ptr())
        })
    }

    fn signal_quality(&mut self) -> Result<(i32, i32), EngineError> {
        let mut rssi = 0;
        let mut ber = 0;
        check("esp_modem_get_signal_quality", unsafe {
            ffi::esp_modem_get_signal_quality(self.dce, &mut rssi, &mut ber)
        })?;
        Ok((rssi, ber))
    }

    fn set_mode(&mut self, mode: ModemMode) -> Result<(), EngineError> {
        let raw = match mode {
            ModemMode::Command => ffi::esp_modem_dce_mode_ESP_MODEM_MODE_COMMAND,
            ModemMode::Data => ffi::esp_modem_dce_mode_ESP_MODEM_MODE_DATA,
        };
        check("esp_modem_set_mode", unsafe {
            ffi::esp_modem_set_mode(self.dce, raw)
        })
    }

    fn destroy(mut self) {
        // SAFETY: 只销毁一次，之后置空
        unsafe { ffi::esp_modem_destroy(self.dce) };
        self.dce = ptr::null_mut();
    }
}

/// PPP 链路状态事件（`NETIF_PPP_STATUS`，事件 ID 即状态码）。
#[derive(Copy, Clone, Debug)]
pub struct PppStatusEvent(pub i32);

unsafe impl EspEventSource for PppStatusEvent {
    fn source() -> Option<&'static CStr> {
        // SAFETY: 事件基址是 ESP-IDF 导出的静态字符串
        Some(unsafe { CStr::from_ptr(sys::NETIF_PPP_STATUS) })
    }
}

impl EspEventDeserializer for PppStatusEvent {
    type Data<'a> = PppStatusEvent;

    fn deserialize<'a>(data: &EspEvent<'a>) -> Self::Data<'a> {
        PppStatusEvent(data.event_id)
    }
}

impl From<PppStatusEvent> for NetEvent {
    fn from(event: PppStatusEvent) -> Self {
        NetEvent::from_ppp_status(event.0)
    }
}

fn ip_event_to_net(event: &IpEvent) -> Option<NetEvent> {
    match event {
        IpEvent::DhcpIpAssigned(assignment) => {
            let settings = &assignment.ip_settings;
            Some(NetEvent::IpAcquired(IpInfo {
                ip: settings.ip,
                netmask: Ipv4Addr::from(settings.subnet.mask),
                gateway: settings.subnet.gateway,
                dns: [settings.dns, settings.secondary_dns],
            }))
        }
        IpEvent::DhcpIpDeassigned(_) => Some(NetEvent::IpLost),
        IpEvent::DhcpIp6Assigned(assignment) => Some(NetEvent::Ipv6Acquired(assignment.ip)),
        _ => None,
    }
}

/// PPP 网络栈：EspNetif + 系统事件循环。
pub struct EspPppStack {
    sys_loop: EspSystemEventLoop,
    settings: ModemSettings,
}

impl EspPppStack {
    pub fn new(sys_loop: EspSystemEventLoop, settings: ModemSettings) -> Self {
        Self {
            sys_loop,
            settings,
        }
    }
}

impl NetworkStack for EspPppStack {
    type Netif = EspNetif;
    type Engine = EspModemEngine;
    type Subscription = (EspSubscription<'static, System>, EspSubscription<'static, System>);

    fn subscribe(&mut self, flags: &ConnectivityFlags) -> Result<Self::Subscription, ModemError> {
        let ip_flags = flags.clone();
        let ip = self.sys_loop.subscribe::<IpEvent, _>(move |event| {
            if let Some(net_event) = ip_event_to_net(&event) {
                dispatch_net_event(&ip_flags, &net_event);
            }
        })?;
        let ppp_flags = flags.clone();
        let ppp = self
            .sys_loop
            .subscribe::<PppStatusEvent, _>(move |event| dispatch_net_event(&ppp_flags, &event.into()))?;
        Ok((ip, ppp))
    }

    fn create_netif(&mut self) -> Result<EspNetif, ModemError> {
        Ok(EspNetif::new_with_conf(&NetifConfiguration::ppp_default_client())?)
    }

    fn create_engine(&mut self, netif: &EspNetif) -> Result<EspModemEngine, ModemError> {
        EspModemEngine::new(&self.settings, netif)
    }

    fn dns_servers(&self, netif: &EspNetif) -> [Option<Ipv4Addr>; 2] {
        let known = |addr: Ipv4Addr| (!addr.is_unspecified()).then_some(addr);
        [known(netif.get_dns()), known(netif.get_secondary_dns())]
    }

    fn destroy_netif(&mut self, netif: EspNetif) {
        drop(netif);
    }
}
