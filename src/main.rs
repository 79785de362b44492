#[cfg(target_os = "espidf")]
fn main() {
    // ESP-IDF 运行时初始化（链接补丁 & 日志）
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("Air gateway booting (ESP-IDF)...");

    if let Err(err) = firmware::run() {
        log::error!("Gateway stopped: {}", err);
        firmware::restart();
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("air-gateway only runs on ESP-IDF targets; use `cargo test` for the host-side logic");
}

#[cfg(target_os = "espidf")]
mod firmware {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use air_gateway::access_point::start_access_point;
    use air_gateway::battery::BatteryMonitor;
    use air_gateway::blinking::{spawn_blink_task, StationCounter};
    use air_gateway::board;
    use air_gateway::connectivity::CancelToken;
    use air_gateway::error::ModemError;
    use air_gateway::esp_modem::EspPppStack;
    use air_gateway::lifecycle::{ModemController, NetworkStack};
    use air_gateway::model::{GatewaySettings, SessionNegotiationResult};
    use air_gateway::power::PowerSequencer;
    use air_gateway::status::SystemStatus;
    use embedded_hal::delay::DelayNs;
    use embedded_hal::digital::{InputPin, OutputPin};
    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_hal::gpio::{InputPin as _, OutputPin as _};
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    pub fn restart() -> ! {
        log::warn!("Restarting...");
        FreeRtos::delay_ms(1000);
        unsafe { esp_idf_svc::sys::esp_restart() }
    }

    fn hw(context: &str) -> impl Fn(esp_idf_svc::sys::EspError) -> ModemError + '_ {
        move |err| ModemError::HardwareConfig(format!("{}: {:?}", context, err))
    }

    pub fn run() -> Result<(), ModemError> {
        let settings = GatewaySettings::default();

        // NVS 供 Wi-Fi 驱动使用
        let nvs = EspDefaultNvsPartition::take().map_err(hw("nvs"))?;
        let peripherals = Peripherals::take().map_err(hw("peripherals"))?;
        let pins = peripherals.pins;

        let lines = board::modem_lines(
            pins.gpio4.downgrade_output(),
            pins.gpio25.downgrade_output(),
            pins.gpio32.downgrade_output(),
            pins.gpio34.downgrade_input(),
            pins.gpio12.downgrade_output(),
        )?;
        let mut battery = BatteryMonitor::new(peripherals.adc1, pins.gpio35, pins.gpio36)?;

        let power = PowerSequencer::new(lines, FreeRtos, settings.modem.power.clone());
        let sys_loop = EspSystemEventLoop::take()?;
        let stack = EspPppStack::new(sys_loop.clone(), settings.modem.clone());
        let mut modem = ModemController::new(power, stack, settings.modem.clone());

        // 上电复位：模块若已开机则先关再开
        modem.ensure_powered_on()?;
        log_status(&mut battery, &modem, 0);

        bring_up_with_retries(&mut modem, settings.bring_up_attempts)?;

        let cancel = CancelToken::new();
        if let Some(limit) = settings.connect_watchdog {
            let watchdog = cancel.clone();
            thread::spawn(move || {
                thread::sleep(limit);
                watchdog.cancel();
            });
        }
        log::info!("Waiting for IP address...");
        if let Err(err) = modem.wait_connected(None, Some(&cancel)) {
            log::error!("Modem never connected: {}", err);
            if let Err(err) = modem.tear_down() {
                log::warn!("Tear-down failed: {}", err);
            }
            modem.disable()?;
            return Err(err);
        }

        let dns = modem
            .dns_servers()
            .and_then(|servers| servers[0])
            .ok_or_else(|| ModemError::NetworkStack("modem interface has no DNS".to_string()))?;

        let stations = Arc::new(StationCounter::new());
        let _ap = start_access_point(
            peripherals.modem,
            sys_loop,
            Some(nvs),
            &settings.access_point,
            dns,
            stations.clone(),
        )?;
        log::warn!("Hotspot is up, clients are routed through the modem");

        // 指示灯交给闪烁任务
        if let Some(led) = modem.take_indicator() {
            let _blink_handle = spawn_blink_task(led, stations.clone());
        }

        let mut last_log = Instant::now();
        loop {
            if last_log.elapsed() >= settings.status_log_interval {
                log_status(&mut battery, &modem, stations.get());
                last_log = Instant::now();
            }
            FreeRtos::delay_ms(1000);
        }
    }

    /// 整个上线流程按次数重试，两次之间先关机。
    fn bring_up_with_retries<N, O, I, D>(
        modem: &mut ModemController<N, O, I, D>,
        attempts: u32,
    ) -> Result<SessionNegotiationResult, ModemError>
    where
        N: NetworkStack,
        O: OutputPin,
        I: InputPin,
        D: DelayNs,
    {
        let mut attempt = 1;
        loop {
            match modem.bring_up() {
                Ok(result) => return Ok(result),
                Err(err) if err.is_fatal() || attempt >= attempts.max(1) => return Err(err),
                Err(err) => {
                    log::warn!("Bring-up attempt {}/{} failed: {}", attempt, attempts, err);
                    if let Err(err) = modem.ensure_powered_off() {
                        log::warn!("Power-off before retry failed: {}", err);
                    }
                    thread::sleep(Duration::from_secs(1));
                    attempt += 1;
                }
            }
        }
    }

    fn log_status<N, O, I, D>(battery: &mut BatteryMonitor, modem: &ModemController<N, O, I, D>, stations: u32)
    where
        N: NetworkStack,
        O: OutputPin,
        I: InputPin,
        D: DelayNs,
    {
        let mut status = SystemStatus::new(battery.battery_mv(), battery.solar_mv(), modem.power_state());
        status.connected = modem.is_connected();
        status.stations = stations;
        status.session = modem.last_negotiation();
        log::info!("{}", status.summary());
        log::debug!("status {}", status.to_json_string());
    }
}
