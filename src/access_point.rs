use core::convert::TryInto;
use std::net::Ipv4Addr;
use std::sync::Arc;

use embedded_svc::wifi::{AccessPointConfiguration, AuthMethod, Configuration};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::ipv4::{self, RouterConfiguration};
use esp_idf_svc::netif::{EspNetif, NetifConfiguration, NetifStack};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::EspError;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi, WifiDriver, WifiEvent};

use crate::blinking::StationCounter;
use crate::error::ModemError;
use crate::model::AccessPointSettings;

/// 运行中的热点，drop 即停止。
pub struct AccessPoint {
    _wifi: BlockingWifi<EspWifi<'static>>,
    _subscription: EspSubscription<'static, System>,
}

fn ap_err(context: &str, err: EspError) -> ModemError {
    ModemError::AccessPoint(format!("{}: {:?}", context, err))
}

/// 启动 softAP：DHCP 下发调制解调器的 DNS，并打开 NAPT。
pub fn start_access_point(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs: Option<EspDefaultNvsPartition>,
    settings: &AccessPointSettings,
    dns: Ipv4Addr,
    stations: Arc<StationCounter>,
) -> Result<AccessPoint, ModemError> {
    let mut router = NetifConfiguration::wifi_default_router();
    router.ip_configuration = Some(ipv4::Configuration::Router(RouterConfiguration {
        dns: Some(dns),
        secondary_dns: Some(dns),
        ..Default::default()
    }));

    let driver = WifiDriver::new(modem, sys_loop.clone(), nvs).map_err(|err| ap_err("wifi driver", err))?;
    let sta_netif = EspNetif::new(NetifStack::Sta).map_err(|err| ap_err("sta netif", err))?;
    let ap_netif = EspNetif::new_with_conf(&router).map_err(|err| ap_err("ap netif", err))?;
    let wifi = EspWifi::wrap_all(driver, sta_netif, ap_netif).map_err(|err| ap_err("wifi", err))?;
    let mut wifi = BlockingWifi::wrap(wifi, sys_loop.clone()).map_err(|err| ap_err("wifi", err))?;

    let auth_method = if settings.is_open() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };
    let configuration = Configuration::AccessPoint(AccessPointConfiguration {
        ssid: settings
            .ssid
            .as_str()
            .try_into()
            .map_err(|_| ModemError::AccessPoint(format!("SSID too long: {}", settings.ssid)))?,
        password: settings
            .password
            .as_str()
            .try_into()
            .map_err(|_| ModemError::AccessPoint("password too long".to_string()))?,
        channel: settings.channel,
        auth_method,
        max_connections: settings.max_connections,
        ..Default::default()
    });

    let subscription = sys_loop
        .subscribe::<WifiEvent, _>(move |event| match event {
            WifiEvent::ApStaConnected(..) => {
                stations.connected();
                log::info!("Station joined, {} connected", stations.get());
            }
            WifiEvent::ApStaDisconnected(..) => {
                stations.disconnected();
                log::info!("Station left, {} connected", stations.get());
            }
            _ => {}
        })
        .map_err(|err| ap_err("wifi events", err))?;

    wifi.set_configuration(&configuration)
        .map_err(|err| ap_err("configuration", err))?;
    wifi.start().map_err(|err| ap_err("start", err))?;
    wifi.wait_netif_up().map_err(|err| ap_err("netif up", err))?;
    wifi.wifi_mut().ap_netif_mut().enable_napt(true);
    log::info!(
        "softAP ready: SSID {} channel {} ({}), DNS {}",
        settings.ssid,
        settings.channel,
        if settings.is_open() { "open" } else { "WPA/WPA2" },
        dns
    );

    Ok(AccessPoint {
        _wifi: wifi,
        _subscription: subscription,
    })
}
