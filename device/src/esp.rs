use std::{
    io::{Read as _, Write as _},
    net::{TcpListener, TcpStream},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use dht_sensor::dht11;
use embedded_svc::{
    http::{client::Client as HttpClient, Status},
    io::{Read as _, Write as _},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    delay::Ets,
    gpio::{AnyIOPin, Gpio34, Gpio35, InputOutput, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::EspWifi,
};
use log::{error, info, warn};

use relay_common::{
    connect,
    http::MAX_REQUEST_BYTES,
    reading::vsys_volts,
    DeviceConfig, DeviceMode, PowerSource, Reading, Response, RetryPolicy, Route, SleepPlan,
    WifiLink, DEFAULT_REFRESH_MS,
};

const NVS_NAMESPACE: &str = "relay";
const NVS_CONFIG_KEY: &str = "device_env";
const MAX_CONFIG_BYTES: usize = 1024;

const HTTP_PORT: u16 = 80;
const PUSH_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);
const SERVER_RESET_DELAY: Duration = Duration::from_secs(10);
const DEEP_SLEEP_SETTLE: Duration = Duration::from_secs(1);

// The oneshot driver returns 12-bit samples; the divider math expects 16-bit.
const ADC_RAW_MAX: u32 = 4_095;

type VsysChannel = AdcChannelDriver<'static, Gpio34, AdcDriver<'static, ADC1>>;

struct StationLink {
    wifi: EspWifi<'static>,
}

impl StationLink {
    fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
    ) -> anyhow::Result<Self> {
        let wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;
        Ok(Self { wifi })
    }

    fn ip(&self) -> Option<std::net::Ipv4Addr> {
        self.wifi.sta_netif().get_ip_info().ok().map(|info| info.ip)
    }
}

impl WifiLink for StationLink {
    type Error = anyhow::Error;

    fn associate(&mut self, ssid: &str, password: &str) -> Result<(), Self::Error> {
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: ssid.try_into().map_err(|_| anyhow!("wifi ssid too long"))?,
                password: password
                    .try_into()
                    .map_err(|_| anyhow!("wifi password too long"))?,
                auth_method,
                ..Default::default()
            }))?;

        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }
        self.wifi.connect()?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
            && self.wifi.sta_netif().is_up().unwrap_or(false)
    }

    fn set_radio(&mut self, enabled: bool) -> Result<(), Self::Error> {
        if enabled {
            self.wifi.start()?;
        } else {
            self.wifi.stop()?;
        }
        Ok(())
    }
}

struct SensorSuite {
    pin: i32,
    dht_pin: PinDriver<'static, AnyIOPin, InputOutput>,
    vsys: Option<VsysChannel>,
    delay: Ets,
}

impl SensorSuite {
    fn new(sensor_pin: i32, adc: ADC1, vsys_pin: Gpio34) -> anyhow::Result<Self> {
        // SAFETY: the DHT11 pin is chosen at runtime from config and no other
        // driver in this firmware claims it.
        let pin = unsafe { AnyIOPin::new(sensor_pin) };
        let mut dht_pin = PinDriver::input_output_od(pin)?;
        dht_pin.set_pull(Pull::Up)?;
        dht_pin.set_high()?;

        let vsys = match init_vsys_channel(adc, vsys_pin) {
            Ok(channel) => Some(channel),
            Err(err) => {
                warn!("VSYS monitor unavailable, reporting 0V: {err:#}");
                None
            }
        };

        Ok(Self {
            pin: sensor_pin,
            dht_pin,
            vsys,
            delay: Ets,
        })
    }

    fn read(&mut self) -> Reading {
        let volts = self.read_vsys();

        if let Err(err) = self.dht_pin.set_high() {
            return Reading::fault(format!("failed to release DHT11 line: {err:?}"), volts);
        }

        match dht11::blocking::read(&mut self.delay, &mut self.dht_pin) {
            Ok(measurement) => {
                info!(
                    "[DHT11] {}°C, {}% on GPIO{}",
                    measurement.temperature, measurement.relative_humidity, self.pin
                );
                Reading::measured(
                    f64::from(measurement.temperature),
                    f64::from(measurement.relative_humidity),
                    volts,
                    uptime_secs(),
                )
            }
            Err(err) => {
                warn!("failed to read DHT11 on GPIO{}: {err:?}", self.pin);
                Reading::fault(format!("{err:?}"), volts)
            }
        }
    }

    fn read_vsys(&mut self) -> f64 {
        let Some(channel) = self.vsys.as_mut() else {
            return 0.0;
        };

        match channel.read_raw() {
            Ok(raw) => {
                let scaled = u32::from(raw).min(ADC_RAW_MAX) * u32::from(u16::MAX) / ADC_RAW_MAX;
                vsys_volts(scaled as u16)
            }
            Err(err) => {
                warn!("VSYS sample failed: {err:?}");
                0.0
            }
        }
    }
}

fn init_vsys_channel(adc: ADC1, pin: Gpio34) -> anyhow::Result<VsysChannel> {
    let driver = AdcDriver::new(adc)?;
    let config = AdcChannelConfig {
        attenuation: DB_11,
        ..Default::default()
    };
    Ok(AdcChannelDriver::new(driver, pin, &config)?)
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let config = load_config(nvs_partition.clone());

    info!(
        "config loaded: mode={}, ssid=`{}`, pin={}, report_url=`{}`, sleep={}m",
        config.mode, config.ssid, config.sensor_pin, config.report_url, config.sleep_mins
    );

    let Peripherals {
        modem, adc1, pins, ..
    } = Peripherals::take()?;

    let mut sensors = SensorSuite::new(config.sensor_pin, adc1, pins.gpio34)
        .context("failed to initialize sensors")?;
    let mut link = StationLink::new(modem, sys_loop, nvs_partition)?;
    bring_up_link(&mut link, &config);

    match config.mode {
        DeviceMode::Server => {
            if !link.is_connected() {
                error!(
                    "server mode requires wifi; resetting in {}s",
                    SERVER_RESET_DELAY.as_secs()
                );
                thread::sleep(SERVER_RESET_DELAY);
                unsafe { esp_idf_svc::sys::esp_restart() };
            }
            serve(&mut sensors, &link)
        }
        DeviceMode::Push => {
            let power = detect_power_source(pins.gpio35);
            push_loop(&config, &mut link, &mut sensors, power)
        }
    }
}

fn load_config(nvs_partition: EspDefaultNvsPartition) -> DeviceConfig {
    let mut config = match read_config_text(nvs_partition) {
        Ok(Some(text)) => DeviceConfig::parse(&text).unwrap_or_else(|err| {
            warn!("stored config rejected, using defaults: {err}");
            DeviceConfig::default()
        }),
        Ok(None) => {
            warn!("no `{NVS_CONFIG_KEY}` in NVS, using defaults");
            DeviceConfig::default()
        }
        Err(err) => {
            warn!("failed to read config from NVS: {err:#}");
            DeviceConfig::default()
        }
    };

    ensure_build_defaults(&mut config);
    config
}

fn read_config_text(nvs_partition: EspDefaultNvsPartition) -> anyhow::Result<Option<String>> {
    let nvs = EspNvs::new(nvs_partition, NVS_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; MAX_CONFIG_BYTES];
    Ok(nvs.get_str(NVS_CONFIG_KEY, &mut buffer)?.map(str::to_string))
}

/// Credentials baked in at build time fill in whatever NVS left at defaults.
fn ensure_build_defaults(config: &mut DeviceConfig) {
    let defaults = DeviceConfig::default();

    if config.ssid == defaults.ssid {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            config.ssid = ssid.to_string();
        }
    }
    if config.password == defaults.password {
        if let Some(pass) = option_env!("WIFI_PASS") {
            config.password = pass.to_string();
        }
    }
    if config.report_url == defaults.report_url {
        if let Some(url) = option_env!("REPORT_URL") {
            config.report_url = url.to_string();
        }
    }
}

fn bring_up_link(link: &mut StationLink, config: &DeviceConfig) {
    info!("connecting to `{}`", config.ssid);
    match connect(
        link,
        &config.ssid,
        &config.password,
        RetryPolicy::default(),
        thread::sleep,
    ) {
        Ok(()) => match link.ip() {
            Some(ip) => info!("connected, ip {ip}"),
            None => info!("connected"),
        },
        Err(err) => warn!("wifi unavailable: {err}"),
    }
}

fn detect_power_source(vbus_sense: Gpio35) -> PowerSource {
    match PinDriver::input(vbus_sense) {
        Ok(pin) if pin.is_high() => PowerSource::Usb,
        Ok(_) => PowerSource::Battery,
        Err(err) => {
            warn!("VBUS sense unavailable, assuming battery: {err:?}");
            PowerSource::Battery
        }
    }
}

fn serve(sensors: &mut SensorSuite, link: &StationLink) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", HTTP_PORT))
        .with_context(|| format!("failed to bind port {HTTP_PORT}"))?;

    match link.ip() {
        Some(ip) => info!("web server running on http://{ip}"),
        None => info!("web server running on port {HTTP_PORT}"),
    }

    loop {
        if let Err(err) = serve_one(&listener, sensors) {
            warn!("server error: {err:#}");
        }
    }
}

fn serve_one(listener: &TcpListener, sensors: &mut SensorSuite) -> anyhow::Result<()> {
    let (mut stream, _peer) = listener.accept().context("accept failed")?;
    stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT))?;

    let mut request = [0_u8; MAX_REQUEST_BYTES];
    let read = stream.read(&mut request).context("failed to read request")?;

    let route = Route::from_request(&request[..read]);
    let reading = sensors.read();
    let response = Response::for_route(route, &reading, DEFAULT_REFRESH_MS)?;

    send(&mut stream, &response.to_bytes())
}

fn send(stream: &mut TcpStream, bytes: &[u8]) -> anyhow::Result<()> {
    stream.write_all(bytes).context("failed to send response")?;
    stream.flush()?;
    Ok(())
}

fn push_loop(
    config: &DeviceConfig,
    link: &mut StationLink,
    sensors: &mut SensorSuite,
    power: PowerSource,
) -> anyhow::Result<()> {
    info!("push mode on {power:?} power");

    loop {
        if !link.is_connected() {
            bring_up_link(link, config);
        }

        let reading = sensors.read();

        if link.is_connected() {
            info!(
                "pushing: {}F | {}V",
                reading
                    .temp_f
                    .value()
                    .map_or_else(|| relay_common::PLACEHOLDER.to_string(), |t| t.to_string()),
                reading.vsys_volts.unwrap_or_default()
            );
            match post_reading(&config.report_url, &reading) {
                Ok(status) if (200..300).contains(&status) => {}
                Ok(status) => warn!("collector answered HTTP {status}"),
                Err(err) => warn!("failed to reach collector: {err:#}"),
            }
        } else {
            warn!("skipping push: no wifi connection");
        }

        match SleepPlan::for_source(power, config.sleep_mins) {
            SleepPlan::Light(interval) => {
                info!("waiting {}m (usb loop)", config.sleep_mins);
                set_radio(link, false);
                thread::sleep(interval);
                set_radio(link, true);
            }
            SleepPlan::Deep(interval) => {
                info!("deep sleeping {}m", config.sleep_mins);
                set_radio(link, false);
                thread::sleep(DEEP_SLEEP_SETTLE);
                deep_sleep(interval);
            }
        }
    }
}

fn set_radio(link: &mut StationLink, enabled: bool) {
    if let Err(err) = link.set_radio(enabled) {
        warn!("failed to switch radio {}: {err:#}", if enabled { "on" } else { "off" });
    }
}

fn post_reading(report_url: &str, reading: &Reading) -> anyhow::Result<u16> {
    let http_conf = HttpClientConfiguration {
        timeout: Some(PUSH_TIMEOUT),
        ..Default::default()
    };
    let mut client = HttpClient::wrap(EspHttpConnection::new(&http_conf)?);

    let body = serde_json::to_vec(reading)?;
    let content_length = body.len().to_string();
    let headers = [
        ("Content-Type", "application/json"),
        ("Content-Length", content_length.as_str()),
    ];

    let mut request = client
        .post(report_url, &headers)
        .map_err(|e| anyhow!("{e:?}"))?;
    request.write_all(&body).map_err(|e| anyhow!("{e:?}"))?;
    request.flush().map_err(|e| anyhow!("{e:?}"))?;

    let mut response = request.submit().map_err(|e| anyhow!("{e:?}"))?;
    let status = response.status();

    let mut discard = [0_u8; 256];
    while response.read(&mut discard).map_err(|e| anyhow!("{e:?}"))? > 0 {}

    Ok(status)
}

/// Suspends until the timer fires; the chip then boots from scratch.
fn deep_sleep(interval: Duration) {
    let micros = u64::try_from(interval.as_micros()).unwrap_or(u64::MAX);
    unsafe { esp_idf_svc::sys::esp_deep_sleep(micros) };
}

fn uptime_secs() -> u64 {
    let micros = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
    u64::try_from(micros / 1_000_000).unwrap_or_default()
}
