use std::{
    net::SocketAddr,
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, error, info, warn};
use url::Url;

use relay_common::{
    connect,
    http::{parse_status_code, post_request, MAX_REQUEST_BYTES},
    reading::vsys_volts,
    DeviceConfig, DeviceMode, PowerSource, Reading, Response, RetryPolicy, Route, SleepPlan,
    WifiLink, DEFAULT_REFRESH_MS,
};

const PUSH_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);
const SERVER_RESET_DELAY: Duration = Duration::from_secs(10);
const DEEP_SLEEP_SETTLE: Duration = Duration::from_secs(1);

/// Why a boot cycle ended and the device starts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Restart {
    WokeFromDeepSleep,
    ResetWithoutWifi,
}

/// Result of one push-mode report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushOutcome {
    Delivered(u16),
    Rejected(u16),
    Unreachable,
    Offline,
}

/// Stands in for the station interface on a development machine.
struct SimulatedLink {
    radio: bool,
    associated: bool,
    reachable: bool,
}

impl SimulatedLink {
    fn from_env() -> Self {
        let reachable = !matches!(
            std::env::var("RELAY_SIM_LINK").as_deref(),
            Ok("down") | Ok("DOWN")
        );
        Self {
            radio: true,
            associated: false,
            reachable,
        }
    }
}

impl WifiLink for SimulatedLink {
    type Error = &'static str;

    fn associate(&mut self, _ssid: &str, _password: &str) -> Result<(), Self::Error> {
        if !self.radio {
            return Err("radio disabled");
        }
        self.associated = self.reachable;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.radio && self.associated
    }

    fn set_radio(&mut self, enabled: bool) -> Result<(), Self::Error> {
        self.radio = enabled;
        if !enabled {
            self.associated = false;
        }
        Ok(())
    }
}

/// Cycles through plausible values so the collector has something to show.
struct SimulatedSensor {
    tick: u64,
    faulty: bool,
    booted: Instant,
}

impl SimulatedSensor {
    fn new(booted: Instant) -> Self {
        Self {
            tick: 0,
            faulty: matches!(std::env::var("RELAY_SIM_SENSOR_FAULT").as_deref(), Ok("1")),
            booted,
        }
    }

    fn read(&mut self, pin: i32) -> Reading {
        self.tick = self.tick.wrapping_add(1);
        let raw_vsys = 29_000 + (self.tick % 5) as u16 * 150;
        let volts = vsys_volts(raw_vsys);

        if self.faulty {
            warn!("simulated DHT11 on GPIO{pin} did not respond");
            return Reading::fault("[Errno 110] ETIMEDOUT", volts);
        }

        let temp_c = 20.0 + (self.tick % 8) as f64 * 0.2;
        let humidity = 42.0 + (self.tick % 6) as f64 * 0.5;
        Reading::measured(temp_c, humidity, volts, self.booted.elapsed().as_secs())
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    loop {
        let restart = boot().await?;
        info!("restarting from boot ({restart:?})");
    }
}

async fn boot() -> anyhow::Result<Restart> {
    let booted = Instant::now();
    let config = load_config();
    info!(
        "config loaded: mode={}, ssid=`{}`, pin={}, report_url=`{}`, sleep={}m",
        config.mode, config.ssid, config.sensor_pin, config.report_url, config.sleep_mins
    );

    let mut link = SimulatedLink::from_env();
    let mut sensor = SimulatedSensor::new(booted);
    bring_up_link(&mut link, &config, RetryPolicy::default());

    match config.mode {
        DeviceMode::Server => {
            if !link.is_connected() {
                error!(
                    "server mode requires wifi; resetting in {}s",
                    SERVER_RESET_DELAY.as_secs()
                );
                tokio::time::sleep(SERVER_RESET_DELAY).await;
                return Ok(Restart::ResetWithoutWifi);
            }
            serve(&config, &mut sensor).await
        }
        DeviceMode::Push => push_loop(&config, &mut link, &mut sensor, power_source()).await,
    }
}

fn load_config() -> DeviceConfig {
    let path = std::env::var("RELAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".env"));

    DeviceConfig::load(&path).unwrap_or_else(|err| {
        warn!("using default config ({}): {err}", path.display());
        DeviceConfig::default()
    })
}

fn power_source() -> PowerSource {
    match std::env::var("RELAY_POWER").as_deref() {
        Ok(value) if value.eq_ignore_ascii_case("battery") => PowerSource::Battery,
        _ => PowerSource::Usb,
    }
}

fn bring_up_link(link: &mut SimulatedLink, config: &DeviceConfig, retry: RetryPolicy) {
    info!("connecting to `{}`", config.ssid);
    let result = tokio::task::block_in_place(|| {
        connect(link, &config.ssid, &config.password, retry, std::thread::sleep)
    });

    match result {
        Ok(()) => info!("wifi connected"),
        Err(err) => warn!("wifi unavailable: {err}"),
    }
}

async fn serve(config: &DeviceConfig, sensor: &mut SimulatedSensor) -> anyhow::Result<Restart> {
    let port = std::env::var("DEVICE_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind device server at {addr}"))?;

    info!("device web server running on http://{addr}");

    loop {
        if let Err(err) = serve_one(&listener, config, sensor, REQUEST_READ_TIMEOUT).await {
            warn!("server error: {err:#}");
        }
    }
}

async fn serve_one(
    listener: &TcpListener,
    config: &DeviceConfig,
    sensor: &mut SimulatedSensor,
    read_timeout: Duration,
) -> anyhow::Result<()> {
    let (mut stream, peer) = listener.accept().await.context("accept failed")?;

    let mut request = [0_u8; MAX_REQUEST_BYTES];
    let read = tokio::time::timeout(read_timeout, stream.read(&mut request))
        .await
        .context("client sent nothing")?
        .context("failed to read request")?;

    let route = Route::from_request(&request[..read]);
    let reading = sensor.read(config.sensor_pin);
    let response = Response::for_route(route, &reading, DEFAULT_REFRESH_MS)?;

    stream
        .write_all(&response.to_bytes())
        .await
        .context("failed to send response")?;
    let _ = stream.shutdown().await;

    debug!("served {route:?} to {peer}");
    Ok(())
}

async fn push_loop(
    config: &DeviceConfig,
    link: &mut SimulatedLink,
    sensor: &mut SimulatedSensor,
    power: PowerSource,
) -> anyhow::Result<Restart> {
    info!("push mode on {power:?} power");

    loop {
        match push_once(config, link, sensor, RetryPolicy::default()).await {
            PushOutcome::Delivered(status) => debug!("collector accepted reading (HTTP {status})"),
            PushOutcome::Rejected(status) => warn!("collector answered HTTP {status}"),
            PushOutcome::Unreachable | PushOutcome::Offline => {}
        }

        match SleepPlan::for_source(power, config.sleep_mins) {
            SleepPlan::Light(interval) => {
                info!("waiting {}m (usb loop)", config.sleep_mins);
                set_radio(link, false);
                tokio::time::sleep(interval).await;
                set_radio(link, true);
            }
            SleepPlan::Deep(interval) => {
                info!("deep sleeping {}m", config.sleep_mins);
                set_radio(link, false);
                tokio::time::sleep(DEEP_SLEEP_SETTLE).await;
                tokio::time::sleep(interval).await;
                return Ok(Restart::WokeFromDeepSleep);
            }
        }
    }
}

/// Reconnects if the link dropped, takes a reading and reports it.
async fn push_once(
    config: &DeviceConfig,
    link: &mut SimulatedLink,
    sensor: &mut SimulatedSensor,
    retry: RetryPolicy,
) -> PushOutcome {
    if !link.is_connected() {
        bring_up_link(link, config, retry);
    }

    let reading = sensor.read(config.sensor_pin);

    if !link.is_connected() {
        warn!("skipping push: no wifi connection");
        return PushOutcome::Offline;
    }

    info!(
        "pushing: {}F | {}V",
        display_metric(reading.temp_f.value()),
        display_metric(reading.vsys_volts)
    );
    match post_reading(&config.report_url, &reading).await {
        Ok(status) if (200..300).contains(&status) => PushOutcome::Delivered(status),
        Ok(status) => PushOutcome::Rejected(status),
        Err(err) => {
            warn!("failed to reach collector: {err:#}");
            PushOutcome::Unreachable
        }
    }
}

fn set_radio(link: &mut SimulatedLink, enabled: bool) {
    if let Err(err) = link.set_radio(enabled) {
        warn!("failed to switch radio {}: {err}", if enabled { "on" } else { "off" });
    }
}

/// Sends one reading and returns the collector's status code. The response
/// body is read to completion and dropped.
async fn post_reading(report_url: &str, reading: &Reading) -> anyhow::Result<u16> {
    let url =
        Url::parse(report_url).with_context(|| format!("invalid REPORT_URL `{report_url}`"))?;
    if url.scheme() != "http" {
        bail!("unsupported REPORT_URL scheme `{}`", url.scheme());
    }

    let host = url.host_str().context("REPORT_URL has no host")?;
    let port = url.port_or_known_default().unwrap_or(80);
    let host_header = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let target = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    };

    let body = serde_json::to_vec(reading)?;
    let request = post_request(&host_header, &target, &body);

    let exchange = async {
        let mut stream = TcpStream::connect((host, port)).await?;
        stream.write_all(&request).await?;
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        Ok::<_, std::io::Error>(response)
    };

    let response = tokio::time::timeout(PUSH_TIMEOUT, exchange)
        .await
        .with_context(|| format!("no answer from {host}:{port} within {PUSH_TIMEOUT:?}"))?
        .with_context(|| format!("request to {host}:{port} failed"))?;

    Ok(parse_status_code(&response)?)
}

fn display_metric(value: Option<f64>) -> String {
    value.map_or_else(|| relay_common::PLACEHOLDER.to_string(), |value| value.to_string())
}
