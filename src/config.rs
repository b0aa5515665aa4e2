use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use serde::Deserialize;

use crate::stats::Metric;

/// Largest accepted `stats.utc_offset`, in minutes.
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// Top-level configuration for the sensorhub collector.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// HTTP front end configuration.
    #[serde(default)]
    pub http: HttpConfig,

    /// Event distributor configuration.
    #[serde(default)]
    pub bus: BusConfig,

    /// Rolling statistics configuration.
    #[serde(default)]
    pub stats: StatsConfig,

    /// Raw float datagram listener.
    #[serde(default)]
    pub udp: UdpConfig,

    /// Serial console reader.
    #[serde(default)]
    pub serial: SerialConfig,

    /// Radio-relay frames carried over MQTT.
    #[serde(default)]
    pub mqtt: MqttConfig,
}

/// HTTP front end configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Listen address; ":port" binds all interfaces. Default: ":8001".
    #[serde(default = "default_http_addr")]
    pub addr: String,
}

/// Event distributor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Records buffered per subscriber before drops. Default: 1.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

/// Rolling statistics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    /// Metrics to aggregate. Default: temperature, pressure, voltage.
    #[serde(default = "default_metrics")]
    pub metrics: Vec<Metric>,

    /// Maximum age of a day bucket. Default: 7d.
    #[serde(default = "default_retention", with = "humantime_serde")]
    pub retention: Duration,

    /// How often expired buckets are evicted. Default: 24h.
    #[serde(default = "default_eviction_interval", with = "humantime_serde")]
    pub eviction_interval: Duration,

    /// Reference zone for day boundaries and bands, minutes east of UTC.
    /// Default: 0.
    #[serde(default)]
    pub utc_offset: i32,
}

/// Raw float datagram listener.
#[derive(Debug, Clone, Deserialize)]
pub struct UdpConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Listen address. Default: ":12345".
    #[serde(default = "default_udp_addr")]
    pub addr: String,
}

/// Serial console reader.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Device path. Default: "/dev/ttyACM0".
    #[serde(default = "default_serial_port")]
    pub port: String,

    /// Default: 115200.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Log tag that marks reading lines. Default: "qf8mzr".
    #[serde(default = "default_serial_tag")]
    pub tag: String,
}

/// Radio-relay frames carried over MQTT.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Broker URL, "tcp://host:port". Default: "tcp://raspberrypi.local:1883".
    #[serde(default = "default_mqtt_broker")]
    pub broker: String,

    /// Default: "sensorhub".
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,

    /// Topic carrying raw frames. Required when enabled.
    #[serde(default)]
    pub topic: String,

    /// Default: 2s.
    #[serde(default = "default_mqtt_keep_alive", with = "humantime_serde")]
    pub keep_alive: Duration,

    /// Pause before polling again after a connection error. Default: 1s.
    #[serde(default = "default_mqtt_reconnect_delay", with = "humantime_serde")]
    pub reconnect_delay: Duration,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_http_addr() -> String {
    ":8001".to_string()
}

fn default_inbox_capacity() -> usize {
    crate::bus::DEFAULT_INBOX_CAPACITY
}

fn default_metrics() -> Vec<Metric> {
    Metric::DEFAULT_TRACKED.to_vec()
}

fn default_retention() -> Duration {
    Duration::from_secs(7 * 24 * 3600)
}

fn default_eviction_interval() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_udp_addr() -> String {
    ":12345".to_string()
}

fn default_serial_port() -> String {
    "/dev/ttyACM0".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_serial_tag() -> String {
    "qf8mzr".to_string()
}

fn default_mqtt_broker() -> String {
    "tcp://raspberrypi.local:1883".to_string()
}

fn default_mqtt_client_id() -> String {
    "sensorhub".to_string()
}

fn default_mqtt_keep_alive() -> Duration {
    Duration::from_secs(2)
}

fn default_mqtt_reconnect_delay() -> Duration {
    Duration::from_secs(1)
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            http: HttpConfig::default(),
            bus: BusConfig::default(),
            stats: StatsConfig::default(),
            udp: UdpConfig::default(),
            serial: SerialConfig::default(),
            mqtt: MqttConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: default_http_addr(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            metrics: default_metrics(),
            retention: default_retention(),
            eviction_interval: default_eviction_interval(),
            utc_offset: 0,
        }
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_udp_addr(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            tag: default_serial_tag(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: default_mqtt_broker(),
            client_id: default_mqtt_client_id(),
            topic: String::new(),
            keep_alive: default_mqtt_keep_alive(),
            reconnect_delay: default_mqtt_reconnect_delay(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.http.addr.is_empty() {
            bail!("http.addr is required");
        }

        if self.bus.inbox_capacity == 0 {
            bail!("bus.inbox_capacity must be positive");
        }

        if self.stats.retention.is_zero() {
            bail!("stats.retention must be positive");
        }

        if self.stats.eviction_interval.is_zero() {
            bail!("stats.eviction_interval must be positive");
        }

        if self.stats.metrics.is_empty() {
            bail!("stats.metrics must not be empty");
        }

        let mut seen = HashSet::new();
        for metric in &self.stats.metrics {
            if !seen.insert(metric) {
                bail!("stats.metrics lists {metric} more than once");
            }
        }

        if self.stats.utc_offset.abs() > MAX_UTC_OFFSET_MINUTES {
            bail!(
                "stats.utc_offset {} is outside +/-{} minutes",
                self.stats.utc_offset,
                MAX_UTC_OFFSET_MINUTES,
            );
        }

        if self.udp.enabled && self.udp.addr.is_empty() {
            bail!("udp.addr is required when udp is enabled");
        }

        if self.serial.enabled {
            if self.serial.port.is_empty() {
                bail!("serial.port is required when serial is enabled");
            }
            if self.serial.tag.is_empty() {
                bail!("serial.tag is required when serial is enabled");
            }
            if self.serial.baud_rate == 0 {
                bail!("serial.baud_rate must be positive");
            }
        }

        if self.mqtt.enabled {
            if self.mqtt.broker.is_empty() {
                bail!("mqtt.broker is required when mqtt is enabled");
            }
            if self.mqtt.topic.is_empty() {
                bail!("mqtt.topic is required when mqtt is enabled");
            }
            if self.mqtt.client_id.is_empty() {
                bail!("mqtt.client_id is required when mqtt is enabled");
            }
            if !self.mqtt.keep_alive.is_zero() && self.mqtt.keep_alive < Duration::from_secs(1) {
                bail!("mqtt.keep_alive must be zero or at least 1s");
            }
        }

        Ok(())
    }
}

impl StatsConfig {
    /// Reference zone as a chrono offset.
    pub fn timezone(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset * 60)
            .with_context(|| format!("stats.utc_offset {} is out of range", self.utc_offset))
    }
}

/// Expand the ":port" shorthand to bind all interfaces.
pub fn bind_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}
