use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_loki_url")]
    pub loki_url: String,

    /// Root data directory; offset stores are namespaced per monitor kind
    /// underneath it.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// How many times a failed flush is retried before its batch is dropped.
    #[serde(default = "default_flush_retry_limit")]
    pub flush_retry_limit: u32,

    #[serde(default)]
    pub monitors: Vec<MonitorConfig>,
}

fn default_loki_url() -> String {
    crate::sink::loki::DEFAULT_LOKI_URL.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_flush_retry_limit() -> u32 {
    crate::monitor::DEFAULT_FLUSH_RETRY_LIMIT
}

/// One source descriptor. The tag is the monitor kind; an unrecognized kind
/// fails deserialization, which is a fatal configuration error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MonitorConfig {
    #[serde(rename = "FileMonitor")]
    File(FileMonitorConfig),
    #[serde(rename = "DockerAPIMonitor")]
    DockerApi(DockerMonitorConfig),
}

impl MonitorConfig {
    pub fn app_name(&self) -> &str {
        match self {
            MonitorConfig::File(c) => &c.app_name,
            MonitorConfig::DockerApi(c) => &c.app_name,
        }
    }

    pub fn service_name(&self) -> &str {
        match self {
            MonitorConfig::File(c) => &c.service_name,
            MonitorConfig::DockerApi(c) => &c.service_name,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        match self {
            MonitorConfig::File(c) => c.poll_interval,
            MonitorConfig::DockerApi(c) => c.poll_interval,
        }
    }

    pub fn extractor(&self) -> Option<&ExtractorConfig> {
        match self {
            MonitorConfig::File(c) => c.extractor.as_ref(),
            MonitorConfig::DockerApi(c) => c.extractor.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMonitorConfig {
    pub app_name: String,
    pub service_name: String,
    pub folder: PathBuf,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    pub extractor: Option<ExtractorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerMonitorConfig {
    pub app_name: String,
    pub service_name: String,
    pub container_name: String,
    pub proxy_host: String,
    pub proxy_port: u16,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    pub extractor: Option<ExtractorConfig>,
}

fn default_poll_interval() -> Duration {
    crate::monitor::DEFAULT_POLL_INTERVAL
}

/// Per-monitor override of the regex extractor patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub timestamp_regex: Option<String>,
    pub log_level_regex: Option<String>,
}
