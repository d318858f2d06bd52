use crate::config::parse::load_config;
use crate::config::types::{ExtractorConfig, MonitorConfig};
use crate::extract::{
    Extractor, RegexExtractor, DEFAULT_LEVEL_REGEX, DEFAULT_TIMESTAMP_REGEX,
};
use crate::monitor::{Monitor, MonitorSupervisor};
use crate::offset::OffsetStore;
use crate::sink::{LogSink, LokiClient};
use crate::source::{DockerStreamReader, FileReader, SourceReader};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("offset store error: {0}")]
    Store(#[from] crate::offset::StoreError),

    #[error("extractor error: {0}")]
    Extractor(#[from] crate::extract::ExtractorError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/lokitail/config.yml");
            eprintln!("  /etc/lokitail/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'lokitail config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_monitors(&config_path).await.map_err(|e| e.into())
}

async fn run_monitors(config_path: &PathBuf) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    if config.monitors.is_empty() {
        warn!("No monitors configured");
        return Ok(());
    }

    info!(data_dir = %config.data_dir.display(), "Initializing offset stores");
    let file_store = Arc::new(OffsetStore::open(&config.data_dir.join("file"))?);
    let docker_store = Arc::new(OffsetStore::open(&config.data_dir.join("docker"))?);

    let sink: Arc<dyn LogSink> = Arc::new(LokiClient::new(config.loki_url.clone())?);

    let mut supervisor = MonitorSupervisor::new();
    for monitor_config in &config.monitors {
        let extractor = build_extractor(monitor_config.extractor())?;

        let (reader, store): (Box<dyn SourceReader>, Arc<OffsetStore>) = match monitor_config {
            MonitorConfig::File(c) => {
                info!(app = %c.app_name, folder = %c.folder.display(), "Creating file monitor");
                let reader = FileReader::new(
                    &c.app_name,
                    c.folder.clone(),
                    Arc::clone(&file_store),
                    c.poll_interval,
                );
                (Box::new(reader), Arc::clone(&file_store))
            }
            MonitorConfig::DockerApi(c) => {
                info!(app = %c.app_name, container = %c.container_name, "Creating docker monitor");
                let reader = DockerStreamReader::new(
                    &c.app_name,
                    c.container_name.clone(),
                    &c.proxy_host,
                    c.proxy_port,
                    Arc::clone(&docker_store),
                );
                (Box::new(reader), Arc::clone(&docker_store))
            }
        };

        let monitor = Monitor::new(
            monitor_config.app_name().to_string(),
            monitor_config.service_name().to_string(),
            monitor_config.poll_interval(),
            reader,
            extractor,
            store,
            Arc::clone(&sink),
        )
        .with_flush_retry_limit(config.flush_retry_limit);

        supervisor.add(monitor);
    }

    supervisor.start_all();
    info!("Monitors started, press Ctrl+C to shut down");

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    supervisor.stop_all();
    supervisor.await_all(config.shutdown_timeout).await;
    info!("Shutdown complete");

    Ok(())
}

fn build_extractor(config: Option<&ExtractorConfig>) -> Result<Arc<dyn Extractor>, RunError> {
    let extractor = match config {
        Some(config) => RegexExtractor::new(
            config
                .timestamp_regex
                .as_deref()
                .unwrap_or(DEFAULT_TIMESTAMP_REGEX),
            config
                .log_level_regex
                .as_deref()
                .unwrap_or(DEFAULT_LEVEL_REGEX),
        )?,
        None => RegexExtractor::default(),
    };
    Ok(Arc::new(extractor))
}
