use config::{Config, ConfigError};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub source: SourceConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    pub s3: S3Settings,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_granularity")]
    pub granularity: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_raw_data_dir")]
    pub raw_data_dir: String,
    #[serde(default = "default_warehouse_dir")]
    pub warehouse_dir: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3Settings {
    pub endpoint: Option<String>,
    #[serde(default = "default_s3_region")]
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            raw_data_dir: default_raw_data_dir(),
            warehouse_dir: default_warehouse_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://storage.dosm.gov.my".to_string()
}

fn default_granularity() -> String {
    "2d".to_string()
}

fn default_raw_data_dir() -> String {
    "data/raw".to_string()
}

fn default_warehouse_dir() -> String {
    "data/warehouse".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_s3_region() -> String {
    "ap-southeast-1".to_string()
}

fn default_retries() -> u32 {
    2
}

fn default_retry_delay_secs() -> u64 {
    300
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("APP"));

        // Build the configuration
        let config = builder.build()?;

        // Try to deserialize the entire configuration
        let settings: Settings = config.try_deserialize()?;

        debug!(
            base_url = %settings.source.base_url,
            granularity = %settings.source.granularity,
            warehouse_dir = %settings.paths.warehouse_dir,
            "Parsed pipeline settings"
        );

        Ok(settings)
    }
}
