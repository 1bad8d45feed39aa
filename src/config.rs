use std::path::Path;

use config::{ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::utils::ScanError;

/// Prefix of environment overrides, e.g. `IDSCAN_KAFKA__BROKERS=a:9092,b:9092`.
pub const ENV_PREFIX: &str = "IDSCAN";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub consumer: ConsumerConfig,
    pub producer: ProducerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    pub group_id: String,
    pub topic: String,
    #[serde(default = "default_offset_reset")]
    pub auto_offset_reset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    pub topic: String,
    /// Failed records are forwarded here when set
    #[serde(default)]
    pub dead_letter_topic: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    #[serde(default)]
    pub tesseract_data_path: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Upper bound on concurrent OCR sessions
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_offset_reset() -> String {
    "earliest".to_string()
}

fn default_language() -> String {
    "eng".to_string()
}

fn default_temp_dir() -> String {
    "/tmp/ocr-images".to_string()
}

fn default_service_name() -> String {
    "id-ocr-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_workers() -> usize {
    5
}

impl Default for OcrConfig {
    fn default() -> Self {
        OcrConfig {
            tesseract_data_path: None,
            language: default_language(),
            temp_dir: default_temp_dir(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            name: default_service_name(),
            log_level: default_log_level(),
            workers: default_workers(),
        }
    }
}

fn env_overrides() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("kafka.brokers")
        .try_parsing(true)
}

impl Config {
    /// Load a YAML file, then apply `IDSCAN_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let settings = config::Config::builder()
            .add_source(File::from(path.as_ref()).required(true))
            .add_source(env_overrides())
            .build()?;
        Self::from_settings(settings)
    }

    /// Parse configuration from YAML text without consulting the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, ScanError> {
        let settings = config::Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> Result<Self, ScanError> {
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        let invalid = |msg: &str| Err(ScanError::Config(ConfigError::Message(msg.to_string())));

        if self.kafka.brokers.iter().all(|b| b.trim().is_empty()) {
            return invalid("kafka.brokers must list at least one broker");
        }
        if self.kafka.consumer.group_id.trim().is_empty() {
            return invalid("kafka.consumer.group_id is empty");
        }
        if self.kafka.consumer.topic.trim().is_empty() {
            return invalid("kafka.consumer.topic is empty");
        }
        if self.kafka.producer.topic.trim().is_empty() {
            return invalid("kafka.producer.topic is empty");
        }
        if self.service.workers == 0 {
            return invalid("service.workers must be at least 1");
        }
        Ok(())
    }
}
