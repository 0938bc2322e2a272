// src/utils/config.rs
use std::path::Path;

use config::{Config as ConfigLib, Environment, File};
use serde::Deserialize;

use crate::core::settings::MAX_SAMPLE_COUNT;
use crate::device::TemplateFormat;
use crate::utils::error::{EngineError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub matching: MatchingConfig,
    pub acquisition: AcquisitionConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub library_path: String,
    pub index: u32,
    pub template_format: TemplateFormat,
    pub led_feedback: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    pub threshold: u8,
    pub sample_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcquisitionConfig {
    pub max_attempts: u32,
    pub settle_time_ms: u64,
    pub inter_attempt_delay_ms: u64,
    pub max_finger_polls: u32,
    pub capture_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<String>,
    pub file_prefix: String,
}

impl Config {
    /// Defaults, then `config/default` and `config/local` if present, then
    /// `FPAUTH__SECTION__KEY` environment variables.
    pub fn new() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::build(
            Self::defaults()?
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config/local").required(false)),
        )
    }

    /// Defaults, then the given file, then environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .to_str()
            .ok_or_else(|| EngineError::Config(format!("non UTF-8 path: {}", path.display())))?;
        Self::build(Self::defaults()?.add_source(File::with_name(name)))
    }

    /// Built-in defaults only, ignoring files and environment.
    pub fn defaults_only() -> Result<Self> {
        let config: Self = Self::defaults()?.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn defaults() -> Result<config::builder::ConfigBuilder<config::builder::DefaultState>> {
        Ok(ConfigLib::builder()
            .set_default("device.library_path", "libzkfp.so")?
            .set_default("device.index", 0)?
            .set_default("device.template_format", "ansi378")?
            .set_default("device.led_feedback", false)?
            .set_default("matching.threshold", 60)?
            .set_default("matching.sample_count", 3)?
            .set_default("acquisition.max_attempts", 10)?
            .set_default("acquisition.settle_time_ms", 2000)?
            .set_default("acquisition.inter_attempt_delay_ms", 500)?
            .set_default("acquisition.max_finger_polls", 20)?
            .set_default("acquisition.capture_timeout_ms", 30_000)?
            .set_default("storage.path", "fingerprints.db")?
            .set_default("logging.level", "info")?
            .set_default("logging.file_prefix", "fingerprint-auth.log")?)
    }

    fn build(builder: config::builder::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: Self = builder
            .add_source(Environment::with_prefix("FPAUTH").prefix_separator("__").separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.matching.threshold > 100 {
            return Err(EngineError::Config(format!(
                "threshold {} outside 0..=100",
                self.matching.threshold
            )));
        }
        if self.matching.sample_count == 0 || self.matching.sample_count > MAX_SAMPLE_COUNT {
            return Err(EngineError::Config(format!(
                "sample_count must be within 1..={}",
                MAX_SAMPLE_COUNT
            )));
        }
        if self.acquisition.max_attempts == 0 {
            return Err(EngineError::Config("max_attempts must be greater than 0".into()));
        }
        if self.acquisition.max_finger_polls == 0 {
            return Err(EngineError::Config("max_finger_polls must be greater than 0".into()));
        }
        if self.acquisition.capture_timeout_ms == 0 {
            return Err(EngineError::Config("capture_timeout_ms must be greater than 0".into()));
        }
        if self.storage.path.trim().is_empty() {
            return Err(EngineError::Config("storage.path must be set".into()));
        }
        Ok(())
    }
}
