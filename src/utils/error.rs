// src/utils/error.rs
use std::fmt;
use thiserror::Error;

use crate::device::DeviceError;
use crate::storage::StorageError;

/// Why an acquisition gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionFailure {
    NoDevice,
    ImageCaptureFailed,
    TemplateExtractionFailed,
    Timeout,
    Cancelled,
}

impl fmt::Display for AcquisitionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AcquisitionFailure::NoDevice => "no device connected",
            AcquisitionFailure::ImageCaptureFailed => "image capture failed",
            AcquisitionFailure::TemplateExtractionFailed => "template extraction failed",
            AcquisitionFailure::Timeout => "timed out waiting for a finger",
            AcquisitionFailure::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Acquisition failed: {reason}")]
    AcquisitionFailed { reason: AcquisitionFailure },

    #[error("Inconsistent samples: sample {sample} scored {score} against the first (threshold {threshold})")]
    InconsistentSamples { sample: u32, score: u32, threshold: u8 },

    #[error("Identity already exists: {0}")]
    DuplicateIdentity(String),

    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid threshold {0}: must be within 0..=100")]
    InvalidThreshold(i64),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn acquisition(reason: AcquisitionFailure) -> Self {
        EngineError::AcquisitionFailed { reason }
    }

    /// Raw vendor code behind a device failure, for diagnostics only.
    pub fn vendor_code(&self) -> Option<i32> {
        match self {
            EngineError::Device(e) => e.vendor_code(),
            _ => None,
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::DuplicateIdentity(name) => EngineError::DuplicateIdentity(name),
            StorageError::NotFound(name) => EngineError::NotFound(name),
            StorageError::EmptyTemplate(sequence) => EngineError::InvalidParameter(format!(
                "template {} is empty",
                sequence
            )),
            StorageError::NoTemplates(name) => {
                EngineError::InvalidParameter(format!("no templates supplied for {}", name))
            }
            other => EngineError::Storage(other),
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(error: config::ConfigError) -> Self {
        EngineError::Config(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
