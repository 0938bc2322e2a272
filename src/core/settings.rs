// src/core/settings.rs
//! Process-wide matching and acquisition parameters.
//!
//! Operations take a [`SettingsSnapshot`] once at entry and use it for their
//! whole run, so a concurrent `set_threshold` only affects later calls.

use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use crate::utils::config::{AcquisitionConfig, MatchingConfig};
use crate::utils::error::{EngineError, Result};

pub const MAX_THRESHOLD: u8 = 100;
pub const MAX_SAMPLE_COUNT: u32 = 10;
/// Upper bound for every acquisition wait and for the capture budget.
pub const MAX_ACQUISITION_WAIT: Duration = Duration::from_secs(3600);

/// Match score cutoff within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Threshold(u8);

impl Threshold {
    pub fn new(value: i64) -> Result<Self> {
        if (0..=i64::from(MAX_THRESHOLD)).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(EngineError::InvalidThreshold(value))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Scores equal to the threshold count as a match.
    pub fn accepts(self, score: u32) -> bool {
        score >= u32::from(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionParams {
    /// Failed captures tolerated before giving up.
    pub max_attempts: u32,
    /// Wait before polling an empty sensor again.
    pub settle_time: Duration,
    /// Wait after a failed capture.
    pub inter_attempt_delay: Duration,
    /// Empty-sensor polls tolerated before timing out.
    pub max_finger_polls: u32,
    /// Wall-clock budget for one acquisition.
    pub capture_timeout: Duration,
}

impl AcquisitionParams {
    /// Builds parameters from signed millisecond values, rejecting negatives.
    pub fn from_millis(
        max_attempts: u32,
        settle_time_ms: i64,
        inter_attempt_delay_ms: i64,
        max_finger_polls: u32,
        capture_timeout_ms: i64,
    ) -> Result<Self> {
        let millis = |name: &str, value: i64| -> Result<Duration> {
            u64::try_from(value)
                .map(Duration::from_millis)
                .map_err(|_| EngineError::InvalidParameter(format!("{} must not be negative", name)))
        };

        let params = Self {
            max_attempts,
            settle_time: millis("settle_time", settle_time_ms)?,
            inter_attempt_delay: millis("inter_attempt_delay", inter_attempt_delay_ms)?,
            max_finger_polls,
            capture_timeout: millis("capture_timeout", capture_timeout_ms)?,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(EngineError::InvalidParameter("max_attempts must be at least 1".into()));
        }
        if self.max_finger_polls == 0 {
            return Err(EngineError::InvalidParameter(
                "max_finger_polls must be at least 1".into(),
            ));
        }
        if self.capture_timeout.is_zero() {
            return Err(EngineError::InvalidParameter(
                "capture_timeout must be greater than 0".into(),
            ));
        }
        for (name, value) in [
            ("settle_time", self.settle_time),
            ("inter_attempt_delay", self.inter_attempt_delay),
            ("capture_timeout", self.capture_timeout),
        ] {
            if value > MAX_ACQUISITION_WAIT {
                return Err(EngineError::InvalidParameter(format!(
                    "{} must not exceed {}s",
                    name,
                    MAX_ACQUISITION_WAIT.as_secs()
                )));
            }
        }
        Ok(())
    }
}

impl From<&AcquisitionConfig> for AcquisitionParams {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            settle_time: Duration::from_millis(config.settle_time_ms),
            inter_attempt_delay: Duration::from_millis(config.inter_attempt_delay_ms),
            max_finger_polls: config.max_finger_polls,
            capture_timeout: Duration::from_millis(config.capture_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsSnapshot {
    pub threshold: Threshold,
    pub sample_count: u32,
    pub acquisition: AcquisitionParams,
}

#[derive(Debug)]
struct SettingsInner {
    threshold: Threshold,
    sample_count: u32,
    acquisition: AcquisitionParams,
}

#[derive(Debug)]
pub struct Settings {
    inner: RwLock<SettingsInner>,
}

impl Settings {
    pub fn new(threshold: Threshold, sample_count: u32, acquisition: AcquisitionParams) -> Result<Self> {
        validate_sample_count(sample_count)?;
        acquisition.validate()?;
        Ok(Self {
            inner: RwLock::new(SettingsInner {
                threshold,
                sample_count,
                acquisition,
            }),
        })
    }

    pub fn from_config(matching: &MatchingConfig, acquisition: &AcquisitionConfig) -> Result<Self> {
        Self::new(
            Threshold::new(i64::from(matching.threshold))?,
            matching.sample_count,
            AcquisitionParams::from(acquisition),
        )
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        let inner = self.inner.read();
        SettingsSnapshot {
            threshold: inner.threshold,
            sample_count: inner.sample_count,
            acquisition: inner.acquisition,
        }
    }

    pub fn threshold(&self) -> Threshold {
        self.inner.read().threshold
    }

    pub fn acquisition(&self) -> AcquisitionParams {
        self.inner.read().acquisition
    }

    pub fn sample_count(&self) -> u32 {
        self.inner.read().sample_count
    }

    /// Replaces the threshold. Out-of-range values leave the current one in place.
    pub fn set_threshold(&self, value: i64) -> Result<Threshold> {
        let threshold = Threshold::new(value)?;
        let previous = std::mem::replace(&mut self.inner.write().threshold, threshold);
        info!(previous = previous.value(), current = threshold.value(), "Match threshold updated");
        Ok(threshold)
    }

    pub fn set_acquisition_parameters(&self, params: AcquisitionParams) -> Result<()> {
        params.validate()?;
        self.inner.write().acquisition = params;
        info!(
            max_attempts = params.max_attempts,
            settle_ms = params.settle_time.as_millis() as u64,
            delay_ms = params.inter_attempt_delay.as_millis() as u64,
            "Acquisition parameters updated"
        );
        Ok(())
    }

    pub fn set_sample_count(&self, sample_count: u32) -> Result<()> {
        validate_sample_count(sample_count)?;
        self.inner.write().sample_count = sample_count;
        Ok(())
    }
}

pub fn validate_sample_count(sample_count: u32) -> Result<()> {
    if sample_count == 0 || sample_count > MAX_SAMPLE_COUNT {
        return Err(EngineError::InvalidParameter(format!(
            "sample count {} outside 1..={}",
            sample_count, MAX_SAMPLE_COUNT
        )));
    }
    Ok(())
}
