// tests/common/mod.rs
#![allow(dead_code)]

use std::sync::Arc;

use fingerprint_auth::{
    device::SimulatedDevice,
    utils::config::Config,
    FingerprintEngine,
};
use tempfile::TempDir;

pub struct TestContext {
    pub engine: FingerprintEngine,
    pub device: Arc<SimulatedDevice>,
    pub dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_device(SimulatedDevice::new()).await
    }

    pub async fn with_device(device: SimulatedDevice) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let device = Arc::new(device);
        let engine = FingerprintEngine::new(test_config(&dir), device.clone())
            .await
            .expect("Failed to open engine");

        Self { engine, device, dir }
    }

    /// Queues `count` captures of `finger` and returns their templates.
    pub fn push_samples(&self, finger: u16, count: u16) -> Vec<Vec<u8>> {
        (1..=count)
            .map(|sample| {
                let template = SimulatedDevice::template(finger, sample, 512 + sample as usize * 100);
                self.device.push_capture(template.clone());
                template
            })
            .collect()
    }
}

/// Defaults with an isolated store and no real-time waits.
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::defaults_only().expect("Failed to build default config");
    config.storage.path = dir
        .path()
        .join("fingerprints.db")
        .to_string_lossy()
        .into_owned();
    config.acquisition.max_attempts = 3;
    config.acquisition.settle_time_ms = 0;
    config.acquisition.inter_attempt_delay_ms = 0;
    config.acquisition.max_finger_polls = 5;
    config
}
