pub mod core;
pub mod device;
pub mod storage;
pub mod utils;

use std::sync::Arc;

use tracing::{error, info};

use crate::{
    core::{
        acquisition::{AcquisitionController, DeviceOptions},
        cancel::CancelToken,
        enrollment::{EnrollmentProtocol, PlacementPrompt},
        matching::MatchingEngine,
        settings::{AcquisitionParams, Settings},
        types::{EngineInfo, EnrollmentReceipt, Identity, MatchResult},
    },
    device::{Capture, DeviceCapability},
    storage::TemplateStore,
    utils::{
        config::Config,
        error::{EngineError, Result},
    },
};

/// Enrollment and matching over one scanner and one template store.
pub struct FingerprintEngine {
    config: Arc<Config>,
    settings: Arc<Settings>,
    store: Arc<TemplateStore>,
    acquisition: Arc<AcquisitionController>,
    enrollment: EnrollmentProtocol,
    matching: MatchingEngine,
}

impl FingerprintEngine {
    pub async fn new(config: Config, device: Arc<dyn DeviceCapability>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let settings = Arc::new(Settings::from_config(&config.matching, &config.acquisition)?);

        info!("Opening template store at {}", config.storage.path);
        let store = Arc::new(TemplateStore::open(&config.storage.path)?);

        info!("Opening fingerprint device...");
        let acquisition = Arc::new(
            AcquisitionController::open(device.clone(), settings.clone(), DeviceOptions::from(&config.device))
                .map_err(|e| {
                    error!("Failed to open fingerprint device: {}", e);
                    e
                })?,
        );

        let enrollment = EnrollmentProtocol::new(acquisition.clone(), store.clone(), settings.clone());
        let matching = MatchingEngine::new(device, store.clone(), settings.clone());

        info!(
            threshold = settings.threshold().value(),
            samples = settings.sample_count(),
            "Fingerprint engine ready"
        );

        Ok(Self {
            config,
            settings,
            store,
            acquisition,
            enrollment,
            matching,
        })
    }

    /// Loads the vendor SDK from `device.library_path` and opens the scanner.
    #[cfg(feature = "hardware")]
    pub async fn with_hardware(config: Config) -> Result<Self> {
        let device = Arc::new(device::ZkfpDevice::load(&config.device.library_path)?);
        Self::new(config, device).await
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn store(&self) -> &Arc<TemplateStore> {
        &self.store
    }

    /// Enrolls `name` with `samples` placements, or the configured default.
    pub async fn register(
        &self,
        name: &str,
        samples: Option<u32>,
        allow_overwrite: bool,
        prompt: &dyn PlacementPrompt,
        cancel: &CancelToken,
    ) -> Result<EnrollmentReceipt> {
        let samples = samples.unwrap_or_else(|| self.settings.sample_count());
        self.enrollment
            .enroll(name, samples, allow_overwrite, prompt, cancel)
            .await
    }

    /// Captures a finger and checks it against `name`. Settings are read once,
    /// before the capture starts.
    pub async fn verify(&self, name: &str, cancel: &CancelToken) -> Result<MatchResult> {
        let snapshot = self.settings.snapshot();
        if !self.store.contains(name).await? {
            return Err(EngineError::UnknownIdentity(name.to_string()));
        }
        let capture = self.acquisition.capture_with(snapshot.acquisition, cancel).await?;
        self.matching
            .verify_with(name, &capture.template, snapshot.threshold)
            .await
    }

    /// Captures a finger and searches every enrolled identity.
    pub async fn identify(&self, cancel: &CancelToken) -> Result<MatchResult> {
        let snapshot = self.settings.snapshot();
        let capture = self.acquisition.capture_with(snapshot.acquisition, cancel).await?;
        self.matching
            .identify_with(&capture.template, snapshot.threshold)
            .await
    }

    pub async fn verify_template(&self, name: &str, template: &[u8]) -> Result<MatchResult> {
        self.matching.verify(name, template).await
    }

    pub async fn identify_template(&self, template: &[u8]) -> Result<MatchResult> {
        self.matching.identify(template).await
    }

    pub async fn acquire(&self, cancel: &CancelToken) -> Result<Capture> {
        self.acquisition.capture(cancel).await
    }

    pub async fn list_identities(&self) -> Result<Vec<Identity>> {
        Ok(self.store.list_identities().await?)
    }

    pub async fn delete_identity(&self, name: &str) -> Result<Identity> {
        Ok(self.store.delete(name).await?)
    }

    pub async fn count_identities(&self) -> Result<usize> {
        Ok(self.store.count_identities().await?)
    }

    /// Takes effect for operations that start afterwards. Never waits on a
    /// running acquisition.
    pub fn set_threshold(&self, value: i64) -> Result<()> {
        let threshold = self.settings.set_threshold(value)?;
        self.acquisition.apply_threshold(threshold);
        Ok(())
    }

    /// Default number of samples for [`register`](Self::register).
    pub fn set_sample_count(&self, count: u32) -> Result<()> {
        self.settings.set_sample_count(count)
    }

    pub fn set_acquisition_parameters(&self, params: AcquisitionParams) -> Result<()> {
        self.settings.set_acquisition_parameters(params)
    }

    pub async fn info(&self) -> Result<EngineInfo> {
        let device = self.acquisition.describe()?;
        let snapshot = self.settings.snapshot();
        Ok(EngineInfo {
            device_count: device.device_count,
            image_width: device.width,
            image_height: device.height,
            image_dpi: device.dpi,
            identity_count: self.store.count_identities().await?,
            threshold: snapshot.threshold.value(),
            sample_count: snapshot.sample_count,
            store_path: self.config.storage.path.clone(),
        })
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down fingerprint engine...");
        self.acquisition.shutdown().await.map_err(|e| {
            error!("Error closing device: {}", e);
            e
        })?;
        info!("Fingerprint engine shutdown complete");
        Ok(())
    }
}
