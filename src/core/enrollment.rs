// src/core/enrollment.rs
//! Multi-sample enrollment.
//!
//! Samples are collected one placement at a time and each is scored against
//! the first as soon as it is captured. Nothing reaches the store until every
//! sample has been captured and accepted; the commit is a single batch.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::acquisition::AcquisitionController;
use crate::core::cancel::CancelToken;
use crate::core::settings::{validate_sample_count, AcquisitionParams, Settings, Threshold};
use crate::core::types::EnrollmentReceipt;
use crate::device::DeviceCapability;
use crate::storage::TemplateStore;
use crate::utils::error::{AcquisitionFailure, EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Ready,
    Abort,
}

/// Asks the person enrolling to place their finger.
#[async_trait]
pub trait PlacementPrompt: Send + Sync {
    async fn request_placement(&self, name: &str, sample: u32, total: u32) -> Placement;
}

/// Never waits; for unattended capture.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoPlacement;

#[async_trait]
impl PlacementPrompt for AutoPlacement {
    async fn request_placement(&self, _name: &str, _sample: u32, _total: u32) -> Placement {
        Placement::Ready
    }
}

/// In-memory state of one enrollment. Dropped on commit or abandonment.
#[derive(Debug)]
pub struct EnrollmentSession {
    id: Uuid,
    name: String,
    sample_count: u32,
    threshold: Threshold,
    samples: Vec<Vec<u8>>,
    min_consistency_score: Option<u32>,
}

impl EnrollmentSession {
    pub fn new(name: &str, sample_count: u32, threshold: Threshold) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            sample_count,
            threshold,
            samples: Vec::with_capacity(sample_count as usize),
            min_consistency_score: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn samples(&self) -> &[Vec<u8>] {
        &self.samples
    }

    pub fn is_complete(&self) -> bool {
        self.samples.len() as u32 >= self.sample_count
    }

    /// Adds a sample after scoring it against the first one.
    pub fn accept(&mut self, template: Vec<u8>, device: &dyn DeviceCapability) -> Result<()> {
        let sample = self.samples.len() as u32 + 1;

        if let Some(first) = self.samples.first() {
            let score = device.match_templates(first, &template)?;
            debug!(session = %self.id, sample, score, "Consistency score against first sample");

            if !self.threshold.accepts(score) {
                return Err(EngineError::InconsistentSamples {
                    sample,
                    score,
                    threshold: self.threshold.value(),
                });
            }
            self.min_consistency_score = Some(self.min_consistency_score.map_or(score, |m| m.min(score)));
        }

        self.samples.push(template);
        Ok(())
    }
}

pub struct EnrollmentProtocol {
    acquisition: Arc<AcquisitionController>,
    store: Arc<TemplateStore>,
    settings: Arc<Settings>,
}

impl EnrollmentProtocol {
    pub fn new(
        acquisition: Arc<AcquisitionController>,
        store: Arc<TemplateStore>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            acquisition,
            store,
            settings,
        }
    }

    pub async fn enroll(
        &self,
        name: &str,
        sample_count: u32,
        allow_overwrite: bool,
        prompt: &dyn PlacementPrompt,
        cancel: &CancelToken,
    ) -> Result<EnrollmentReceipt> {
        let snapshot = self.settings.snapshot();

        if name.trim().is_empty() {
            return Err(EngineError::InvalidParameter("identity name must not be empty".into()));
        }
        validate_sample_count(sample_count)?;

        if !allow_overwrite && self.store.contains(name).await? {
            return Err(EngineError::DuplicateIdentity(name.to_string()));
        }

        let mut session = EnrollmentSession::new(name, sample_count, snapshot.threshold);
        info!(
            session = %session.id(),
            identity = %name,
            samples = sample_count,
            threshold = snapshot.threshold.value(),
            "Enrollment started"
        );

        if let Err(e) = self.collect(&mut session, snapshot.acquisition, prompt, cancel).await {
            warn!(session = %session.id(), identity = %name, "Enrollment abandoned: {}", e);
            return Err(e);
        }

        let identity = self
            .store
            .put(name, session.samples(), allow_overwrite)
            .await
            .map_err(|e| {
                warn!(session = %session.id(), identity = %name, "Enrollment commit failed: {}", e);
                EngineError::from(e)
            })?;

        info!(session = %session.id(), identity = %name, id = identity.id, "Enrollment committed");
        Ok(EnrollmentReceipt {
            identity,
            samples: session.samples().len() as u32,
            min_consistency_score: session.min_consistency_score,
        })
    }

    async fn collect(
        &self,
        session: &mut EnrollmentSession,
        params: AcquisitionParams,
        prompt: &dyn PlacementPrompt,
        cancel: &CancelToken,
    ) -> Result<()> {
        while !session.is_complete() {
            let sample = session.samples().len() as u32 + 1;
            if cancel.is_cancelled() {
                return Err(EngineError::acquisition(AcquisitionFailure::Cancelled));
            }

            let placement = tokio::select! {
                placement = prompt.request_placement(&session.name, sample, session.sample_count) => placement,
                _ = cancel.cancelled() => Placement::Abort,
            };
            if placement == Placement::Abort {
                return Err(EngineError::acquisition(AcquisitionFailure::Cancelled));
            }

            let capture = self.acquisition.capture_with(params, cancel).await?;
            session.accept(capture.template, self.acquisition.device().as_ref())?;
            debug!(session = %session.id(), sample, total = session.sample_count, "Sample accepted");
        }
        Ok(())
    }
}
