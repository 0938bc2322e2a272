// src/core/matching.rs
//! 1:1 verification and 1:N identification.

use std::sync::Arc;

use tracing::{debug, info};

use crate::core::settings::{Settings, Threshold};
use crate::core::types::{EnrolledIdentity, Identity, MatchResult, StoredTemplate};
use crate::device::{DeviceCapability, DeviceResult};
use crate::storage::{StorageError, TemplateStore};
use crate::utils::error::{EngineError, Result};

pub struct MatchingEngine {
    device: Arc<dyn DeviceCapability>,
    store: Arc<TemplateStore>,
    settings: Arc<Settings>,
}

impl MatchingEngine {
    pub fn new(
        device: Arc<dyn DeviceCapability>,
        store: Arc<TemplateStore>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            device,
            store,
            settings,
        }
    }

    /// Matches if any enrolled sample of `name` scores at or above the threshold.
    pub async fn verify(&self, name: &str, template: &[u8]) -> Result<MatchResult> {
        self.verify_with(name, template, self.settings.threshold()).await
    }

    /// [`verify`](Self::verify) against a threshold read by the caller.
    pub async fn verify_with(&self, name: &str, template: &[u8], threshold: Threshold) -> Result<MatchResult> {
        ensure_probe(template)?;

        let enrolled = match self.store.get_enrolled(name).await {
            Ok(enrolled) => enrolled,
            Err(StorageError::NotFound(_)) => return Err(EngineError::UnknownIdentity(name.to_string())),
            Err(e) => return Err(e.into()),
        };
        if enrolled.templates.is_empty() {
            return Err(EngineError::UnknownIdentity(name.to_string()));
        }

        let best = best_score(self.device.as_ref(), template, &enrolled.templates)?;
        let matched = threshold.accepts(best);
        info!(
            identity = %name,
            score = best,
            threshold = threshold.value(),
            matched,
            "Verification finished"
        );

        Ok(MatchResult {
            matched,
            score: best,
            threshold: threshold.value(),
            identity: matched.then_some(enrolled.identity),
        })
    }

    /// Finds the enrolled identity with the highest best-sample score.
    pub async fn identify(&self, template: &[u8]) -> Result<MatchResult> {
        self.identify_with(template, self.settings.threshold()).await
    }

    pub async fn identify_with(&self, template: &[u8], threshold: Threshold) -> Result<MatchResult> {
        ensure_probe(template)?;

        let enrolled = self.store.load_all().await?;
        let result = rank(self.device.as_ref(), template, &enrolled, threshold)?;

        match &result.identity {
            Some(identity) => info!(
                identity = %identity.name,
                score = result.score,
                threshold = threshold.value(),
                "Identification matched"
            ),
            None => info!(
                candidates = enrolled.len(),
                best_score = result.score,
                threshold = threshold.value(),
                "No identity matched"
            ),
        }
        Ok(result)
    }
}

fn ensure_probe(template: &[u8]) -> Result<()> {
    if template.is_empty() {
        return Err(EngineError::InvalidParameter("probe template is empty".into()));
    }
    Ok(())
}

fn best_score(device: &dyn DeviceCapability, probe: &[u8], templates: &[StoredTemplate]) -> DeviceResult<u32> {
    let mut best = 0;
    for stored in templates {
        let score = device.match_templates(probe, &stored.data)?;
        debug!(template = stored.id, sequence = stored.sequence, score, "Compared template");
        best = best.max(score);
    }
    Ok(best)
}

/// Picks the winner among identities whose best score clears `threshold`.
/// Equal scores go to the earlier enrollment.
pub fn rank(
    device: &dyn DeviceCapability,
    probe: &[u8],
    enrolled: &[EnrolledIdentity],
    threshold: Threshold,
) -> DeviceResult<MatchResult> {
    let mut highest = 0;
    let mut winner: Option<(&Identity, u32)> = None;

    for candidate in enrolled.iter().filter(|c| !c.templates.is_empty()) {
        let score = best_score(device, probe, &candidate.templates)?;
        highest = highest.max(score);
        if !threshold.accepts(score) {
            continue;
        }

        let better = match winner {
            None => true,
            Some((current, current_score)) => {
                score > current_score
                    || (score == current_score && candidate.identity.enrolled_before(current))
            }
        };
        if better {
            winner = Some((&candidate.identity, score));
        }
    }

    Ok(match winner {
        Some((identity, score)) => MatchResult {
            matched: true,
            score,
            threshold: threshold.value(),
            identity: Some(identity.clone()),
        },
        None => MatchResult::no_match(highest, threshold.value()),
    })
}
