// src/core/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type IdentityId = u64;
pub type TemplateId = u64;

/// A registered subject. Created by enrollment, removed by deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    /// Earlier enrollment first; ids break timestamp ties.
    pub fn enrolled_before(&self, other: &Identity) -> bool {
        (self.created_at, self.id) < (other.created_at, other.id)
    }
}

/// One stored finger placement. Bytes are never rewritten in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTemplate {
    pub id: TemplateId,
    pub identity_id: IdentityId,
    pub sequence: u32,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrolledIdentity {
    pub identity: Identity,
    pub templates: Vec<StoredTemplate>,
}

/// Outcome of a verification or identification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub matched: bool,
    /// Highest score observed, on the SDK's scale.
    pub score: u32,
    /// Threshold the decision was made against.
    pub threshold: u8,
    /// Matched identity (identification), or the claimed one on a verify hit.
    pub identity: Option<Identity>,
}

impl MatchResult {
    pub fn no_match(score: u32, threshold: u8) -> Self {
        Self {
            matched: false,
            score,
            threshold,
            identity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentReceipt {
    pub identity: Identity,
    pub samples: u32,
    /// Lowest consistency score seen against the first sample.
    pub min_consistency_score: Option<u32>,
}

/// Snapshot of device and store state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    pub device_count: u32,
    pub image_width: i32,
    pub image_height: i32,
    pub image_dpi: Option<i32>,
    pub identity_count: usize,
    pub threshold: u8,
    pub sample_count: u32,
    pub store_path: String,
}
