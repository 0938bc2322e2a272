// src/storage/records.rs
//! On-disk encoding of identity and template rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use super::errors::{Result, StorageError};
use crate::core::types::{Identity, IdentityId, StoredTemplate, TemplateId};

pub(crate) fn template_key(identity_id: IdentityId, sequence: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&identity_id.to_be_bytes());
    key[8..].copy_from_slice(&sequence.to_be_bytes());
    key
}

pub(crate) fn template_prefix(identity_id: IdentityId) -> [u8; 8] {
    identity_id.to_be_bytes()
}

pub(crate) fn encode_counter(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

pub(crate) fn decode_counter(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Corruption(format!("counter has {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IdentityRecord {
    pub id: IdentityId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl IdentityRecord {
    pub fn encode(identity: &Identity) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&IdentityRecord {
            id: identity.id,
            name: identity.name.clone(),
            created_at: identity.created_at,
        })?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Identity> {
        let record: IdentityRecord = serde_json::from_slice(bytes)?;
        Ok(Identity {
            id: record.id,
            name: record.name,
            created_at: record.created_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TemplateRecord {
    pub id: TemplateId,
    pub identity_id: IdentityId,
    pub sequence: u32,
    pub created_at: DateTime<Utc>,
    pub length: usize,
    pub digest: String,
    pub data: String,
}

fn digest(data: &[u8]) -> String {
    hex::encode(Sha3_256::digest(data))
}

impl TemplateRecord {
    pub fn encode(template: &StoredTemplate) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&TemplateRecord {
            id: template.id,
            identity_id: template.identity_id,
            sequence: template.sequence,
            created_at: template.created_at,
            length: template.data.len(),
            digest: digest(&template.data),
            data: hex::encode(&template.data),
        })?)
    }

    /// Decodes and checks length and digest against the stored bytes.
    pub fn decode(bytes: &[u8]) -> Result<StoredTemplate> {
        let record: TemplateRecord = serde_json::from_slice(bytes)?;
        let data = hex::decode(&record.data).map_err(|e| {
            StorageError::Corruption(format!("template {} payload: {}", record.id, e))
        })?;

        if data.len() != record.length {
            return Err(StorageError::Corruption(format!(
                "template {} has {} bytes, expected {}",
                record.id,
                data.len(),
                record.length
            )));
        }
        if digest(&data) != record.digest {
            return Err(StorageError::Corruption(format!(
                "template {} digest mismatch",
                record.id
            )));
        }

        Ok(StoredTemplate {
            id: record.id,
            identity_id: record.identity_id,
            sequence: record.sequence,
            data,
            created_at: record.created_at,
        })
    }
}
