// src/storage/template_store.rs
//! Persistent identities and their enrolled templates.
//!
//! Column families:
//! - `identities`: name -> identity record
//! - `templates`: identity id ++ sequence -> template record
//! - `meta`: id counters
//!
//! Every multi-row change is one `WriteBatch`, so readers see either all of
//! an enrollment or none of it. Deleting an identity removes its templates in
//! the same batch. Reads share the lock; writes hold it exclusively.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::errors::{Result, StorageError};
use super::records::{
    decode_counter, encode_counter, template_key, template_prefix, IdentityRecord, TemplateRecord,
};
use crate::core::types::{EnrolledIdentity, Identity, IdentityId, StoredTemplate};

const IDENTITIES: &str = "identities";
const TEMPLATES: &str = "templates";
const META: &str = "meta";

const NEXT_IDENTITY_ID: &[u8] = b"next_identity_id";
const NEXT_TEMPLATE_ID: &[u8] = b"next_template_id";

pub struct TemplateStore {
    db: RwLock<DB>,
    path: PathBuf,
}

fn column<'a>(db: &'a DB, name: &'static str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| StorageError::Database(format!("missing column family '{}'", name)))
}

impl TemplateStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_keep_log_file_num(10);

        let families = [IDENTITIES, TEMPLATES, META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, families)?;
        info!("Template store opened at {}", path.display());

        Ok(Self {
            db: RwLock::new(db),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates `name` with one template per entry of `templates`, in order.
    ///
    /// With `allow_overwrite`, an existing identity of the same name and all
    /// of its templates are replaced in the same batch.
    pub async fn put(
        &self,
        name: &str,
        templates: &[Vec<u8>],
        allow_overwrite: bool,
    ) -> Result<Identity> {
        if templates.is_empty() {
            return Err(StorageError::NoTemplates(name.to_string()));
        }
        if let Some(sequence) = templates.iter().position(|t| t.is_empty()) {
            return Err(StorageError::EmptyTemplate(sequence as u32));
        }

        let db = self.db.write().await;
        let identities = column(&db, IDENTITIES)?;
        let template_cf = column(&db, TEMPLATES)?;
        let meta = column(&db, META)?;

        let mut batch = WriteBatch::default();

        if let Some(existing) = db.get_cf(identities, name.as_bytes())? {
            if !allow_overwrite {
                return Err(StorageError::DuplicateIdentity(name.to_string()));
            }
            let previous = IdentityRecord::decode(&existing)?;
            let removed = Self::stage_template_removal(&db, &mut batch, previous.id)?;
            info!(identity = %name, previous_id = previous.id, removed, "Overwriting identity");
        }

        let identity_id = Self::counter(&db, meta, NEXT_IDENTITY_ID)?;
        let first_template_id = Self::counter(&db, meta, NEXT_TEMPLATE_ID)?;
        let created_at = Utc::now();

        let identity = Identity {
            id: identity_id,
            name: name.to_string(),
            created_at,
        };
        batch.put_cf(identities, name.as_bytes(), IdentityRecord::encode(&identity)?);

        for (sequence, data) in templates.iter().enumerate() {
            let template = StoredTemplate {
                id: first_template_id + sequence as u64,
                identity_id,
                sequence: sequence as u32,
                data: data.clone(),
                created_at,
            };
            batch.put_cf(
                template_cf,
                template_key(identity_id, template.sequence),
                TemplateRecord::encode(&template)?,
            );
        }

        batch.put_cf(meta, NEXT_IDENTITY_ID, encode_counter(identity_id + 1));
        batch.put_cf(
            meta,
            NEXT_TEMPLATE_ID,
            encode_counter(first_template_id + templates.len() as u64),
        );

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        db.write_opt(batch, &write_opts)?;

        info!(identity = %name, id = identity_id, templates = templates.len(), "Identity stored");
        Ok(identity)
    }

    /// Templates of `name`, ordered by capture sequence.
    pub async fn get(&self, name: &str) -> Result<Vec<StoredTemplate>> {
        Ok(self.get_enrolled(name).await?.templates)
    }

    pub async fn get_enrolled(&self, name: &str) -> Result<EnrolledIdentity> {
        let db = self.db.read().await;
        let identity = Self::lookup(&db, name)?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        let templates = Self::templates_of(&db, identity.id)?;
        Ok(EnrolledIdentity {
            identity,
            templates,
        })
    }

    pub async fn contains(&self, name: &str) -> Result<bool> {
        let db = self.db.read().await;
        Ok(Self::lookup(&db, name)?.is_some())
    }

    /// All identities, earliest enrollment first.
    pub async fn list_identities(&self) -> Result<Vec<Identity>> {
        let db = self.db.read().await;
        Self::all_identities(&db)
    }

    pub async fn count_identities(&self) -> Result<usize> {
        let db = self.db.read().await;
        let identities = column(&db, IDENTITIES)?;
        let mut count = 0;
        for item in db.iterator_cf(identities, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Every identity with its templates, under one read lock.
    pub async fn load_all(&self) -> Result<Vec<EnrolledIdentity>> {
        let db = self.db.read().await;
        let identities = Self::all_identities(&db)?;

        let mut grouped: HashMap<IdentityId, Vec<StoredTemplate>> = HashMap::new();
        for item in db.iterator_cf(column(&db, TEMPLATES)?, IteratorMode::Start) {
            let (_, value) = item?;
            let template = TemplateRecord::decode(&value)?;
            grouped.entry(template.identity_id).or_default().push(template);
        }

        let enrolled: Vec<EnrolledIdentity> = identities
            .into_iter()
            .map(|identity| {
                let templates = grouped.remove(&identity.id).unwrap_or_default();
                EnrolledIdentity {
                    identity,
                    templates,
                }
            })
            .collect();

        if !grouped.is_empty() {
            warn!(orphans = grouped.len(), "Templates without an owning identity");
        }
        Ok(enrolled)
    }

    /// Removes `name` and all of its templates.
    pub async fn delete(&self, name: &str) -> Result<Identity> {
        let db = self.db.write().await;
        let identity = Self::lookup(&db, name)?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(column(&db, IDENTITIES)?, name.as_bytes());
        let removed = Self::stage_template_removal(&db, &mut batch, identity.id)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        db.write_opt(batch, &write_opts)?;

        info!(identity = %name, id = identity.id, templates = removed, "Identity deleted");
        Ok(identity)
    }

    fn lookup(db: &DB, name: &str) -> Result<Option<Identity>> {
        match db.get_cf(column(db, IDENTITIES)?, name.as_bytes())? {
            Some(bytes) => Ok(Some(IdentityRecord::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn all_identities(db: &DB) -> Result<Vec<Identity>> {
        let mut identities = Vec::new();
        for item in db.iterator_cf(column(db, IDENTITIES)?, IteratorMode::Start) {
            let (_, value) = item?;
            identities.push(IdentityRecord::decode(&value)?);
        }
        identities.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(identities)
    }

    fn templates_of(db: &DB, identity_id: IdentityId) -> Result<Vec<StoredTemplate>> {
        let prefix = template_prefix(identity_id);
        let mut templates = Vec::new();
        let iter = db.iterator_cf(
            column(db, TEMPLATES)?,
            IteratorMode::From(&prefix, Direction::Forward),
        );
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            templates.push(TemplateRecord::decode(&value)?);
        }
        debug!(identity_id, count = templates.len(), "Loaded templates");
        Ok(templates)
    }

    fn stage_template_removal(
        db: &DB,
        batch: &mut WriteBatch,
        identity_id: IdentityId,
    ) -> Result<usize> {
        let template_cf = column(db, TEMPLATES)?;
        let prefix = template_prefix(identity_id);
        let mut removed = 0;
        for item in db.iterator_cf(template_cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            batch.delete_cf(template_cf, key);
            removed += 1;
        }
        Ok(removed)
    }

    fn counter(db: &DB, meta: &ColumnFamily, key: &[u8]) -> Result<u64> {
        match db.get_cf(meta, key)? {
            Some(bytes) => decode_counter(&bytes),
            None => Ok(1),
        }
    }
}
