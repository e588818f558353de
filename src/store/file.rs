// src/store/file.rs

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::fs::FileSystem;
use crate::store::{InstanceRecord, InstanceStore};

/// Relative path (from the store root) to the instances document.
pub const STORE_FILE_PATH: &str = ".agentvisor/instances.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    instances: Vec<InstanceRecord>,
}

/// Stores rows as one JSON document, rewritten on every change.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous document intact.
///
/// Every save is a blocking rewrite plus `sync_all`, issued from the async
/// `run` path on the caller's worker thread. This suits the small documents
/// one host's instances produce; a store for many thousands of rows should
/// be a database behind [`InstanceStore`] instead.
#[derive(Debug)]
pub struct FileInstanceStore {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    /// Serialises read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl FileInstanceStore {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        store_file_path(&self.root)
    }

    fn load_document(&self) -> Result<StoreDocument> {
        let path = self.path();
        if !self.fs.exists(&path) {
            return Ok(StoreDocument::default());
        }
        let text = self.fs.read_to_string(&path)?;
        if text.trim().is_empty() {
            return Ok(StoreDocument::default());
        }
        serde_json::from_str(&text).with_context(|| format!("parsing instance store at {:?}", path))
    }

    fn save_document(&self, doc: &StoreDocument) -> Result<()> {
        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(doc).context("serialising instance store")?;
        self.fs.write(&tmp, &bytes)?;
        self.fs.rename(&tmp, &path)?;
        Ok(())
    }
}

fn store_file_path(root: &Path) -> PathBuf {
    root.join(STORE_FILE_PATH)
}

impl InstanceStore for FileInstanceStore {
    fn load_all(&self) -> Result<Vec<InstanceRecord>> {
        Ok(self.load_document()?.instances)
    }

    fn save(&self, record: &InstanceRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut doc = self.load_document()?;

        match doc
            .instances
            .iter_mut()
            .find(|r| r.user_id == record.user_id && r.unit_type == record.unit_type)
        {
            Some(existing) => *existing = record.clone(),
            None => doc.instances.push(record.clone()),
        }
        doc.instances
            .sort_by(|a, b| (&a.user_id, &a.unit_type).cmp(&(&b.user_id, &b.unit_type)));

        self.save_document(&doc)?;
        debug!(instance = %record.instance_id, status = %record.status, "stored instance (file)");
        Ok(())
    }

    fn remove(&self, user_id: &str, unit_type: &str) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut doc = self.load_document()?;
        let before = doc.instances.len();
        doc.instances
            .retain(|r| !(r.user_id == user_id && r.unit_type == unit_type));

        if doc.instances.len() < before {
            self.save_document(&doc)?;
            info!(user = %user_id, unit = %unit_type, "removed instance row (file)");
        }
        Ok(())
    }
}
