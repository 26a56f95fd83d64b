//! Per-install persisted study state.
//!
//! Holds what must survive restarts for the lifetime of one install: the
//! client id, the committed variation, how far the install got, and whether
//! the study already ended for it.
//! The file store writes through a temp file and rename so a crash never
//! leaves a half-written record behind.

use std::fmt::Debug;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use shield_types::{ClientId, EmptyNameError, EndingReason, VariationName};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedStudy {
    #[serde(default)]
    pub client_id: Option<ClientId>,
    #[serde(default)]
    pub variation: Option<VariationName>,
    /// First-seen was reported for this install.
    #[serde(default)]
    pub first_seen_at: Option<DateTime<Utc>>,
    /// Eligibility passed and the install completed.
    #[serde(default)]
    pub installed_at: Option<DateTime<Utc>>,
    /// Reason the study ended for this install. Cleared with the rest of the
    /// record once the install is released.
    #[serde(default)]
    pub ended: Option<EndingReason>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("study state io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("study state at {} is corrupt: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("study state could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    InvalidClientId(#[from] EmptyNameError),
}

pub trait StudyStore: Debug + Send + Sync {
    fn load(&self) -> Result<PersistedStudy, StoreError>;
    fn save(&self, study: &PersistedStudy) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// Return the persisted client id, generating and saving a fresh one if absent.
pub fn ensure_client_id(store: &dyn StudyStore) -> Result<ClientId, StoreError> {
    let mut study = store.load()?;
    if let Some(id) = &study.client_id {
        return Ok(id.clone());
    }
    let id = ClientId::new(uuid::Uuid::new_v4().to_string())?;
    study.client_id = Some(id.clone());
    store.save(&study)?;
    tracing::info!(client_id = %id, "Generated client id");
    Ok(id)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    study: Mutex<PersistedStudy>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_study(study: PersistedStudy) -> Self {
        Self {
            study: Mutex::new(study),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> PersistedStudy {
        self.study
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StudyStore for MemoryStore {
    fn load(&self) -> Result<PersistedStudy, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, study: &PersistedStudy) -> Result<(), StoreError> {
        *self.study.lock().unwrap_or_else(PoisonError::into_inner) = study.clone();
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.study.lock().unwrap_or_else(PoisonError::into_inner) = PersistedStudy::default();
        Ok(())
    }
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StudyStore for FileStore {
    fn load(&self) -> Result<PersistedStudy, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PersistedStudy::default()),
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_str(&content).map_err(|source| StoreError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, study: &PersistedStudy) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(study)?;
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| self.io_error(e))?;
        tmp.write_all(&bytes).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.io_error(e.error))?;
        tracing::debug!(path = %self.path.display(), "Saved study state");
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}
