//! Blank and sample sets handed from acquisition to analysis.

use crate::data::storage::load_set;
use crate::error::{AppResult, PlqyError};
use crate::measurement::MeasurementSet;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Repository key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Reference without the luminescent sample.
    Blank,
    /// The luminescent sample.
    Sample,
}

impl Slot {
    /// Lowercase name used in logs and file names.
    pub fn name(self) -> &'static str {
        match self {
            Slot::Blank => "blank",
            Slot::Sample => "sample",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set together with the artifact it was saved to or loaded from.
#[derive(Debug, Clone)]
pub struct StoredSet {
    /// The set, shared with analyses that hold it.
    pub set: Arc<MeasurementSet>,
    /// Artifact path; `None` for sets never written.
    pub path: Option<PathBuf>,
}

impl StoredSet {
    /// File stem of the artifact, or the slot name for in-memory sets.
    pub fn display_name(&self, slot: Slot) -> String {
        self.path
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| slot.name().to_string())
    }
}

/// Latest set per slot.
#[derive(Debug, Default)]
pub struct MeasurementRepository {
    slots: HashMap<Slot, StoredSet>,
}

impl MeasurementRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `set`, replacing whatever the slot held.
    pub fn put(&mut self, slot: Slot, set: MeasurementSet, path: Option<PathBuf>) -> &StoredSet {
        let stored = StoredSet {
            set: Arc::new(set),
            path,
        };
        self.slots.insert(slot, stored);
        &self.slots[&slot]
    }

    /// Load an artifact into `slot`.
    pub fn load_file(&mut self, slot: Slot, path: &Path) -> AppResult<&StoredSet> {
        let set = load_set(path)?;
        info!(%slot, path = %path.display(), "measurement set loaded");
        Ok(self.put(slot, set, Some(path.to_path_buf())))
    }

    /// Set in `slot`, if any.
    pub fn get(&self, slot: Slot) -> Option<&StoredSet> {
        self.slots.get(&slot)
    }

    /// Like [`get`](Self::get) but missing sets are an error.
    pub fn require(&self, slot: Slot) -> AppResult<&StoredSet> {
        self.get(slot).ok_or(match slot {
            Slot::Blank => PlqyError::MissingPrerequisite("blank measurement set"),
            Slot::Sample => PlqyError::MissingPrerequisite("sample measurement set"),
        })
    }

    /// Drop the set in `slot`.
    pub fn clear(&mut self, slot: Slot) {
        self.slots.remove(&slot);
    }
}
