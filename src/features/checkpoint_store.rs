//! Durable, merge-written run state.
//!
//! The checkpoint is a single JSON object (see [`Checkpoint`]). Writers never
//! replace it wholesale: every save reads the stored object, merges the patch
//! into it, and writes the result to a sibling temp file that is then renamed
//! over the original. A missing file means "no prior state".
//!
//! Concurrent runs against the same file are not supported; the binary holds
//! an exclusive lock next to the checkpoint for the lifetime of a job.

use crate::core::error::CheckpointError;
use crate::core::types::{Checkpoint, CheckpointPatch};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the stored checkpoint. `Ok(None)` when nothing was saved yet.
    pub fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        if content.trim().is_empty() {
            warn!(
                "checkpoint: {} is empty, treating as no prior state",
                self.path.display()
            );
            return Ok(None);
        }
        let cp: Checkpoint =
            serde_json::from_str(&content).map_err(|source| CheckpointError::Json {
                path: self.path.display().to_string(),
                source,
            })?;
        debug!(
            "checkpoint: loaded {} processed keys, {} successes from {}",
            cp.processed_item_keys.len(),
            cp.success_count,
            self.path.display()
        );
        Ok(Some(cp))
    }

    /// Merge `patch` into the stored checkpoint and persist the result.
    /// Returns the merged state.
    pub fn save(&self, patch: &CheckpointPatch) -> Result<Checkpoint, CheckpointError> {
        let mut current = self.load()?.unwrap_or_default();
        merge(&mut current, patch);
        current.updated_at = Some(chrono::Utc::now());
        self.write_atomic(&current)?;
        debug!(
            "checkpoint: saved page {} / {} successes / {} keys",
            current.current_page,
            current.success_count,
            current.processed_item_keys.len()
        );
        Ok(current)
    }

    /// Delete the stored checkpoint. Absence is not an error.
    pub fn reset(&self) -> Result<(), CheckpointError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("checkpoint: 🗑️  removed {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn write_atomic(&self, cp: &Checkpoint) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let json = serde_json::to_string_pretty(cp).map_err(|source| CheckpointError::Json {
            path: self.path.display().to_string(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))
    }

    fn io_err(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

/// Key-merge `patch` into `into`.
pub fn merge(into: &mut Checkpoint, patch: &CheckpointPatch) {
    into.processed_item_keys
        .extend(patch.processed_item_keys.iter().cloned());
    if let Some(n) = patch.success_count {
        into.success_count = into.success_count.max(n);
    }
    for failure in &patch.failed_items {
        if !into.failed_items.contains(failure) {
            into.failed_items.push(failure.clone());
        }
    }
    if let Some(page) = patch.current_page {
        into.current_page = page;
    }
    if let Some(v) = &patch.output_location {
        into.output_location = v.clone();
    }
    if let Some(v) = &patch.source_list_url {
        into.source_list_url = v.clone();
    }
    if let Some(v) = &patch.item_label {
        into.item_label = v.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FailureRecord;

    #[test]
    fn merge_unions_keys_and_keeps_max_count() {
        let mut cp = Checkpoint::default();
        cp.processed_item_keys.insert("A".into());
        cp.success_count = 4;

        merge(
            &mut cp,
            &CheckpointPatch {
                processed_item_keys: vec!["B".into(), "A".into()],
                success_count: Some(2),
                current_page: Some(3),
                ..Default::default()
            },
        );

        assert_eq!(cp.processed_item_keys.len(), 2);
        assert_eq!(cp.success_count, 4);
        assert_eq!(cp.current_page, 3);
    }

    #[test]
    fn merge_appends_failures_once() {
        let mut cp = Checkpoint::default();
        let f = FailureRecord::new("X", "No action control found", 1);
        let patch = CheckpointPatch {
            failed_items: vec![f.clone()],
            ..Default::default()
        };
        merge(&mut cp, &patch);
        merge(&mut cp, &patch);
        assert_eq!(cp.failed_items, vec![f]);
    }

    #[test]
    fn scalar_fields_only_overwrite_when_set() {
        let mut cp = Checkpoint::new("https://a.example/list", "/out", "files");
        merge(
            &mut cp,
            &CheckpointPatch {
                current_page: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(cp.source_list_url, "https://a.example/list");
        assert_eq!(cp.output_location, "/out");
        assert_eq!(cp.current_page, 2);
    }
}
