//! Checkpoint files: pruning after each save, gated uploads, discovery.
//!
//! The trainer writes `model_<N>.pt` into `<models_dir>/<name>/`. After every
//! save the launcher may delete all other checkpoints in that directory and,
//! when `N` is a multiple of the upload interval, push the new file to blob
//! storage under `<name>/model_<N>.pt`.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use regex::Regex;
use stylegan2_config::CheckpointPolicy;

use crate::blob::{BlobError, BlobStore};

pub const MODEL_PREFIX: &str = "model_";
pub const MODEL_SUFFIX: &str = ".pt";

static MODEL_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^model_(\d+)\.pt$").expect("checkpoint pattern is valid"));

/// Whether a directory entry looks like a checkpoint the pruner may touch.
#[must_use]
pub fn is_model_file(name: &str) -> bool {
    name.starts_with(MODEL_PREFIX) && name.ends_with(MODEL_SUFFIX)
}

/// Epoch index encoded in a checkpoint file name.
#[must_use]
pub fn checkpoint_epoch(name: &str) -> Option<u64> {
    MODEL_FILE.captures(name)?.get(1)?.as_str().parse().ok()
}

/// File name of checkpoint `epoch`.
#[must_use]
pub fn checkpoint_file_name(epoch: u64) -> String {
    format!("{MODEL_PREFIX}{epoch}{MODEL_SUFFIX}")
}

/// What a save hook did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SaveReport {
    /// Files removed from the checkpoint directory.
    pub deleted: Vec<String>,
    /// Entries left alone (not a checkpoint, or the current one).
    pub skipped: Vec<String>,
    /// Blob path the checkpoint was uploaded to.
    pub uploaded: Option<String>,
}

/// Runs after the trainer writes a checkpoint.
#[derive(Clone)]
pub struct CheckpointHook {
    policy: CheckpointPolicy,
    store: Option<Arc<dyn BlobStore>>,
}

impl CheckpointHook {
    #[must_use]
    pub fn new(policy: CheckpointPolicy, store: Option<Arc<dyn BlobStore>>) -> Self {
        Self { policy, store }
    }

    /// Prune and upload after `model_path` was saved.
    pub async fn on_model_save(&self, model_path: &Path) -> Result<SaveReport, CheckpointError> {
        let mut report = if self.policy.delete_old_models {
            prune_old_models(model_path).await?
        } else {
            SaveReport::default()
        };

        if self.policy.upload_models {
            report.uploaded = self.upload(model_path).await?;
        }

        Ok(report)
    }

    async fn upload(&self, model_path: &Path) -> Result<Option<String>, CheckpointError> {
        let file_name = file_name_of(model_path)?;
        let epoch = checkpoint_epoch(&file_name)
            .ok_or_else(|| CheckpointError::MalformedName(model_path.to_path_buf()))?;

        if !self.policy.should_upload(epoch) {
            tracing::info!("Skipping upload of {file_name}");
            return Ok(None);
        }

        let store = self.store.as_ref().ok_or(CheckpointError::NoBlobStore)?;
        let model_name = model_path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dest_path = if model_name.is_empty() {
            file_name
        } else {
            format!("{model_name}/{file_name}")
        };

        tracing::info!("Uploading to {dest_path}");
        let bytes = store.upload_file(&dest_path, model_path).await?;
        tracing::debug!("Uploaded {bytes} bytes to {dest_path}");

        Ok(Some(dest_path))
    }
}

/// Delete every checkpoint next to `model_path` except `model_path` itself.
///
/// Entries that aren't `model_*.pt` are skipped. Failed deletions are logged
/// and otherwise ignored; only failing to list the directory is an error.
pub async fn prune_old_models(model_path: &Path) -> Result<SaveReport, CheckpointError> {
    let current = file_name_of(model_path)?;
    let dir = match model_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| CheckpointError::Io(dir.clone(), e))?;

    let mut report = SaveReport::default();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CheckpointError::Io(dir.clone(), e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();

        if !is_model_file(&name) {
            tracing::info!("Skipping delete of {name} (not model file)");
            report.skipped.push(name);
            continue;
        }

        if name == current {
            tracing::info!("Skipping delete of {name} (current epoch)");
            report.skipped.push(name);
            continue;
        }

        tracing::info!("Deleting {name}");
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => report.deleted.push(name),
            Err(e) => tracing::warn!("Failed to delete {name}: {e}"),
        }
    }

    report.deleted.sort();
    report.skipped.sort();
    Ok(report)
}

fn file_name_of(path: &Path) -> Result<String, CheckpointError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CheckpointError::MalformedName(path.to_path_buf()))
}

/// A checkpoint found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointFile {
    pub epoch: u64,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// All checkpoints in a run directory, oldest first.
pub fn list_checkpoints(dir: impl AsRef<Path>) -> Result<Vec<CheckpointFile>, CheckpointError> {
    let dir = dir.as_ref();
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| CheckpointError::Io(dir.to_path_buf(), e))? {
        let entry = entry.map_err(|e| CheckpointError::Io(dir.to_path_buf(), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(epoch) = checkpoint_epoch(&name) else {
            continue;
        };
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        found.push(CheckpointFile {
            epoch,
            path: entry.path(),
            size_bytes,
        });
    }
    found.sort_by_key(|c| c.epoch);
    Ok(found)
}

/// Find the latest checkpoint epoch in a run directory.
#[must_use]
pub fn find_latest_checkpoint(dir: impl AsRef<Path>) -> Option<u64> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(std::result::Result::ok)
        .filter_map(|e| checkpoint_epoch(&e.file_name().to_string_lossy()))
        .max()
}

/// Errors that can occur while handling a saved checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint file name does not match model_<N>.pt: {0}")]
    MalformedName(PathBuf),
    #[error("checkpoint I/O error on {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("upload failed: {0}")]
    Upload(#[from] BlobError),
    #[error("upload_models is set but no blob store is configured")]
    NoBlobStore,
}
