//! Document snapshot persistence.
//!
//! Snapshots are written atomically:
//! 1. Serialize to a temp file next to the target with a PID suffix
//! 2. Sync the temp file to disk
//! 3. Optionally keep a `.bak` copy of the previous snapshot
//! 4. Rename the temp file over the target

use crate::document::{DocumentSnapshot, MemoryDocument};
use crate::error::{LabelerError, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process;
use tracing::{debug, info, warn};

/// Load a snapshot, or `None` if the file does not exist.
pub fn read_snapshot(path: &Path) -> Result<Option<DocumentSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).map_err(|e| LabelerError::Io {
        message: format!("Failed to read {}", path.display()),
        path: Some(path.to_path_buf()),
        source: Some(e),
    })?;

    let snapshot = serde_json::from_str(&contents).map_err(|e| LabelerError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(snapshot))
}

/// Load a document from `path`, or create an empty one named after the file.
pub fn load_document(path: &Path) -> Result<MemoryDocument> {
    match read_snapshot(path)? {
        Some(snapshot) => {
            info!("Loaded document '{}' from {}", snapshot.name, path.display());
            MemoryDocument::from_snapshot(snapshot)
        }
        None => {
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Untitled".to_string());
            info!("No snapshot at {}, starting empty document '{}'", path.display(), name);
            Ok(MemoryDocument::new(name))
        }
    }
}

/// Write a snapshot atomically.
pub fn write_snapshot(path: &Path, snapshot: &DocumentSnapshot, keep_backup: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| LabelerError::Io {
                message: format!("Failed to create directory {}", parent.display()),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }
    }

    let temp_path = path.with_extension(format!("json.{}.tmp", process::id()));
    let serialized = serde_json::to_string_pretty(snapshot).map_err(|e| LabelerError::Json {
        message: format!("Failed to serialize snapshot: {}", e),
        source: Some(e),
    })?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| LabelerError::io_with_path(e, &temp_path))?;

        file.write_all(serialized.as_bytes())
            .map_err(|e| LabelerError::io_with_path(e, &temp_path))?;
        file.sync_all()
            .map_err(|e| LabelerError::io_with_path(e, &temp_path))?;
    }

    if keep_backup && path.exists() {
        let backup_path = path.with_extension("json.bak");
        if let Err(e) = fs::copy(path, &backup_path) {
            warn!("Failed to create backup {}: {}", backup_path.display(), e);
        } else {
            debug!("Created backup: {}", backup_path.display());
        }
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(LabelerError::Io {
            message: format!("Failed to rename {} to {}", temp_path.display(), path.display()),
            path: Some(path.to_path_buf()),
            source: Some(e),
        });
    }

    debug!("Wrote snapshot to {}", path.display());
    Ok(())
}
