//! Reconciliation of a registry entry with its backing file.
//!
//! The file's modification time is the only change signal: content is re-read
//! when the mtime is strictly newer than the one recorded at the last read.
//! Both cross-handle and cross-process writers are picked up this way.

use crate::error::{Error, Result};
use crate::registry::RegistryEntry;
use crate::scalar::{decode_lines, Scalar};
use nori_observe::{obs_count, LogEvt, LogKind, VizEvent};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;

/// Brings `entry` up to date with the file at `path` and returns the persisted records.
///
/// A missing file yields an empty sequence and leaves the entry untouched.
pub async fn reconcile(path: &Path, entry: &RegistryEntry) -> Result<Vec<Scalar>> {
    let metadata = match fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    if !metadata.is_file() {
        return Err(Error::NotAFile(path.to_path_buf()));
    }

    let modified = metadata.modified()?;
    if !entry.is_stale(modified) {
        return Ok(entry.persisted());
    }

    let content = match fs::read_to_string(path).await {
        Ok(c) => c,
        // Deleted between stat and read
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let records = decode_lines(&content);
    let count = records.len();
    entry.replace_persisted(records.clone(), modified);

    tracing::debug!(path = %path.display(), records = count, "reconciled backing file");
    obs_count!(entry.meter(), "seqlog_reconcile_reads_total", &[], 1);
    entry.meter().emit(VizEvent::Log(LogEvt {
        file: path.display().to_string(),
        kind: LogKind::Reconciled { records: count },
    }));

    Ok(records)
}
