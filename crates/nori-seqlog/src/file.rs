//! Backing file primitives.
//!
//! Thin wrappers over `tokio::fs` that encode the not-found policy of the log:
//! a missing file is created on open, ignored on delete.

use crate::error::{Error, Result};
use crate::scalar::{encode_lines, Scalar};
use std::io::{self, ErrorKind};
use std::path::Path;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Creates an empty file at `path` unless one already exists.
///
/// Fails with [`Error::NotAFile`] if the path exists but is not a regular file.
pub async fn ensure_file(path: &Path) -> Result<()> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(Error::NotAFile(path.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .await
            {
                Ok(_) => Ok(()),
                // Another handle or process created it first
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Deletes the file at `path`. Returns false if there was nothing to delete.
pub async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Durably appends `values`, one record per line, creating the file if needed.
pub async fn append_records(path: &Path, values: &[Scalar]) -> Result<()> {
    let encoded = encode_lines(values);

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    file.write_all(encoded.as_bytes()).await?;
    file.flush().await?;
    file.sync_data().await?;

    Ok(())
}

/// Blocking variant of [`append_records`] for contexts that cannot await
/// (drop glue during shutdown).
pub fn append_records_blocking(path: &Path, values: &[Scalar]) -> io::Result<()> {
    use std::io::Write;

    let encoded = encode_lines(values);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(encoded.as_bytes())?;
    file.sync_data()
}
