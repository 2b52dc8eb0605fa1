//! Archive extraction
//!
//! This module unpacks student project exports (zstd-compressed tar, plain tar
//! or ZIP) into per-student directories. Extraction always happens in a
//! staging directory which is renamed over the destination only after every
//! entry was written, so an interrupted run never leaves a half-written
//! project at its final path.

mod shared;
mod tar;
mod zip;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

// Re-exports
pub use shared::{ExcludeRules, detect_archive_type, safe_relative_path, to_slash_path};
pub use tar::TarExtractor;
pub use zip::ZipExtractor;

use crate::error::{Error, Result};
use crate::types::ArchiveType;
use shared::corrupt;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

/// Extract an archive into `dest_path`, replacing whatever was there
///
/// The archive is unpacked into `staging_path` on the blocking thread pool;
/// on success `dest_path` is removed and `staging_path` renamed into its
/// place. On failure the staging directory is removed and `dest_path` is left
/// untouched. `staging_path` must be on the same filesystem as `dest_path`.
///
/// # Returns
/// * `Ok(Vec<String>)` - sorted `/`-separated paths of the extracted files,
///   relative to `dest_path`
/// * `Err(Error::ArchiveCorrupt)` - unknown format or undecodable content
///
/// # Example
/// ```no_run
/// use class_showcase::extraction::{ExcludeRules, extract_archive};
/// use std::path::Path;
///
/// # async fn example() -> class_showcase::Result<()> {
/// let rules = ExcludeRules::new(&[".git", ".codio"])?;
/// let files = extract_archive(
///     Path::new("build/.tmp/7-1/jordan-a.tar.zst"),
///     Path::new("build/7-1/jordan-a"),
///     Path::new("build/.staging/7-1/jordan-a"),
///     &rules,
/// )
/// .await?;
/// println!("Extracted {} files", files.len());
/// # Ok(())
/// # }
/// ```
pub async fn extract_archive(
    archive_path: &Path,
    dest_path: &Path,
    staging_path: &Path,
    rules: &ExcludeRules,
) -> Result<Vec<String>> {
    let archive_type = detect_archive_type(archive_path).ok_or_else(|| {
        corrupt(
            archive_path,
            format!("unknown archive type for file: {}", archive_path.display()),
        )
    })?;

    info!(
        ?archive_path,
        ?archive_type,
        "dispatching extraction to appropriate extractor"
    );

    remove_dir_if_exists(staging_path).await?;

    let archive_owned = archive_path.to_path_buf();
    let staging_owned = staging_path.to_path_buf();
    let rules_owned = rules.clone();

    // Use spawn_blocking to avoid blocking the async runtime during extraction
    let result = spawn_blocking(move || {
        extract_with(archive_type, &archive_owned, &staging_owned, &rules_owned)
    })
    .await
    .map_err(|e| corrupt(archive_path, format!("extraction task panicked: {}", e)));

    let extracted = match result.and_then(|inner| inner) {
        Ok(files) => files,
        Err(e) => {
            warn!(?archive_path, error = %e, "extraction failed, discarding staging directory");
            if let Err(cleanup) = remove_dir_if_exists(staging_path).await {
                warn!(?staging_path, error = %cleanup, "failed to remove staging directory");
            }
            return Err(e);
        }
    };

    install_staged(staging_path, dest_path).await?;

    let mut files: Vec<String> = extracted.iter().map(|p| to_slash_path(p)).collect();
    files.sort();
    files.dedup();

    debug!(?dest_path, file_count = files.len(), "extraction installed");
    Ok(files)
}

fn extract_with(
    archive_type: ArchiveType,
    archive_path: &Path,
    dest_path: &Path,
    rules: &ExcludeRules,
) -> Result<Vec<PathBuf>> {
    match archive_type {
        ArchiveType::TarZstd => TarExtractor::extract_zstd(archive_path, dest_path, rules),
        ArchiveType::Tar => TarExtractor::extract_plain(archive_path, dest_path, rules),
        ArchiveType::Zip => ZipExtractor::extract(archive_path, dest_path, rules),
    }
}

/// Replace `dest_path` with the completed staging directory
async fn install_staged(staging_path: &Path, dest_path: &Path) -> Result<()> {
    // An archive with no surviving entries still produces an (empty) project directory
    tokio::fs::create_dir_all(staging_path).await?;

    if let Some(parent) = dest_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    remove_dir_if_exists(dest_path).await?;
    tokio::fs::rename(staging_path, dest_path).await.map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!(
                "failed to move {} into place at {}: {}",
                staging_path.display(),
                dest_path.display(),
                e
            ),
        ))
    })
}

/// Remove a directory tree, treating "not found" as success
pub(crate) async fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}
