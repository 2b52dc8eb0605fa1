use crate::error::Result;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::EntryType;
use tracing::{debug, info, warn};

use super::shared::{ExcludeRules, corrupt, safe_relative_path};

/// Archive extractor for tar streams, optionally zstd-compressed
pub struct TarExtractor;

impl TarExtractor {
    /// Extract a zstd-compressed tar archive (the course export format)
    pub fn extract_zstd(
        archive_path: &Path,
        dest_path: &Path,
        rules: &ExcludeRules,
    ) -> Result<Vec<PathBuf>> {
        let file = std::fs::File::open(archive_path)?;
        let decoder = zstd::stream::read::Decoder::new(file)
            .map_err(|e| corrupt(archive_path, format!("invalid zstd stream: {}", e)))?;
        Self::extract_from(decoder, archive_path, dest_path, rules)
    }

    /// Extract an uncompressed tar archive
    pub fn extract_plain(
        archive_path: &Path,
        dest_path: &Path,
        rules: &ExcludeRules,
    ) -> Result<Vec<PathBuf>> {
        let file = std::fs::File::open(archive_path)?;
        Self::extract_from(file, archive_path, dest_path, rules)
    }

    fn extract_from<R: Read>(
        reader: R,
        archive_path: &Path,
        dest_path: &Path,
        rules: &ExcludeRules,
    ) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting tar extraction");
        std::fs::create_dir_all(dest_path)?;

        let mut archive = tar::Archive::new(reader);
        let entries = archive
            .entries()
            .map_err(|e| corrupt(archive_path, format!("failed to read tar stream: {}", e)))?;

        let mut extracted_files = Vec::new();

        for entry in entries {
            let mut entry = entry
                .map_err(|e| corrupt(archive_path, format!("failed to read tar entry: {}", e)))?;

            let raw_path = entry
                .path()
                .map_err(|e| corrupt(archive_path, format!("invalid entry path: {}", e)))?
                .into_owned();

            let Some(relative) = safe_relative_path(&raw_path) else {
                if raw_path.components().any(|c| !matches!(c, std::path::Component::CurDir)) {
                    warn!(?archive_path, entry = %raw_path.display(), "skipping entry with unsafe path");
                }
                continue;
            };

            if rules.is_excluded(&relative) {
                debug!(entry = %relative.display(), "excluding entry");
                continue;
            }

            let out_path = dest_path.join(&relative);
            match entry.header().entry_type() {
                EntryType::Directory => {
                    std::fs::create_dir_all(&out_path)?;
                }
                EntryType::Regular | EntryType::Continuous => {
                    if let Some(parent) = out_path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    let mut outfile = std::fs::File::create(&out_path)?;
                    std::io::copy(&mut entry, &mut outfile).map_err(|e| {
                        corrupt(
                            archive_path,
                            format!("failed to unpack {}: {}", relative.display(), e),
                        )
                    })?;
                    extracted_files.push(relative);
                }
                other => {
                    debug!(entry = %relative.display(), entry_type = ?other, "skipping non-regular entry");
                }
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "tar extraction successful"
        );

        Ok(extracted_files)
    }
}
