use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::shared::{ExcludeRules, corrupt, safe_relative_path};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Archive extractor for ZIP files
pub struct ZipExtractor;

impl ZipExtractor {
    /// Extract a single ZIP entry to disk, creating directories as needed
    fn extract_zip_entry(
        mut file: zip::read::ZipFile,
        dest_path: &Path,
        archive_path: &Path,
        rules: &ExcludeRules,
    ) -> Result<Option<PathBuf>> {
        let relative = match file.enclosed_name().and_then(safe_relative_path) {
            Some(path) => path,
            None => {
                warn!(?archive_path, entry = file.name(), "skipping entry with unsafe path");
                return Ok(None);
            }
        };

        if rules.is_excluded(&relative) {
            debug!(entry = %relative.display(), "excluding entry");
            return Ok(None);
        }

        if let Some(mode) = file.unix_mode()
            && mode & S_IFMT == S_IFLNK
        {
            debug!(entry = %relative.display(), "skipping symlink entry");
            return Ok(None);
        }

        let file_path = dest_path.join(&relative);

        if file.is_dir() {
            std::fs::create_dir_all(&file_path)?;
            return Ok(None);
        }

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut outfile = std::fs::File::create(&file_path)?;
        std::io::copy(&mut file, &mut outfile).map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => corrupt(
                archive_path,
                format!("failed to decode {}: {}", relative.display(), e),
            ),
            _ => Error::Io(e),
        })?;

        Ok(Some(relative))
    }

    /// Extract every entry of a ZIP archive into `dest_path`
    ///
    /// Returns the relative paths of the regular files written.
    pub fn extract(
        archive_path: &Path,
        dest_path: &Path,
        rules: &ExcludeRules,
    ) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting ZIP extraction");

        std::fs::create_dir_all(dest_path)?;

        let file = std::fs::File::open(archive_path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| corrupt(archive_path, format!("failed to read ZIP archive: {}", e)))?;

        let mut extracted_files = Vec::new();

        for i in 0..archive.len() {
            let file = archive
                .by_index(i)
                .map_err(|e| corrupt(archive_path, format!("failed to read ZIP entry: {}", e)))?;

            if let Some(relative) = Self::extract_zip_entry(file, dest_path, archive_path, rules)? {
                extracted_files.push(relative);
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "ZIP extraction successful"
        );

        Ok(extracted_files)
    }
}
