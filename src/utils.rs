//! Utility functions for file operations and path manipulation

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Entry page names searched in the project root and its subdirectories
const ENTRY_PAGES: &[&str] = &[
    "index.html",
    "Index.html",
    "INDEX.HTML",
    "index.htm",
    "Index.htm",
];

/// Entry page names accepted in the project root only
const FALLBACK_ENTRY_PAGES: &[&str] = &["home.html", "start.html", "main.html"];

/// Find the main page of an extracted project
///
/// Looks for an `index.html` (or a common variant) in the project root, then
/// in subdirectories up to two levels deep, skipping hidden directories.
/// Subdirectories are visited in name order. If nothing is found,
/// `home.html`, `start.html` and `main.html` are accepted in the root.
///
/// # Returns
///
/// The `/`-separated path of the page relative to `project_dir`, or `None`.
///
/// # Examples
///
/// ```
/// use class_showcase::utils::find_entry_page;
///
/// let dir = tempfile::tempdir().unwrap();
/// std::fs::create_dir_all(dir.path().join("about-me")).unwrap();
/// std::fs::write(dir.path().join("about-me/index.html"), "<h1>Hi</h1>").unwrap();
///
/// assert_eq!(find_entry_page(dir.path()), Some("about-me/index.html".to_string()));
/// ```
pub fn find_entry_page(project_dir: &Path) -> Option<String> {
    if let Some(page) = entry_page_in(project_dir, ENTRY_PAGES) {
        return Some(page.to_string());
    }

    for subdir in visible_subdirs(project_dir) {
        let name = dir_name(&subdir)?;
        if let Some(page) = entry_page_in(&subdir, ENTRY_PAGES) {
            return Some(format!("{}/{}", name, page));
        }
        for nested in visible_subdirs(&subdir) {
            let nested_name = dir_name(&nested)?;
            if let Some(page) = entry_page_in(&nested, ENTRY_PAGES) {
                return Some(format!("{}/{}/{}", name, nested_name, page));
            }
        }
    }

    entry_page_in(project_dir, FALLBACK_ENTRY_PAGES).map(str::to_string)
}

fn entry_page_in<'a>(dir: &Path, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .copied()
        .find(|name| dir.join(name).is_file() && exact_name_exists(dir, name))
}

/// Case-insensitive filesystems report `INDEX.HTML` for `index.html`; make
/// sure the spelling actually on disk is the one returned.
fn exact_name_exists(dir: &Path, name: &str) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| e.file_name().to_str() == Some(name))
        })
        .unwrap_or(false)
}

fn visible_subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter(|p| dir_name(p).is_some_and(|n| !n.starts_with('.')))
            .collect(),
        Err(_) => Vec::new(),
    };
    dirs.sort();
    dirs
}

fn dir_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Recursively copy a directory tree
///
/// `dst` is created if needed; existing files are overwritten. Symlinks are
/// not followed. Returns the number of files copied.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<usize> {
    std::fs::create_dir_all(dst)?;
    let mut copied = 0;

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "failed to walk {}: {}",
                src.display(),
                e
            )))
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::Other(format!("path outside copy root: {}", e)))?;
        let target = dst.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Write a file by writing a sibling temp file and renaming it over `path`
///
/// Readers never observe a partially written file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Other(format!("invalid output path: {}", path.display())))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    tokio::fs::write(&tmp_path, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Error::Io(e));
    }
    Ok(())
}
