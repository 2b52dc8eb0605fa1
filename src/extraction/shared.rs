use crate::error::{Error, Result};
use crate::types::ArchiveType;
use regex::Regex;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: [u8; 4] = *b"PK\x05\x06";
const TAR_MAGIC_OFFSET: usize = 257;

/// Detect archive type, by magic bytes first and file extension second
///
/// Supports zstd-compressed tar (the course export format), plain tar and ZIP.
pub fn detect_archive_type(path: &Path) -> Option<ArchiveType> {
    if let Some(kind) = sniff_magic(path) {
        return Some(kind);
    }

    let name = path.file_name()?.to_str()?.to_lowercase();
    if name.ends_with(".tar.zst") || name.ends_with(".tzst") || name.ends_with(".zst") {
        Some(ArchiveType::TarZstd)
    } else if name.ends_with(".tar") {
        Some(ArchiveType::Tar)
    } else if name.ends_with(".zip") {
        Some(ArchiveType::Zip)
    } else {
        None
    }
}

fn sniff_magic(path: &Path) -> Option<ArchiveType> {
    let mut file = std::fs::File::open(path).ok()?;
    let mut header = [0u8; TAR_MAGIC_OFFSET + 5];
    let mut filled = 0;
    while filled < header.len() {
        match file.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return None,
        }
    }

    if filled >= 4 {
        let magic = &header[..4];
        if magic == ZSTD_MAGIC {
            return Some(ArchiveType::TarZstd);
        }
        if magic == ZIP_MAGIC || magic == ZIP_EMPTY_MAGIC {
            return Some(ArchiveType::Zip);
        }
    }
    if filled >= TAR_MAGIC_OFFSET + 5 && &header[TAR_MAGIC_OFFSET..] == b"ustar" {
        return Some(ArchiveType::Tar);
    }
    None
}

/// Turn an archive entry path into a safe relative path
///
/// Drops `.` components; rejects absolute paths and anything containing `..`.
/// Returns `None` for unsafe or empty paths.
pub fn safe_relative_path(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

/// Render a relative path with `/` separators
pub fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone)]
enum ExcludePattern {
    /// Matches a path component exactly, or a leading path prefix when it contains `/`
    Literal(String),
    /// Glob (`*`, `**`, `?`) matched against the whole path and each component
    Glob(Regex),
}

/// Compiled exclusion patterns applied to archive entries
///
/// A pattern without wildcards excludes any entry with a path component equal
/// to it (`.git` excludes `.git/config` and `site/.git/HEAD`); patterns
/// containing `/` also match as a path prefix. Patterns with `*` or `?` are
/// globs where `*` stays within one component and `**` crosses components.
#[derive(Debug, Clone, Default)]
pub struct ExcludeRules {
    patterns: Vec<ExcludePattern>,
}

impl ExcludeRules {
    /// Compile patterns from configuration
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = pattern.as_ref().trim().trim_matches('/');
            if pattern.is_empty() {
                continue;
            }
            if pattern.contains(['*', '?']) {
                let regex = Regex::new(&glob_to_regex(pattern)).map_err(|e| {
                    Error::config("exclude_globs", format!("invalid pattern {}: {}", pattern, e))
                })?;
                compiled.push(ExcludePattern::Glob(regex));
            } else {
                compiled.push(ExcludePattern::Literal(pattern.to_string()));
            }
        }
        Ok(Self { patterns: compiled })
    }

    /// Whether an entry (relative path) should be skipped
    pub fn is_excluded(&self, relative: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let full = to_slash_path(relative);
        let components: Vec<&str> = full.split('/').collect();

        self.patterns.iter().any(|pattern| match pattern {
            ExcludePattern::Literal(literal) => {
                components.iter().any(|c| *c == literal.as_str())
                    || (literal.contains('/')
                        && (full == *literal || full.starts_with(&format!("{}/", literal))))
            }
            ExcludePattern::Glob(regex) => {
                regex.is_match(&full) || components.iter().any(|c| regex.is_match(c))
            }
        })
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut regex = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                regex.push_str(".*");
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    regex
}

/// Build an [`Error::ArchiveCorrupt`] for `archive`
pub(crate) fn corrupt(archive: &Path, reason: impl std::fmt::Display) -> Error {
    Error::ArchiveCorrupt {
        archive: archive.to_path_buf(),
        reason: reason.to_string(),
    }
}
