use crate::error::Error;
use crate::extraction::*;
use crate::types::ArchiveType;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A few bytes that look like a PNG, including bytes that are invalid UTF-8
const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0xFF, 0xFE, 0x00, 0x80,
];

fn default_rules() -> ExcludeRules {
    ExcludeRules::new(&[".git", ".guides", ".codio"]).unwrap()
}

/// Build a tar stream in memory from (path, content) pairs
fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = ::tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = ::tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(::tar::EntryType::Regular);
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Create a zstd-compressed tar archive like the course API exports
fn create_tar_zst(archive_path: &Path, files: &[(&str, &[u8])]) {
    let tar = tar_bytes(files);
    let out = std::fs::File::create(archive_path).unwrap();
    let mut encoder = zstd::stream::write::Encoder::new(out, 3).unwrap();
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap();
}

/// Create a valid ZIP archive containing multiple files
fn create_zip_archive_multi(archive_path: &Path, files: &[(&str, &[u8])]) {
    let file = std::fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();
}

/// Tar with an entry whose raw name escapes the destination
fn create_traversal_tar(archive_path: &Path) {
    let mut builder = ::tar::Builder::new(Vec::new());

    let evil = b"pwned";
    let mut header = ::tar::Header::new_old();
    let name = b"../evil.txt";
    header.as_old_mut().name[..name.len()].copy_from_slice(name);
    header.set_size(evil.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(::tar::EntryType::Regular);
    header.set_cksum();
    builder.append(&header, &evil[..]).unwrap();

    let ok = b"<html></html>";
    let mut header = ::tar::Header::new_gnu();
    header.set_size(ok.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(::tar::EntryType::Regular);
    builder.append_data(&mut header, "index.html", &ok[..]).unwrap();

    std::fs::write(archive_path, builder.into_inner().unwrap()).unwrap();
}

struct Layout {
    _tmp: TempDir,
    archive_dir: PathBuf,
    dest: PathBuf,
    staging: PathBuf,
}

fn layout() -> Layout {
    let tmp = TempDir::new().unwrap();
    let archive_dir = tmp.path().join(".tmp");
    std::fs::create_dir_all(&archive_dir).unwrap();
    Layout {
        archive_dir,
        dest: tmp.path().join("7-1").join("jordan-a"),
        staging: tmp.path().join(".staging").join("7-1").join("jordan-a"),
        _tmp: tmp,
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[test]
fn test_detect_by_magic_ignores_misleading_extension() {
    let l = layout();
    let zst = l.archive_dir.join("export.bin");
    create_tar_zst(&zst, &[("a.txt", b"a")]);
    assert_eq!(detect_archive_type(&zst), Some(ArchiveType::TarZstd));

    let zip = l.archive_dir.join("export.tar.zst");
    create_zip_archive_multi(&zip, &[("a.txt", b"a")]);
    assert_eq!(detect_archive_type(&zip), Some(ArchiveType::Zip));

    let tar = l.archive_dir.join("export.dat");
    std::fs::write(&tar, tar_bytes(&[("a.txt", b"a")])).unwrap();
    assert_eq!(detect_archive_type(&tar), Some(ArchiveType::Tar));
}

#[test]
fn test_detect_falls_back_to_extension() {
    assert_eq!(
        detect_archive_type(Path::new("/nonexistent/project.tar.zst")),
        Some(ArchiveType::TarZstd)
    );
    assert_eq!(
        detect_archive_type(Path::new("/nonexistent/project.ZIP")),
        Some(ArchiveType::Zip)
    );
    assert_eq!(
        detect_archive_type(Path::new("/nonexistent/project.tar")),
        Some(ArchiveType::Tar)
    );
    assert_eq!(detect_archive_type(Path::new("/nonexistent/notes.txt")), None);
}

// ---------------------------------------------------------------------------
// Path safety and exclusion rules
// ---------------------------------------------------------------------------

#[test]
fn test_safe_relative_path_rejects_escapes() {
    assert_eq!(
        safe_relative_path(Path::new("./site/index.html")),
        Some(PathBuf::from("site/index.html"))
    );
    assert_eq!(safe_relative_path(Path::new("../etc/passwd")), None);
    assert_eq!(safe_relative_path(Path::new("a/../../b")), None);
    assert_eq!(safe_relative_path(Path::new("/etc/passwd")), None);
    assert_eq!(safe_relative_path(Path::new("./")), None);
}

#[test]
fn test_literal_patterns_match_components() {
    let rules = default_rules();
    assert!(rules.is_excluded(Path::new(".git/config")));
    assert!(rules.is_excluded(Path::new("project/.git/HEAD")));
    assert!(rules.is_excluded(Path::new(".codio")));
    assert!(rules.is_excluded(Path::new(".guides/content/step.md")));
    assert!(!rules.is_excluded(Path::new(".gitignore")));
    assert!(!rules.is_excluded(Path::new("images/cat.png")));
}

#[test]
fn test_literal_patterns_with_slash_match_prefixes() {
    let rules = ExcludeRules::new(&["node_modules/cache"]).unwrap();
    assert!(rules.is_excluded(Path::new("node_modules/cache/x.bin")));
    assert!(!rules.is_excluded(Path::new("node_modules/react/index.js")));
}

#[test]
fn test_glob_patterns() {
    let rules = ExcludeRules::new(&["*.pyc", ".DS_Store", "tmp/**"]).unwrap();
    assert!(rules.is_excluded(Path::new("code/cache.pyc")));
    assert!(rules.is_excluded(Path::new("images/.DS_Store")));
    assert!(rules.is_excluded(Path::new("tmp/a/b/c.txt")));
    assert!(!rules.is_excluded(Path::new("code/main.py")));
    assert!(!rules.is_excluded(Path::new("docs/tmp.txt")));
}

#[test]
fn test_empty_rules_exclude_nothing() {
    let rules = ExcludeRules::new::<&str>(&[]).unwrap();
    assert!(!rules.is_excluded(Path::new(".git/config")));
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_tar_zst_extraction_preserves_structure_and_bytes() {
    let l = layout();
    let archive = l.archive_dir.join("jordan-a.tar.zst");
    create_tar_zst(
        &archive,
        &[
            ("index.html", b"<h1>About Me</h1>"),
            ("images/me.png", PNG_BYTES),
            ("css/style.css", b"body { color: teal; }"),
        ],
    );

    let files = extract_archive(&archive, &l.dest, &l.staging, &default_rules())
        .await
        .unwrap();

    assert_eq!(files, vec!["css/style.css", "images/me.png", "index.html"]);
    assert_eq!(std::fs::read(l.dest.join("images/me.png")).unwrap(), PNG_BYTES);
    assert_eq!(
        std::fs::read_to_string(l.dest.join("index.html")).unwrap(),
        "<h1>About Me</h1>"
    );
    assert!(!l.staging.exists(), "staging dir should have been renamed away");
}

#[tokio::test]
async fn test_excluded_entries_are_not_written() {
    let l = layout();
    let archive = l.archive_dir.join("export.tar.zst");
    create_tar_zst(
        &archive,
        &[
            (".codio", b"{}"),
            (".guides/content/step.md", b"# step"),
            (".git/HEAD", b"ref: refs/heads/main"),
            ("index.html", b"<p>hi</p>"),
        ],
    );

    let files = extract_archive(&archive, &l.dest, &l.staging, &default_rules())
        .await
        .unwrap();

    assert_eq!(files, vec!["index.html"]);
    assert!(!l.dest.join(".git").exists());
    assert!(!l.dest.join(".guides").exists());
    assert!(!l.dest.join(".codio").exists());
}

#[tokio::test]
async fn test_traversal_entries_are_skipped() {
    let l = layout();
    let archive = l.archive_dir.join("evil.tar");
    create_traversal_tar(&archive);

    let files = extract_archive(&archive, &l.dest, &l.staging, &default_rules())
        .await
        .unwrap();

    assert_eq!(files, vec!["index.html"]);
    assert!(!l.dest.parent().unwrap().join("evil.txt").exists());
    assert!(!l.staging.parent().unwrap().join("evil.txt").exists());
}

#[tokio::test]
async fn test_zip_extraction() {
    let l = layout();
    let archive = l.archive_dir.join("export.zip");
    create_zip_archive_multi(
        &archive,
        &[
            ("about/index.html", b"<p>zip</p>"),
            ("about/img/logo.png", PNG_BYTES),
            (".git/config", b"[core]"),
        ],
    );

    let files = extract_archive(&archive, &l.dest, &l.staging, &default_rules())
        .await
        .unwrap();

    assert_eq!(files, vec!["about/img/logo.png", "about/index.html"]);
    assert_eq!(
        std::fs::read(l.dest.join("about/img/logo.png")).unwrap(),
        PNG_BYTES
    );
}

#[tokio::test]
async fn test_re_extraction_is_idempotent_and_replaces_old_contents() {
    let l = layout();
    let archive = l.archive_dir.join("jordan-a.tar.zst");
    create_tar_zst(
        &archive,
        &[("index.html", b"<p>v1</p>"), ("images/me.png", PNG_BYTES)],
    );
    let rules = default_rules();

    let first = extract_archive(&archive, &l.dest, &l.staging, &rules)
        .await
        .unwrap();
    let first_png = std::fs::read(l.dest.join("images/me.png")).unwrap();
    std::fs::write(l.dest.join("stale.txt"), "left over from an older run").unwrap();

    let second = extract_archive(&archive, &l.dest, &l.staging, &rules)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(std::fs::read(l.dest.join("images/me.png")).unwrap(), first_png);
    assert_eq!(
        std::fs::read_to_string(l.dest.join("index.html")).unwrap(),
        "<p>v1</p>"
    );
    assert!(!l.dest.join("stale.txt").exists(), "re-run must overwrite, not merge");
}

#[tokio::test]
async fn test_corrupt_archive_fails_and_keeps_previous_output() {
    let l = layout();
    std::fs::create_dir_all(&l.dest).unwrap();
    std::fs::write(l.dest.join("index.html"), "previous run").unwrap();

    // Valid zstd magic followed by garbage
    let archive = l.archive_dir.join("broken.tar.zst");
    let mut bytes = vec![0x28, 0xB5, 0x2F, 0xFD];
    bytes.extend_from_slice(&[0x13; 64]);
    std::fs::write(&archive, bytes).unwrap();

    let err = extract_archive(&archive, &l.dest, &l.staging, &default_rules())
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::ArchiveCorrupt { .. }),
        "expected ArchiveCorrupt, got {err:?}"
    );
    assert!(!l.staging.exists(), "staging dir must be cleaned up");
    assert_eq!(
        std::fs::read_to_string(l.dest.join("index.html")).unwrap(),
        "previous run"
    );
}

#[tokio::test]
async fn test_truncated_zip_is_corrupt() {
    let l = layout();
    let archive = l.archive_dir.join("cut.zip");
    create_zip_archive_multi(&archive, &[("index.html", b"<p>hello</p>")]);
    let bytes = std::fs::read(&archive).unwrap();
    std::fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();

    let err = extract_archive(&archive, &l.dest, &l.staging, &default_rules())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ArchiveCorrupt { .. }), "got {err:?}");
    assert!(!l.dest.exists());
}

#[tokio::test]
async fn test_unknown_format_is_corrupt() {
    let l = layout();
    let archive = l.archive_dir.join("notes.txt");
    std::fs::write(&archive, "just some text").unwrap();

    let err = extract_archive(&archive, &l.dest, &l.staging, &default_rules())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "archive_corrupt");
}

#[tokio::test]
async fn test_archive_with_only_excluded_entries_yields_empty_project() {
    let l = layout();
    let archive = l.archive_dir.join("empty.tar.zst");
    create_tar_zst(&archive, &[(".codio", b"{}")]);

    let files = extract_archive(&archive, &l.dest, &l.staging, &default_rules())
        .await
        .unwrap();
    assert!(files.is_empty());
    assert!(l.dest.is_dir());
}
