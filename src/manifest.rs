//! Run manifest: the hand-off between the download stage and everything after it
//!
//! Workers send one [`StudentRecord`] per student over an `mpsc` channel to a
//! single [`ManifestBuilder`] task, which deduplicates by [`StudentKey`] and
//! produces a [`Manifest`] in a deterministic order. The build, publish and
//! validate stages read `manifest.json` and never call the API.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{ExtractionStatus, StudentKey};
use crate::utils::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Everything recorded about one student in one run
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StudentRecord {
    /// Section identifier
    pub section: String,
    /// Submission identifier (the API's student id)
    pub student_id: String,
    /// Full name from the API; stays local, never published
    pub full_name: String,
    /// Public "First L" display name, unique within the section
    pub display_name: String,
    /// URL path segment derived from the display name
    pub slug: String,
    /// Extraction directory relative to the build directory (`7-1/jordan-a`)
    pub local_path: String,
    /// Extracted files, relative and `/`-separated, sorted
    #[serde(default)]
    pub files: Vec<String>,
    /// Detected main page relative to `local_path`
    #[serde(default)]
    pub entry_page: Option<String>,
    /// SHA-256 of the downloaded archive
    #[serde(default)]
    pub archive_sha256: Option<String>,
    /// Outcome
    pub status: ExtractionStatus,
    /// Machine-readable error code when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Error detail when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Non-fatal problems (e.g. no entry page found)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StudentRecord {
    /// Unique key of this record
    pub fn key(&self) -> StudentKey {
        StudentKey::new(&self.section, &self.student_id)
    }

    /// Whether the student's project was extracted
    pub fn is_success(&self) -> bool {
        self.status == ExtractionStatus::Success
    }

    /// Mark the record failed with the given error
    pub fn fail(&mut self, error: &Error) {
        self.status = ExtractionStatus::Failed;
        self.error_code = Some(error.error_code().to_string());
        self.error = Some(error.to_string());
    }
}

/// Per-section outcome of a run
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SectionSummary {
    /// Section identifier
    pub section: String,
    /// Course the section maps to
    pub course_id: String,
    /// Students queued for this section
    pub discovered: usize,
    /// Students extracted successfully
    pub succeeded: usize,
    /// Students that failed
    pub failed: usize,
    /// Why the section was skipped, if it was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

/// Run metadata stored at the top of the manifest
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    /// When the manifest was produced
    pub generated_at: DateTime<Utc>,
    /// School year label
    pub school_year: String,
    /// Assignment that was exported
    pub assignment_name: String,
    /// Section → course identifier, as configured
    pub sections: BTreeMap<String, String>,
    /// Per-section outcome, in section order
    pub summaries: Vec<SectionSummary>,
    /// Number of student records
    pub total: usize,
    /// Successful students
    pub succeeded: usize,
    /// Failed students
    pub failed: usize,
}

/// The manifest file
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Run metadata
    pub metadata: RunMetadata,
    /// Student records sorted by section, display name and submission id
    pub students: Vec<StudentRecord>,
}

impl Manifest {
    /// Write the manifest as pretty JSON via temp file and rename
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json).await?;
        info!(path = %path.display(), students = self.students.len(), "manifest written");
        Ok(())
    }

    /// Read a manifest written by an earlier download run
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Config {
                    message: format!(
                        "manifest not found at {}; run download first",
                        path.display()
                    ),
                    key: Some("build_dir".to_string()),
                });
            }
            Err(e) => return Err(Error::Io(e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Records of successfully extracted students
    pub fn successful(&self) -> impl Iterator<Item = &StudentRecord> {
        self.students.iter().filter(|r| r.is_success())
    }

    /// Records of failed students
    pub fn failures(&self) -> impl Iterator<Item = &StudentRecord> {
        self.students.iter().filter(|r| r.status == ExtractionStatus::Failed)
    }
}

/// Single-writer aggregation point for student records
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    records: BTreeMap<StudentKey, StudentRecord>,
    sections: BTreeMap<String, SectionSummary>,
}

impl ManifestBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a section that was discovered (students queued) or skipped
    pub fn record_section(&mut self, summary: SectionSummary) {
        self.sections.insert(summary.section.clone(), summary);
    }

    /// Add or replace a student record; returns true if one was replaced
    pub fn insert(&mut self, record: StudentRecord) -> bool {
        let key = record.key();
        let replaced = self.records.insert(key.clone(), record).is_some();
        if replaced {
            debug!(%key, "duplicate student record replaced");
        }
        replaced
    }

    /// Drain the outcome channel until every sender is dropped
    pub async fn consume(mut self, mut rx: mpsc::Receiver<StudentRecord>) -> Self {
        while let Some(record) = rx.recv().await {
            self.insert(record);
        }
        self
    }

    /// Produce the manifest: sorted records, per-section counts, totals
    pub fn finish(self, config: &Config) -> Manifest {
        let mut students: Vec<StudentRecord> = self.records.into_values().collect();
        students.sort_by(|a, b| {
            a.section
                .cmp(&b.section)
                .then_with(|| a.display_name.cmp(&b.display_name))
                .then_with(|| a.student_id.cmp(&b.student_id))
        });

        let mut sections = self.sections;
        for record in &students {
            let summary = sections
                .entry(record.section.clone())
                .or_insert_with(|| SectionSummary {
                    section: record.section.clone(),
                    course_id: config.sections.get(&record.section).cloned().unwrap_or_default(),
                    ..SectionSummary::default()
                });
            match record.status {
                ExtractionStatus::Success => summary.succeeded += 1,
                ExtractionStatus::Failed => summary.failed += 1,
                ExtractionStatus::Pending => {}
            }
        }

        let succeeded = students.iter().filter(|r| r.is_success()).count();
        let failed = students
            .iter()
            .filter(|r| r.status == ExtractionStatus::Failed)
            .count();

        Manifest {
            metadata: RunMetadata {
                generated_at: Utc::now(),
                school_year: config.school_year.clone(),
                assignment_name: config.assignment_name.clone(),
                sections: config.sections.clone(),
                summaries: sections.into_values().collect(),
                total: students.len(),
                succeeded,
                failed,
            },
            students,
        }
    }
}
