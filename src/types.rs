//! Core types for class-showcase

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique key of a manifest entry: (section, submission identifier)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StudentKey {
    /// Section identifier (e.g. "7-1")
    pub section: String,
    /// Student identifier in the course API
    pub student_id: String,
}

impl StudentKey {
    /// Create a new key
    pub fn new(section: impl Into<String>, student_id: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            student_id: student_id.into(),
        }
    }
}

impl fmt::Display for StudentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.section, self.student_id)
    }
}

/// Processing state of a single student within a run
///
/// ```text
/// Discovered → Downloading → Downloaded → Extracting → Extracted
///                  │                           │
///                  └──────────► Failed ◄───────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    /// Found in the section's student list
    Discovered,
    /// Export requested / archive downloading
    Downloading,
    /// Archive on local disk
    Downloaded,
    /// Archive being unpacked
    Extracting,
    /// Files in place (terminal)
    Extracted,
    /// Gave up on this student (terminal)
    Failed,
}

impl ProcessingState {
    /// Validate and perform a transition
    pub fn transition(self, to: ProcessingState) -> Result<ProcessingState> {
        use ProcessingState::*;
        let allowed = matches!(
            (self, to),
            (Discovered, Downloading)
                | (Downloading, Downloaded)
                | (Downloading, Failed)
                | (Downloaded, Extracting)
                | (Extracting, Extracted)
                | (Extracting, Failed)
        );
        if allowed {
            Ok(to)
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessingState::Discovered => "discovered",
            ProcessingState::Downloading => "downloading",
            ProcessingState::Downloaded => "downloaded",
            ProcessingState::Extracting => "extracting",
            ProcessingState::Extracted => "extracted",
            ProcessingState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Extraction status recorded in the manifest
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    /// Not processed yet
    #[default]
    Pending,
    /// Extracted successfully
    Success,
    /// Download or extraction failed
    Failed,
}

/// Archive container detected by magic bytes or extension
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveType {
    /// zstd-compressed tar (.tar.zst, the course export format)
    TarZstd,
    /// Uncompressed tar (.tar)
    Tar,
    /// ZIP archive (.zip)
    Zip,
}

impl ArchiveType {
    /// File extension used for temporary downloads of this type
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveType::TarZstd => "tar.zst",
            ArchiveType::Tar => "tar",
            ArchiveType::Zip => "zip",
        }
    }
}

/// Progress events emitted while a run is in flight
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A section's students were listed and queued
    SectionDiscovered {
        /// Section identifier
        section: String,
        /// Number of students queued
        students: usize,
    },
    /// A section was skipped
    SectionSkipped {
        /// Section identifier
        section: String,
        /// Why it was skipped
        reason: String,
    },
    /// A student moved to a new processing state
    StateChanged {
        /// Student being processed
        key: StudentKey,
        /// New state
        state: ProcessingState,
    },
    /// The manifest was written
    ManifestWritten {
        /// Number of successful students
        succeeded: usize,
        /// Number of failed students
        failed: usize,
    },
}
