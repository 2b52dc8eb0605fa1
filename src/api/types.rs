//! Wire types for the course-hosting API

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Token endpoint response
#[derive(Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) expires_in: Option<u64>,
}

/// A course with its modules and assignments
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Course {
    /// Course identifier
    #[serde(default)]
    pub id: String,
    /// Course title
    #[serde(default)]
    pub name: String,
    /// Modules, each holding assignments
    #[serde(default)]
    pub modules: Vec<CourseModule>,
}

impl Course {
    /// Find an assignment by name (case-insensitive exact match, all modules)
    pub fn find_assignment(&self, name: &str) -> Option<&Assignment> {
        let wanted = name.trim().to_lowercase();
        self.modules
            .iter()
            .flat_map(|m| m.assignments.iter())
            .find(|a| a.name.trim().to_lowercase() == wanted)
    }
}

/// A module inside a course
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CourseModule {
    /// Module title
    #[serde(default)]
    pub name: String,
    /// Assignments in this module
    #[serde(default)]
    pub assignments: Vec<Assignment>,
}

/// An assignment (project container)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    /// Assignment identifier
    pub id: String,
    /// Assignment title
    pub name: String,
}

/// A student enrolled in a course
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Student {
    /// Student identifier, used as the submission identifier
    pub id: String,
    /// Full name as stored by the API
    #[serde(default)]
    pub name: String,
    /// Login name
    #[serde(default)]
    pub username: Option<String>,
    /// Contact address
    #[serde(default)]
    pub email: Option<String>,
}

/// Response to an export request
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ExportStart {
    #[serde(rename = "taskUri", default)]
    pub(crate) task_uri: Option<String>,
}

/// State of an export task
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ExportTask {
    #[serde(default)]
    pub(crate) done: bool,
    #[serde(default)]
    pub(crate) error: Option<serde_json::Value>,
    #[serde(default)]
    pub(crate) url: Option<String>,
}

/// Identifies one student's export of one assignment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveRequest {
    /// Course identifier
    pub course_id: String,
    /// Assignment identifier
    pub assignment_id: String,
    /// Student identifier
    pub student_id: String,
}

/// A raw archive downloaded to disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadedArchive {
    /// Where the archive was written
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Hex-encoded SHA-256 of the archive bytes
    pub sha256: String,
}
