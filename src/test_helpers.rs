//! Shared test helpers: configuration, archive fixtures and a fake course API.

use crate::api::{
    ArchiveRequest, Assignment, Course, CourseModule, CourseSource, DownloadedArchive, Student,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::manifest::{Manifest, RunMetadata, StudentRecord};
use crate::types::ExtractionStatus;
use sha2::{Digest, Sha256};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration pointing at `api_base`, with fast retries and paths under `root`.
pub(crate) fn test_config(api_base: &str, root: &Path) -> Config {
    let text = format!(
        r#"
school_year = "25-26"
site_title = "Grade 7 About Me Projects"
assignment_name = "About Me"
max_concurrency = 4

[sections]
"7-1" = "course-abc"
"7-2" = "course-def"

[github]
owner = "example"
repo = "about-me"

[retry]
max_attempts = 4
initial_delay_ms = 10
max_delay_ms = 50
jitter = false

[timeouts]
api_secs = 5
download_secs = 5
http_secs = 5
export_secs = 5
export_poll_ms = 10

[api]
base_url = "{api_base}/api/v1"
oauth_url = "{api_base}/oauth/token"
"#
    );
    let mut config = Config::from_toml(&text).unwrap();
    config.project_root = root.to_path_buf();
    config.build_dir = root.join("build");
    config.site_dir = root.join("site");
    config
}

/// A zstd-compressed tar holding `files`, like the course API exports.
pub(crate) fn tar_zst_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, name, *content).unwrap();
    }
    let tar = builder.into_inner().unwrap();

    let mut encoder = zstd::stream::write::Encoder::new(Vec::new(), 3).unwrap();
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

/// A simple About Me project archive
pub(crate) fn about_me_archive(title: &str) -> Vec<u8> {
    let page = format!("<html><body><h1>{}</h1></body></html>", title);
    tar_zst_bytes(&[
        ("index.html", page.as_bytes()),
        ("images/me.png", &[0x89, 0x50, 0x4E, 0x47, 0xFF, 0x00]),
        (".codio", b"{}"),
    ])
}

/// A successful manifest record with `index.html` as entry page
pub(crate) fn student_record(
    section: &str,
    student_id: &str,
    display_name: &str,
    slug: &str,
) -> StudentRecord {
    StudentRecord {
        section: section.to_string(),
        student_id: student_id.to_string(),
        full_name: display_name.to_string(),
        display_name: display_name.to_string(),
        slug: slug.to_string(),
        local_path: format!("{}/{}", section, slug),
        files: vec!["index.html".to_string()],
        entry_page: Some("index.html".to_string()),
        archive_sha256: None,
        status: ExtractionStatus::Success,
        error_code: None,
        error: None,
        warnings: Vec::new(),
    }
}

/// A manifest over `students`, with the sections of [`test_config`]
pub(crate) fn test_manifest(students: Vec<StudentRecord>) -> Manifest {
    Manifest {
        metadata: RunMetadata {
            generated_at: Utc::now(),
            school_year: "25-26".to_string(),
            assignment_name: "About Me".to_string(),
            sections: BTreeMap::from([
                ("7-1".to_string(), "course-abc".to_string()),
                ("7-2".to_string(), "course-def".to_string()),
            ]),
            summaries: Vec::new(),
            total: students.len(),
            succeeded: students.iter().filter(|r| r.is_success()).count(),
            failed: students.iter().filter(|r| !r.is_success()).count(),
        },
        students,
    }
}

fn student(id: &str, name: &str) -> Student {
    Student {
        id: id.to_string(),
        name: name.to_string(),
        username: None,
        email: None,
    }
}

type ErrorFactory = Box<dyn Fn() -> Error + Send + Sync>;

/// In-memory [`CourseSource`] with scripted failures and delays.
#[derive(Default)]
pub(crate) struct FakeCourseSource {
    courses: HashMap<String, Course>,
    students: HashMap<String, Vec<Student>>,
    archives: HashMap<String, Vec<u8>>,
    fetch_errors: HashMap<String, ErrorFactory>,
    delays: HashMap<String, Duration>,
    auth_error: Option<ErrorFactory>,
    fetch_calls: Mutex<Vec<String>>,
}

impl FakeCourseSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a course containing `assignment` (when given) and its students.
    pub(crate) fn with_course(
        mut self,
        course_id: &str,
        assignment: Option<&str>,
        students: &[(&str, &str)],
    ) -> Self {
        let assignments = assignment
            .map(|name| {
                vec![Assignment {
                    id: format!("{}-assignment", course_id),
                    name: name.to_string(),
                }]
            })
            .unwrap_or_default();
        self.courses.insert(
            course_id.to_string(),
            Course {
                id: course_id.to_string(),
                name: format!("Course {}", course_id),
                modules: vec![CourseModule {
                    name: "Projects".to_string(),
                    assignments,
                }],
            },
        );
        self.students.insert(
            course_id.to_string(),
            students.iter().map(|(id, name)| student(id, name)).collect(),
        );
        for (id, name) in students {
            self.archives
                .insert(id.to_string(), about_me_archive(name));
        }
        self
    }

    /// Serve custom archive bytes for a student.
    pub(crate) fn with_archive(mut self, student_id: &str, bytes: Vec<u8>) -> Self {
        self.archives.insert(student_id.to_string(), bytes);
        self
    }

    /// Make fetching a student's archive fail.
    pub(crate) fn with_fetch_error<F>(mut self, student_id: &str, make: F) -> Self
    where
        F: Fn() -> Error + Send + Sync + 'static,
    {
        self.fetch_errors
            .insert(student_id.to_string(), Box::new(make));
        self
    }

    /// Delay a student's fetch to shuffle completion order.
    pub(crate) fn with_delay(mut self, student_id: &str, delay: Duration) -> Self {
        self.delays.insert(student_id.to_string(), delay);
        self
    }

    /// Make authentication fail.
    pub(crate) fn with_auth_error<F>(mut self, make: F) -> Self
    where
        F: Fn() -> Error + Send + Sync + 'static,
    {
        self.auth_error = Some(Box::new(make));
        self
    }

    /// Student ids whose archives were requested, in call order.
    pub(crate) fn fetch_calls(&self) -> Vec<String> {
        self.fetch_calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CourseSource for FakeCourseSource {
    async fn authenticate(&self, _cancel: &CancellationToken) -> Result<()> {
        match &self.auth_error {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }

    async fn get_course(&self, course_id: &str, _cancel: &CancellationToken) -> Result<Course> {
        self.courses.get(course_id).cloned().ok_or(Error::Api {
            status: 404,
            message: format!("course {} not found", course_id),
        })
    }

    async fn list_students(
        &self,
        course_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Student>> {
        Ok(self.students.get(course_id).cloned().unwrap_or_default())
    }

    async fn fetch_archive(
        &self,
        request: &ArchiveRequest,
        dest: &Path,
        _cancel: &CancellationToken,
    ) -> Result<DownloadedArchive> {
        self.fetch_calls
            .lock()
            .unwrap()
            .push(request.student_id.clone());

        if let Some(delay) = self.delays.get(&request.student_id) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(make) = self.fetch_errors.get(&request.student_id) {
            return Err(make());
        }

        let bytes = self
            .archives
            .get(&request.student_id)
            .cloned()
            .unwrap_or_default();
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;

        Ok(DownloadedArchive {
            path: dest.to_path_buf(),
            size: bytes.len() as u64,
            sha256: format!("{:x}", Sha256::digest(&bytes)),
        })
    }
}
