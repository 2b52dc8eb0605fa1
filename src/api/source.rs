use super::types::{ArchiveRequest, Course, DownloadedArchive, Student};
use crate::error::Result;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Abstraction over the course-hosting API, enabling testability.
///
/// [`CourseApiClient`](super::CourseApiClient) is the production
/// implementation; the pipeline only talks to this trait.
#[async_trait::async_trait]
pub trait CourseSource: Send + Sync {
    /// Obtain (or refresh) credentials; fails with `Error::Authentication`
    /// when they are rejected
    async fn authenticate(&self, cancel: &CancellationToken) -> Result<()>;

    /// Fetch a course with all modules and assignments, hidden ones included
    async fn get_course(&self, course_id: &str, cancel: &CancellationToken) -> Result<Course>;

    /// List the students enrolled in a course
    async fn list_students(
        &self,
        course_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Student>>;

    /// Export one student's assignment and download the archive to `dest`
    async fn fetch_archive(
        &self,
        request: &ArchiveRequest,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadedArchive>;
}
