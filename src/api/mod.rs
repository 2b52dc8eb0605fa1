//! Course-hosting API client
//!
//! Talks to the course API over OAuth client-credentials: fetches courses and
//! their student lists, requests per-student exports of an assignment, polls
//! the export task and streams the resulting archive to disk.
//!
//! Every request goes through the shared [`RateLimiter`](crate::rate_limit::RateLimiter)
//! and the configured [`RetryPolicy`](crate::retry::RetryPolicy). A 401 on an
//! API call triggers exactly one re-authentication; a 401 that persists is an
//! [`Error::Authentication`](crate::Error::Authentication) and aborts the run.

mod client;
mod source;
mod types;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use client::CourseApiClient;
pub use source::CourseSource;
pub use types::{
    ArchiveRequest, Assignment, Course, CourseModule, DownloadedArchive, Student,
};
