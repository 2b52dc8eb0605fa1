//! Download pipeline: discovery, bounded worker pool, manifest aggregation
//!
//! A run authenticates once, discovers every configured section (course →
//! assignment → students), then drains a shared job queue with
//! `min(max_concurrency, jobs)` workers. Each job is fetch → extract → report
//! and is independent of every other job; outcomes flow over an `mpsc`
//! channel to the single [`ManifestBuilder`] task.
//!
//! Failure handling:
//! - per-student errors become failed manifest entries,
//! - a section whose discovery fails is skipped and noted in the summary,
//! - fatal errors (authentication, cancellation) cancel the run token, remove
//!   staging directories and return without writing a manifest.

mod worker;


use crate::api::{ArchiveRequest, CourseSource};
use crate::config::Config;
use crate::display_name::assign_section_names;
use crate::error::{Error, Result};
use crate::extraction::{ExcludeRules, remove_dir_if_exists};
use crate::manifest::{Manifest, ManifestBuilder, SectionSummary};
use crate::types::{Event, StudentKey};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use worker::{Worker, WorkerContext};

/// Capacity of the progress event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// One unit of work: export, download and extract a single student
#[derive(Clone, Debug)]
pub(crate) struct StudentJob {
    pub(crate) key: StudentKey,
    pub(crate) request: ArchiveRequest,
    pub(crate) full_name: String,
    pub(crate) display_name: String,
    pub(crate) slug: String,
}

/// Orchestrates one download run
pub struct Pipeline {
    config: Arc<Config>,
    source: Arc<dyn CourseSource>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Create a pipeline over any [`CourseSource`]
    pub fn new(config: Arc<Config>, source: Arc<dyn CourseSource>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            source,
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that cancels the whole run when triggered
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run discovery and the worker pool, then write the manifest
    ///
    /// Returns the written manifest. Per-student failures are recorded in it
    /// and do not make the run fail.
    ///
    /// # Errors
    /// - [`Error::Config`] for invalid exclusion patterns
    /// - [`Error::Authentication`] when credentials are rejected at any point
    /// - [`Error::NoSectionsSucceeded`] when every section was skipped
    /// - [`Error::Cancelled`] when the run token was cancelled
    pub async fn run(&self) -> Result<Manifest> {
        let rules = ExcludeRules::new(&self.config.exclude_globs)?;

        info!(
            assignment = %self.config.assignment_name,
            sections = self.config.sections.len(),
            "starting download run"
        );
        self.source.authenticate(&self.cancel).await?;

        let mut builder = ManifestBuilder::new();
        let jobs = self.discover(&mut builder).await?;

        let (tx, rx) = mpsc::channel(self.config.max_concurrency.max(1) * 2);
        let consumer = tokio::spawn(builder.consume(rx));

        let fatal = self.run_workers(jobs, rules, tx).await;
        let builder = consumer
            .await
            .map_err(|e| Error::Other(format!("manifest builder task failed: {}", e)))?;

        if let Some(e) = fatal {
            error!(error = %e, "run aborted, manifest not written");
            self.discard_partial_output().await;
            return Err(e);
        }
        if self.cancel.is_cancelled() {
            warn!("run cancelled, manifest not written");
            self.discard_partial_output().await;
            return Err(Error::Cancelled);
        }

        let manifest = builder.finish(&self.config);
        manifest.save(&self.config.manifest_path()).await?;
        let _ = self.event_tx.send(Event::ManifestWritten {
            succeeded: manifest.metadata.succeeded,
            failed: manifest.metadata.failed,
        });
        log_summary(&manifest);

        if let Err(e) = remove_dir_if_exists(&self.config.temp_dir()).await {
            warn!(error = %e, "failed to remove temporary archive directory");
        }
        Ok(manifest)
    }

    /// List every section; skipped sections are recorded in `builder`
    async fn discover(&self, builder: &mut ManifestBuilder) -> Result<Vec<StudentJob>> {
        let mut jobs: BTreeMap<StudentKey, StudentJob> = BTreeMap::new();
        let mut discovered = 0;
        let mut skipped = 0;

        for (section, course_id) in &self.config.sections {
            match self.discover_section(section, course_id).await {
                Ok(section_jobs) => {
                    discovered += 1;
                    info!(%section, %course_id, students = section_jobs.len(), "section discovered");
                    builder.record_section(SectionSummary {
                        section: section.clone(),
                        course_id: course_id.clone(),
                        discovered: section_jobs.len(),
                        ..SectionSummary::default()
                    });
                    let _ = self.event_tx.send(Event::SectionDiscovered {
                        section: section.clone(),
                        students: section_jobs.len(),
                    });
                    for job in section_jobs {
                        jobs.insert(job.key.clone(), job);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    skipped += 1;
                    warn!(%section, %course_id, error = %e, "skipping section");
                    builder.record_section(SectionSummary {
                        section: section.clone(),
                        course_id: course_id.clone(),
                        skipped: Some(e.to_string()),
                        ..SectionSummary::default()
                    });
                    let _ = self.event_tx.send(Event::SectionSkipped {
                        section: section.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if discovered == 0 {
            return Err(Error::NoSectionsSucceeded { skipped });
        }
        Ok(jobs.into_values().collect())
    }

    async fn discover_section(&self, section: &str, course_id: &str) -> Result<Vec<StudentJob>> {
        let course = self.source.get_course(course_id, &self.cancel).await?;
        let assignment = course
            .find_assignment(&self.config.assignment_name)
            .ok_or_else(|| Error::AssignmentNotFound {
                section: section.to_string(),
                assignment: self.config.assignment_name.clone(),
            })?;

        let students = self.source.list_students(course_id, &self.cancel).await?;
        // The API occasionally lists a student twice; keep the last entry
        let mut by_id = BTreeMap::new();
        for student in students {
            by_id.insert(student.id.clone(), student);
        }

        let pairs: Vec<(String, String)> = by_id
            .values()
            .map(|s| (s.id.clone(), s.name.clone()))
            .collect();
        let mut names = assign_section_names(&pairs, &self.config.display_names);

        let jobs = by_id
            .into_values()
            .filter_map(|student| {
                let assigned = names.remove(&student.id)?;
                Some(StudentJob {
                    key: StudentKey::new(section, &student.id),
                    request: ArchiveRequest {
                        course_id: course_id.to_string(),
                        assignment_id: assignment.id.clone(),
                        student_id: student.id,
                    },
                    full_name: student.name,
                    display_name: assigned.display_name,
                    slug: assigned.slug,
                })
            })
            .collect();
        Ok(jobs)
    }

    /// Drain the job queue with a bounded pool; returns the first fatal error
    async fn run_workers(
        &self,
        jobs: Vec<StudentJob>,
        rules: ExcludeRules,
        tx: mpsc::Sender<crate::manifest::StudentRecord>,
    ) -> Option<Error> {
        let worker_count = self.config.max_concurrency.min(jobs.len());
        info!(jobs = jobs.len(), workers = worker_count, "processing students");

        let ctx = Arc::new(WorkerContext {
            config: Arc::clone(&self.config),
            source: Arc::clone(&self.source),
            rules,
            queue: Mutex::new(VecDeque::from(jobs)),
            results: tx,
            event_tx: self.event_tx.clone(),
            cancel: self.cancel.clone(),
            fatal: Mutex::new(None),
        });

        let handles: Vec<_> = (0..worker_count)
            .map(|id| {
                let worker = Worker::new(id, Arc::clone(&ctx));
                tokio::spawn(worker.run())
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "worker task panicked");
                ctx.record_fatal(Error::Other(format!("worker task panicked: {}", e)))
                    .await;
            }
        }

        ctx.fatal.lock().await.take()
    }

    /// Remove staging and temp directories left behind by an aborted run
    async fn discard_partial_output(&self) {
        for dir in [self.config.staging_dir(), self.config.temp_dir()] {
            if let Err(e) = remove_dir_if_exists(&dir).await {
                warn!(path = %dir.display(), error = %e, "failed to remove partial output");
            }
        }
    }
}

/// Log per-section counts and the reason for every failure
fn log_summary(manifest: &Manifest) {
    for summary in &manifest.metadata.summaries {
        match &summary.skipped {
            Some(reason) => warn!(section = %summary.section, %reason, "section skipped"),
            None => info!(
                section = %summary.section,
                discovered = summary.discovered,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "section summary"
            ),
        }
    }
    for record in manifest.failures() {
        warn!(
            section = %record.section,
            student = %record.display_name,
            code = record.error_code.as_deref().unwrap_or("unknown"),
            reason = record.error.as_deref().unwrap_or(""),
            "student failed"
        );
    }
    info!(
        total = manifest.metadata.total,
        succeeded = manifest.metadata.succeeded,
        failed = manifest.metadata.failed,
        "download run complete"
    );
}
