//! Worker loop: pull a job, fetch, extract, report.

use super::StudentJob;
use crate::api::CourseSource;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::extraction::{ExcludeRules, extract_archive};
use crate::manifest::StudentRecord;
use crate::types::{ArchiveType, Event, ExtractionStatus, ProcessingState, StudentKey};
use crate::utils::find_entry_page;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State shared by every worker of one run
pub(super) struct WorkerContext {
    pub(super) config: Arc<Config>,
    pub(super) source: Arc<dyn CourseSource>,
    pub(super) rules: ExcludeRules,
    pub(super) queue: Mutex<VecDeque<StudentJob>>,
    pub(super) results: mpsc::Sender<StudentRecord>,
    pub(super) event_tx: broadcast::Sender<Event>,
    pub(super) cancel: CancellationToken,
    pub(super) fatal: Mutex<Option<Error>>,
}

impl WorkerContext {
    /// Keep the first fatal error and cancel the run
    pub(super) async fn record_fatal(&self, error: Error) {
        let mut fatal = self.fatal.lock().await;
        if fatal.is_none() {
            *fatal = Some(error);
        }
        self.cancel.cancel();
    }

    async fn next_job(&self) -> Option<StudentJob> {
        self.queue.lock().await.pop_front()
    }
}

pub(super) struct Worker {
    id: usize,
    ctx: Arc<WorkerContext>,
}

impl Worker {
    pub(super) fn new(id: usize, ctx: Arc<WorkerContext>) -> Self {
        Self { id, ctx }
    }

    /// Process jobs until the queue is empty or the run is cancelled
    pub(super) async fn run(self) {
        debug!(worker = self.id, "worker started");
        let mut processed = 0usize;

        while !self.ctx.cancel.is_cancelled() {
            let Some(job) = self.ctx.next_job().await else {
                break;
            };

            match self.process(&job).await {
                Ok(record) => {
                    processed += 1;
                    if self.ctx.results.send(record).await.is_err() {
                        warn!(worker = self.id, "manifest builder gone, stopping worker");
                        break;
                    }
                }
                Err(Error::Cancelled) => break,
                Err(e) => {
                    warn!(worker = self.id, key = %job.key, error = %e, "fatal error, cancelling run");
                    self.ctx.record_fatal(e).await;
                    break;
                }
            }
        }

        debug!(worker = self.id, processed, "worker finished");
    }

    /// Drive one student through the state machine
    ///
    /// Returns the student's record (successful or failed). `Err` is reserved
    /// for errors that must abort the whole run.
    async fn process(&self, job: &StudentJob) -> Result<StudentRecord> {
        let config = &self.ctx.config;
        let mut record = initial_record(job);
        let mut state = ProcessingState::Discovered;
        self.emit_state(&job.key, state);

        state = self.advance(&job.key, state, ProcessingState::Downloading)?;
        let archive_path = config
            .temp_dir()
            .join(&job.key.section)
            .join(format!("{}.{}", job.slug, ArchiveType::TarZstd.extension()));

        let fetched = tokio::select! {
            _ = self.ctx.cancel.cancelled() => Err(Error::Cancelled),
            result = self.ctx.source.fetch_archive(&job.request, &archive_path, &self.ctx.cancel) => result,
        };
        let archive = match fetched {
            Ok(archive) => archive,
            Err(e) if e.is_fatal() => {
                remove_archive(&archive_path).await;
                return Err(e);
            }
            Err(e) => {
                self.advance(&job.key, state, ProcessingState::Failed)?;
                warn!(key = %job.key, code = e.error_code(), error = %e, "download failed");
                remove_archive(&archive_path).await;
                record.fail(&e);
                return Ok(record);
            }
        };
        record.archive_sha256 = Some(archive.sha256.clone());

        state = self.advance(&job.key, state, ProcessingState::Downloaded)?;
        state = self.advance(&job.key, state, ProcessingState::Extracting)?;

        let dest = config.build_dir.join(&record.local_path);
        let staging = config.staging_dir().join(&record.local_path);
        let extracted = extract_archive(&archive.path, &dest, &staging, &self.ctx.rules).await;
        remove_archive(&archive.path).await;

        match extracted {
            Ok(files) => {
                let project_dir = dest.clone();
                let entry_page = tokio::task::spawn_blocking(move || find_entry_page(&project_dir))
                    .await
                    .unwrap_or(None);
                if entry_page.is_none() {
                    warn!(key = %job.key, "no entry page found in project");
                    record
                        .warnings
                        .push("no index.html found in project".to_string());
                }
                record.files = files;
                record.entry_page = entry_page;
                record.status = ExtractionStatus::Success;
                self.advance(&job.key, state, ProcessingState::Extracted)?;
                info!(key = %job.key, files = record.files.len(), "student extracted");
            }
            Err(e) => {
                self.advance(&job.key, state, ProcessingState::Failed)?;
                warn!(key = %job.key, code = e.error_code(), error = %e, "extraction failed");
                record.fail(&e);
            }
        }

        Ok(record)
    }

    fn advance(
        &self,
        key: &StudentKey,
        from: ProcessingState,
        to: ProcessingState,
    ) -> Result<ProcessingState> {
        let next = from.transition(to)?;
        debug!(%key, %from, to = %next, "state change");
        self.emit_state(key, next);
        Ok(next)
    }

    fn emit_state(&self, key: &StudentKey, state: ProcessingState) {
        let _ = self.ctx.event_tx.send(Event::StateChanged {
            key: key.clone(),
            state,
        });
    }
}

fn initial_record(job: &StudentJob) -> StudentRecord {
    StudentRecord {
        section: job.key.section.clone(),
        student_id: job.key.student_id.clone(),
        full_name: job.full_name.clone(),
        display_name: job.display_name.clone(),
        slug: job.slug.clone(),
        local_path: format!("{}/{}", job.key.section, job.slug),
        files: Vec::new(),
        entry_page: None,
        archive_sha256: None,
        status: ExtractionStatus::Pending,
        error_code: None,
        error: None,
        warnings: Vec::new(),
    }
}

async fn remove_archive(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove downloaded archive");
    }
}
