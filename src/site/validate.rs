//! Link validation against the deployed site

use super::builder::entry_file;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::manifest::{Manifest, StudentRecord};
use crate::retry::RetryPolicy;
use crate::utils::write_atomic;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Attempts made while waiting for the site root to come up
const DEPLOYMENT_ATTEMPTS: u32 = 10;

/// Outcome of one student's link check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Page answered 2xx/3xx
    Pass,
    /// Page missing or erroring
    Fail,
    /// No entry page to check
    MissingEntry,
}

/// One row of the validation report
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCheck {
    /// Display name (never the full name)
    pub student: String,
    /// Section identifier
    pub section: String,
    /// Outcome
    pub status: LinkStatus,
    /// URL checked, if any
    pub url: Option<String>,
    /// HTTP status received
    pub http_status: Option<u16>,
    /// Failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Written to `<site_dir>/reports/validation_report.json`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// When the checks ran
    pub generated_at: DateTime<Utc>,
    /// Site root that was checked
    pub base_url: String,
    /// Whether the site root answered 200 before link checks started
    pub deployed: bool,
    /// Students checked
    pub total: usize,
    /// Links that answered 2xx/3xx
    pub passed: usize,
    /// Links that did not
    pub failed: usize,
    /// Students without a page to check
    pub missing_entry: usize,
    /// Per-student results, in manifest order
    pub details: Vec<LinkCheck>,
}

impl ValidationReport {
    fn new(base_url: String, deployed: bool, details: Vec<LinkCheck>) -> Self {
        let count = |status: LinkStatus| details.iter().filter(|c| c.status == status).count();
        Self {
            generated_at: Utc::now(),
            base_url,
            deployed,
            total: details.len(),
            passed: count(LinkStatus::Pass),
            failed: count(LinkStatus::Fail),
            missing_entry: count(LinkStatus::MissingEntry),
            details,
        }
    }

    /// Whether every student has a working page
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }

    /// Human-readable summary
    pub fn summary_text(&self) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "Validation report for {}", self.base_url);
        let _ = writeln!(text, "Generated: {}", self.generated_at.to_rfc3339());
        if !self.deployed {
            let _ = writeln!(text, "WARNING: site root never answered 200");
        }
        let _ = writeln!(text);
        let _ = writeln!(text, "Total:         {}", self.total);
        let _ = writeln!(text, "Passed:        {}", self.passed);
        let _ = writeln!(text, "Failed:        {}", self.failed);
        let _ = writeln!(text, "Missing entry: {}", self.missing_entry);

        let problems: Vec<_> = self
            .details
            .iter()
            .filter(|c| c.status != LinkStatus::Pass)
            .collect();
        if !problems.is_empty() {
            let _ = writeln!(text, "\nProblems:");
            for check in problems {
                let _ = writeln!(
                    text,
                    "  [{}] {} ({}): {}",
                    check.section,
                    check.student,
                    check.url.as_deref().unwrap_or("no url"),
                    check.message.as_deref().unwrap_or("failed")
                );
            }
        }
        text
    }

    /// Write the JSON report and the text summary into `reports_dir`
    pub async fn save(&self, reports_dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&reports_dir.join("validation_report.json"), &json).await?;
        write_atomic(
            &reports_dir.join("validation_report.txt"),
            self.summary_text().as_bytes(),
        )
        .await
    }
}

/// HEADs the deployed page of every student in a manifest
#[derive(Clone, Debug)]
pub struct SiteValidator {
    http: reqwest::Client,
    base_url: Url,
    deploy_retry: RetryPolicy,
    link_retry: RetryPolicy,
    concurrency: usize,
}

impl SiteValidator {
    /// Create a validator for the configured pages URL
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the pages URL is invalid.
    pub fn new(config: &Config) -> Result<Self> {
        let base = config.pages_base_url();
        let base_url = Url::parse(&base).map_err(|e| {
            Error::config("pages_base_url", format!("invalid URL '{}': {}", base, e))
        })?;

        let http = reqwest::Client::builder()
            .timeout(config.timeouts.http)
            .user_agent(concat!("class-showcase/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        // Undeployed sites answer 404; retry everything except cancellation
        let deploy_retry = RetryPolicy::new(&config.retry)
            .with_max_attempts(DEPLOYMENT_ATTEMPTS)
            .with_predicate(|e| !matches!(e, Error::Cancelled));

        Ok(Self {
            http,
            base_url,
            deploy_retry,
            link_retry: RetryPolicy::new(&config.retry),
            concurrency: config.max_concurrency.max(1),
        })
    }

    /// URL of a student's entry page: `<base>/<section>/<slug>/<file>`
    pub fn page_url(&self, record: &StudentRecord) -> Option<Url> {
        let file = entry_file(record)?;
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend([record.section.as_str(), record.slug.as_str(), file]);
        Some(url)
    }

    /// Wait until the site root answers 200
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransientFailureExhausted`] when the site never came
    /// up, or [`Error::Cancelled`].
    pub async fn wait_for_deployment(&self, cancel: &CancellationToken) -> Result<()> {
        info!(url = %self.base_url, "waiting for deployment");
        self.deploy_retry
            .run(cancel, "wait for deployment", || async {
                let status = self.head(self.base_url.clone()).await?;
                if status == 200 {
                    Ok(())
                } else {
                    Err(Error::Api {
                        status,
                        message: format!("site root answered HTTP {}", status),
                    })
                }
            })
            .await
    }

    /// Wait for the deployment, then check every student's page
    ///
    /// A site that never comes up is recorded in the report rather than
    /// returned as an error; only cancellation aborts.
    pub async fn validate(
        &self,
        manifest: &Manifest,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport> {
        let deployed = match self.wait_for_deployment(cancel).await {
            Ok(()) => true,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!(error = %e, "site root not reachable, checking links anyway");
                false
            }
        };

        let details: Vec<LinkCheck> = futures::stream::iter(&manifest.students)
            .map(|record| self.check_record(record, cancel))
            .buffered(self.concurrency)
            .collect()
            .await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let report = ValidationReport::new(self.base_url.to_string(), deployed, details);
        info!(
            total = report.total,
            passed = report.passed,
            failed = report.failed,
            missing_entry = report.missing_entry,
            "validation complete"
        );
        Ok(report)
    }

    async fn check_record(&self, record: &StudentRecord, cancel: &CancellationToken) -> LinkCheck {
        let mut check = LinkCheck {
            student: record.display_name.clone(),
            section: record.section.clone(),
            status: LinkStatus::MissingEntry,
            url: None,
            http_status: None,
            message: None,
        };

        // Only the stable code; raw error text can carry API response bodies
        if !record.is_success() {
            check.message = Some(match &record.error_code {
                Some(code) => format!("project was not downloaded ({})", code),
                None => "project was not downloaded".to_string(),
            });
            return check;
        }
        let Some(url) = self.page_url(record) else {
            check.message = Some("no entry page in project".to_string());
            return check;
        };
        check.url = Some(url.to_string());

        // 5xx and timeouts are retried; 4xx is an answer
        let checked = self
            .link_retry
            .run(cancel, "link check", || async {
                let status = self.head(url.clone()).await?;
                if status >= 500 {
                    Err(Error::Api {
                        status,
                        message: format!("HTTP {}", status),
                    })
                } else {
                    Ok(status)
                }
            })
            .await;

        match checked {
            Ok(status) if (200..400).contains(&status) => {
                debug!(section = %record.section, student = %record.display_name, status, "link ok");
                check.status = LinkStatus::Pass;
                check.http_status = Some(status);
            }
            Ok(status) => {
                warn!(section = %record.section, student = %record.display_name, status, "link broken");
                check.status = LinkStatus::Fail;
                check.http_status = Some(status);
                check.message = Some(format!("HTTP {}", status));
            }
            Err(e) => {
                warn!(section = %record.section, student = %record.display_name, error = %e, "link check failed");
                check.status = LinkStatus::Fail;
                check.http_status = last_status(&e);
                check.message = Some(e.to_string());
            }
        }
        check
    }

    async fn head(&self, url: Url) -> Result<u16> {
        let response = self.http.head(url).send().await?;
        Ok(response.status().as_u16())
    }
}

/// HTTP status carried by an error, looking through retry exhaustion
fn last_status(error: &Error) -> Option<u16> {
    match error {
        Error::Api { status, .. } => Some(*status),
        Error::TransientFailureExhausted { last, .. } => last_status(last),
        _ => None,
    }
}

/// Validate the deployed site for the current manifest and write the reports
///
/// # Errors
///
/// - [`Error::Config`] when no manifest exists or the pages URL is invalid
/// - [`Error::Cancelled`]
pub async fn validate_site(
    config: &Config,
    cancel: &CancellationToken,
) -> Result<ValidationReport> {
    let manifest = Manifest::load(&config.manifest_path()).await?;
    let validator = SiteValidator::new(config)?;
    let report = validator.validate(&manifest, cancel).await?;

    let reports_dir = config.site_dir.join("reports");
    report.save(&reports_dir).await?;
    info!(path = %reports_dir.display(), "validation report written");
    Ok(report)
}
