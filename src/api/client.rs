use super::source::CourseSource;
use super::types::{
    ArchiveRequest, Course, DownloadedArchive, ExportStart, ExportTask, Student, TokenResponse,
};
use crate::config::{Config, Credentials};
use crate::error::{Error, Result};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

const USER_AGENT: &str = concat!("class-showcase/", env!("CARGO_PKG_VERSION"));

/// Token lifetime assumed when the token endpoint does not send `expires_in`
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Wait assumed for a 429 without a usable `Retry-After` header
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Longest response body kept in an error message
const MAX_ERROR_BODY: usize = 300;

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

struct ClientInner {
    http: reqwest::Client,
    download_http: reqwest::Client,
    base_url: Url,
    oauth_url: Url,
    credentials: Credentials,
    token: RwLock<Option<AccessToken>>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    refresh_margin: Duration,
    export_timeout: Duration,
    export_poll: Duration,
}

/// Client for the course-hosting REST API
///
/// Cloning is cheap and every clone shares the same token cache, rate
/// limiter and connection pool, so one handle is created per run and passed
/// to each worker.
#[derive(Clone)]
pub struct CourseApiClient {
    inner: Arc<ClientInner>,
}

impl CourseApiClient {
    /// Create a client from configuration and credentials
    ///
    /// No network activity happens until the first request.
    pub fn new(config: &Config, credentials: Credentials) -> Result<Self> {
        let http = build_http_client(config.timeouts.api)?;
        let download_http = build_http_client(config.timeouts.download)?;

        let base_url = Url::parse(&config.api.base_url)
            .map_err(|e| Error::config("api.base_url", format!("invalid URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::config("api.base_url", "URL cannot hold a path"));
        }
        let oauth_url = Url::parse(&config.api.oauth_url)
            .map_err(|e| Error::config("api.oauth_url", format!("invalid URL: {}", e)))?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                download_http,
                base_url,
                oauth_url,
                credentials,
                token: RwLock::new(None),
                limiter: RateLimiter::new(&config.rate_limit),
                retry: RetryPolicy::new(&config.retry),
                refresh_margin: config.api.token_refresh_margin,
                export_timeout: config.timeouts.export,
                export_poll: config.timeouts.export_poll,
            }),
        })
    }

    /// Fetch a course including hidden assignments
    pub async fn get_course(&self, course_id: &str, cancel: &CancellationToken) -> Result<Course> {
        let mut url = self.endpoint_url(&["courses", course_id])?;
        url.query_pairs_mut()
            .append_pair("withHiddenAssignments", "true");
        debug!(course_id, "fetching course");
        self.get_json(url, "GET courses/{course}", cancel).await
    }

    /// List the students of a course
    pub async fn list_students(
        &self,
        course_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Student>> {
        let url = self.endpoint_url(&["courses", course_id, "students"])?;
        debug!(course_id, "listing students");
        self.get_json(url, "GET courses/{course}/students", cancel)
            .await
    }

    /// Ask the API to package a student's assignment; returns the task URI
    pub async fn start_export(
        &self,
        request: &ArchiveRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let url = self.endpoint_url(&[
            "courses",
            &request.course_id,
            "assignments",
            &request.assignment_id,
            "students",
            &request.student_id,
            "download",
        ])?;
        let endpoint = "GET courses/{course}/assignments/{assignment}/students/{student}/download";
        let start: ExportStart = self.get_json(url, endpoint, cancel).await?;

        start
            .task_uri
            .filter(|uri| !uri.trim().is_empty())
            .ok_or_else(|| Error::MalformedResponse {
                endpoint: endpoint.to_string(),
                reason: "response has no taskUri".to_string(),
            })
    }

    /// Poll an export task until it completes; returns the archive URL
    ///
    /// Gives up with [`Error::ExportTimeout`] after the configured export
    /// timeout. A task that reports an error fails with [`Error::ExportFailed`].
    pub async fn wait_for_export(
        &self,
        task_uri: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let url = self.task_url(task_uri)?;
        let started = Instant::now();

        loop {
            let task: ExportTask = self.get_json(url.clone(), "GET export task", cancel).await?;

            if task.done {
                if let Some(error) = task.error.as_ref().filter(|e| reports_error(e)) {
                    return Err(Error::ExportFailed(describe_error(error)));
                }
                return task
                    .url
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| Error::MalformedResponse {
                        endpoint: "GET export task".to_string(),
                        reason: "completed task has no url".to_string(),
                    });
            }

            let waited = started.elapsed();
            if waited >= self.inner.export_timeout {
                return Err(Error::ExportTimeout {
                    task: task_uri.to_string(),
                    waited,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.inner.export_poll) => {}
            }
        }
    }

    /// Stream an archive to `dest`, hashing it on the way
    ///
    /// The archive host needs no authentication. A partially written file is
    /// removed when the download ultimately fails.
    pub async fn download_archive(
        &self,
        archive_url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadedArchive> {
        let url = Url::parse(archive_url).map_err(|e| Error::MalformedResponse {
            endpoint: "GET export task".to_string(),
            reason: format!("invalid archive url: {}", e),
        })?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let result = self
            .inner
            .retry
            .run(cancel, "archive download", || self.download_once(&url, dest))
            .await;

        if result.is_err()
            && let Err(e) = tokio::fs::remove_file(dest).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %dest.display(), error = %e, "failed to remove partial archive");
        }
        result
    }

    async fn download_once(&self, url: &Url, dest: &Path) -> Result<DownloadedArchive> {
        // Archive URLs are pre-signed; keep them out of error messages
        let response = self
            .inner
            .download_http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Network(e.without_url()))?;
        let mut response = check_status(response).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Network(e.without_url()))?
        {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;

        let sha256 = format!("{:x}", hasher.finalize());
        debug!(path = %dest.display(), size, %sha256, "archive downloaded");

        Ok(DownloadedArchive {
            path: dest.to_path_buf(),
            size,
            sha256,
        })
    }

    /// GET a JSON document through the rate limiter and retry policy
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.inner
            .retry
            .run(cancel, endpoint, || self.get_json_once(&url, endpoint))
            .await
    }

    async fn get_json_once<T: DeserializeOwned>(&self, url: &Url, endpoint: &str) -> Result<T> {
        self.inner.limiter.acquire().await;
        let token = self.bearer().await?;
        let mut response = self
            .inner
            .http
            .get(url.clone())
            .bearer_auth(&token)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(endpoint, "API rejected access token, re-authenticating");
            self.invalidate_token(&token).await;
            let token = self.bearer().await?;

            self.inner.limiter.acquire().await;
            response = self
                .inner
                .http
                .get(url.clone())
                .bearer_auth(&token)
                .send()
                .await?;

            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(Error::Authentication(format!(
                    "API rejected a freshly issued token for {}",
                    endpoint
                )));
            }
        }

        let response = check_status(response).await?;
        decode(response, endpoint).await
    }

    /// Current access token, requesting a new one when missing or about to expire
    async fn bearer(&self) -> Result<String> {
        {
            let guard = self.inner.token.read().await;
            if let Some(token) = guard.as_ref()
                && Instant::now() < token.refresh_at
            {
                return Ok(token.value.clone());
            }
        }

        let mut guard = self.inner.token.write().await;
        // Another worker may have refreshed while we waited for the lock
        if let Some(token) = guard.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }
        if guard.is_some() {
            info!("access token about to expire, refreshing");
        }

        let token = self.request_token().await?;
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    async fn invalidate_token(&self, stale: &str) {
        let mut guard = self.inner.token.write().await;
        if guard.as_ref().is_some_and(|t| t.value == stale) {
            *guard = None;
        }
    }

    async fn request_token(&self) -> Result<AccessToken> {
        let mut url = self.inner.oauth_url.clone();
        url.query_pairs_mut()
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.inner.credentials.client_id)
            .append_pair("client_secret", &self.inner.credentials.client_secret);

        // The URL carries the client secret; never let it reach an error message
        let response = self
            .inner
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(e.without_url()))?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(Error::Authentication(format!(
                "token endpoint rejected the client credentials (HTTP {})",
                status.as_u16()
            )));
        }
        let response = check_status(response).await?;
        let token: TokenResponse = decode(response, "GET oauth token").await?;
        if token.access_token.is_empty() {
            return Err(Error::MalformedResponse {
                endpoint: "GET oauth token".to_string(),
                reason: "empty access_token".to_string(),
            });
        }

        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        info!(lifetime_secs = lifetime.as_secs(), "authenticated with course API");

        Ok(AccessToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(self.inner.refresh_margin),
        })
    }

    fn endpoint_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::config("api.base_url", "URL cannot hold a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Resolve a task URI, which may be absolute or relative to the API base
    fn task_url(&self, task_uri: &str) -> Result<Url> {
        match Url::parse(task_uri) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let mut base = self.inner.base_url.clone();
                if !base.path().ends_with('/') {
                    let path = format!("{}/", base.path());
                    base.set_path(&path);
                }
                base.join(task_uri.trim_start_matches('/'))
                    .map_err(|e| Error::MalformedResponse {
                        endpoint: "GET export task".to_string(),
                        reason: format!("invalid taskUri {}: {}", task_uri, e),
                    })
            }
            Err(e) => Err(Error::MalformedResponse {
                endpoint: "GET export task".to_string(),
                reason: format!("invalid taskUri {}: {}", task_uri, e),
            }),
        }
    }
}

#[async_trait::async_trait]
impl CourseSource for CourseApiClient {
    async fn authenticate(&self, cancel: &CancellationToken) -> Result<()> {
        self.inner
            .retry
            .run(cancel, "authenticate", || async {
                self.bearer().await.map(|_| ())
            })
            .await
    }

    async fn get_course(&self, course_id: &str, cancel: &CancellationToken) -> Result<Course> {
        CourseApiClient::get_course(self, course_id, cancel).await
    }

    async fn list_students(
        &self,
        course_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Student>> {
        CourseApiClient::list_students(self, course_id, cancel).await
    }

    async fn fetch_archive(
        &self,
        request: &ArchiveRequest,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadedArchive> {
        let task_uri = self.start_export(request, cancel).await?;
        debug!(student_id = %request.student_id, %task_uri, "export started");
        let archive_url = self.wait_for_export(&task_uri, cancel).await?;
        self.download_archive(&archive_url, dest, cancel).await
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))
}

/// Map non-success statuses to errors, honouring `Retry-After` on 429
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        warn!(retry_after_secs = retry_after.as_secs(), "API rate limit hit");
        return Err(Error::RateLimited { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("unknown status").to_string()
    } else {
        body.trim().chars().take(MAX_ERROR_BODY).collect()
    };
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response, endpoint: &str) -> Result<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| Error::MalformedResponse {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}

/// Export tasks report `"error": null`/`false` when everything went fine
fn reports_error(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

fn describe_error(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
