//! Publishing the built site to the hosting branch via `ghp-import`

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Upper bound on one `ghp-import` invocation
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(300);

/// Where and how a site is pushed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishRequest {
    /// Git remote URL
    pub remote: String,
    /// Branch served by the hosting provider
    pub branch: String,
    /// Commit message
    pub message: String,
}

impl PublishRequest {
    /// Request for the configured repository and assignment
    pub fn from_config(config: &Config) -> Self {
        Self {
            remote: config.github.remote_url(),
            branch: config.github.branch.clone(),
            message: format!(
                "{}: publish {} projects",
                config.school_year, config.assignment_name
            ),
        }
    }
}

/// Pushes a site directory to static hosting
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `site_dir` as described by `request`
    async fn publish(&self, site_dir: &Path, request: &PublishRequest) -> Result<()>;

    /// Get the name of this publisher
    fn name(&self) -> &'static str;
}

/// Publisher backed by the external `ghp-import` binary
///
/// # Examples
///
/// ```no_run
/// use class_showcase::site::{GhpImportPublisher, PublishRequest, Publisher};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let publisher = GhpImportPublisher::from_path()?;
/// let request = PublishRequest {
///     remote: "https://github.com/example/about-me.git".to_string(),
///     branch: "gh-pages".to_string(),
///     message: "25-26: publish About Me projects".to_string(),
/// };
/// publisher.publish(Path::new("site"), &request).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct GhpImportPublisher {
    binary_path: PathBuf,
    timeout: Duration,
}

impl GhpImportPublisher {
    /// Create a publisher with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            timeout: PUBLISH_TIMEOUT,
        }
    }

    /// Locate `ghp-import` in PATH
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExternalTool`] when the binary cannot be found.
    pub fn from_path() -> Result<Self> {
        which::which("ghp-import").map(Self::new).map_err(|_| {
            Error::ExternalTool(
                "ghp-import not found in PATH (install it with `pip install ghp-import`)"
                    .to_string(),
            )
        })
    }

    /// Override the invocation timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command-line arguments for one invocation
    fn args(site_dir: &Path, request: &PublishRequest) -> Vec<OsString> {
        vec![
            "-n".into(), // write .nojekyll
            "-p".into(), // push after committing
            "-f".into(), // force push
            "-r".into(),
            request.remote.clone().into(),
            "-b".into(),
            request.branch.clone().into(),
            "-m".into(),
            request.message.clone().into(),
            site_dir.as_os_str().to_os_string(),
        ]
    }
}

#[async_trait]
impl Publisher for GhpImportPublisher {
    async fn publish(&self, site_dir: &Path, request: &PublishRequest) -> Result<()> {
        let args = Self::args(site_dir, request);
        debug!(binary = %self.binary_path.display(), ?args, "running ghp-import");

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.binary_path)
                .args(&args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            Error::ExternalTool(format!("ghp-import timed out after {:?}", self.timeout))
        })?
        .map_err(|e| Error::ExternalTool(format!("Failed to execute ghp-import: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExternalTool(format!(
                "ghp-import exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ghp-import"
    }
}

/// Publish the configured site directory
///
/// # Errors
///
/// - [`Error::Config`] when the site has not been built
/// - whatever the publisher reports on failure
pub async fn publish_site(config: &Config, publisher: &dyn Publisher) -> Result<()> {
    let index = config.site_dir.join("index.html");
    if !tokio::fs::try_exists(&index).await.unwrap_or(false) {
        return Err(Error::config(
            "site_dir",
            format!(
                "site not found at {}; run build first",
                config.site_dir.display()
            ),
        ));
    }

    let request = PublishRequest::from_config(config);
    info!(
        publisher = publisher.name(),
        remote = %request.remote,
        branch = %request.branch,
        "publishing site"
    );
    publisher.publish(&config.site_dir, &request).await?;
    info!(url = %config.pages_base_url(), "site published");
    Ok(())
}
