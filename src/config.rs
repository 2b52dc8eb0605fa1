//! Configuration types for class-showcase

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    time::Duration,
};

/// Environment variable holding the API client identifier
pub const CLIENT_ID_VAR: &str = "CODIO_CLIENT_ID";
/// Environment variable holding the API client secret
pub const CLIENT_SECRET_VAR: &str = "CODIO_CLIENT_SECRET";

/// Main configuration for a publishing run
///
/// Loaded from a TOML document with [`Config::load`]. Relative directories are
/// resolved against [`Config::project_root`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// School year label used in commit messages (e.g. "25-26")
    pub school_year: String,

    /// Title rendered at the top of the index page
    pub site_title: String,

    /// Assignment to export from every section (case-insensitive exact match)
    pub assignment_name: String,

    /// Section identifier → course identifier
    pub sections: BTreeMap<String, String>,

    /// Publishing target
    pub github: GithubConfig,

    /// Base URL of the deployed site (default: `https://<owner>.github.io/<repo>`)
    #[serde(default)]
    pub pages_base_url: Option<String>,

    /// Directory holding extracted projects and the manifest (default: "build")
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,

    /// Directory the site is assembled into (default: "site")
    #[serde(default = "default_site_dir")]
    pub site_dir: PathBuf,

    /// Archive entries matching these patterns are not extracted
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,

    /// Maximum number of students processed at once (default: 8)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Retry policy for network operations
    #[serde(default)]
    pub retry: RetryConfig,

    /// Client-side request throttling
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Network timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Course API endpoints
    #[serde(default)]
    pub api: ApiConfig,

    /// Display-name formatting rules
    #[serde(default)]
    pub display_names: DisplayNameConfig,

    /// Directory holding `index.html.j2` to replace the built-in landing page
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,

    /// Log file output
    #[serde(default)]
    pub logging: LogConfig,

    /// Directory that relative paths are resolved against
    #[serde(skip)]
    pub project_root: PathBuf,
}

impl Config {
    /// Load and validate a configuration file
    ///
    /// The project root is the parent of the directory containing the file,
    /// so `project/config/showcase.toml` resolves `build_dir = "build"` to
    /// `project/build`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                "config",
                format!("cannot read config file {}: {}", path.display(), e),
            )
        })?;
        let mut config = Self::from_toml(&text)?;

        let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.project_root = config_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(config_dir)
            .to_path_buf();
        config.resolve_paths();
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration document without touching the filesystem
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        Ok(config)
    }

    fn resolve_paths(&mut self) {
        if self.build_dir.is_relative() {
            self.build_dir = self.project_root.join(&self.build_dir);
        }
        if self.site_dir.is_relative() {
            self.site_dir = self.project_root.join(&self.site_dir);
        }
        self.templates_dir = self.templates_dir.take().map(|dir| {
            if dir.is_relative() {
                self.project_root.join(dir)
            } else {
                dir
            }
        });
        if self.logging.dir.is_relative() {
            self.logging.dir = self.project_root.join(&self.logging.dir);
        }
    }

    /// Check for values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sections.is_empty() {
            return Err(Error::config("sections", "at least one section is required"));
        }
        let empty_course = self
            .sections
            .iter()
            .find(|(_, course)| course.trim().is_empty());
        if let Some((section, _)) = empty_course {
            return Err(Error::config(
                "sections",
                format!("section {} has an empty course id", section),
            ));
        }
        if self.assignment_name.trim().is_empty() {
            return Err(Error::config("assignment_name", "must not be empty"));
        }
        for (key, value) in [
            ("github.owner", &self.github.owner),
            ("github.repo", &self.github.repo),
            ("github.branch", &self.github.branch),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config(key, "must not be empty"));
            }
        }
        if self.max_concurrency == 0 {
            return Err(Error::config("max_concurrency", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        if self.rate_limit.burst == 0 {
            return Err(Error::config("rate_limit.burst", "must be at least 1"));
        }
        if self.rate_limit.window.is_zero() {
            return Err(Error::config("rate_limit.window_secs", "must be positive"));
        }
        Ok(())
    }

    /// Base URL of the deployed site, without trailing slash
    pub fn pages_base_url(&self) -> String {
        match &self.pages_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "https://{}.github.io/{}",
                self.github.owner, self.github.repo
            ),
        }
    }

    /// Path of the manifest written by the download stage
    pub fn manifest_path(&self) -> PathBuf {
        self.build_dir.join("manifest.json")
    }

    /// Directory raw archives are downloaded into
    pub fn temp_dir(&self) -> PathBuf {
        self.build_dir.join(".tmp")
    }

    /// Directory extraction happens in before being moved into place
    pub fn staging_dir(&self) -> PathBuf {
        self.build_dir.join(".staging")
    }
}

/// Static-hosting repository
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Repository owner
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Branch served by the hosting provider (default: "gh-pages")
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl GithubConfig {
    /// HTTPS remote the site is pushed to
    pub fn remote_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.repo)
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 4)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 500 ms)
    #[serde(
        rename = "initial_delay_ms",
        default = "default_initial_delay",
        with = "duration_ms_serde"
    )]
    pub initial_delay: Duration,

    /// Upper bound for a single delay (default: 60 s)
    #[serde(
        rename = "max_delay_ms",
        default = "default_max_delay",
        with = "duration_ms_serde"
    )]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Client-side request throttling matching the API's published limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window (default: 50)
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Window length (default: 10 s)
    #[serde(
        rename = "window_secs",
        default = "default_window",
        with = "duration_serde"
    )]
    pub window: Duration,

    /// Requests allowed per day, `None` for no daily cap (default: 10000)
    #[serde(default = "default_daily_limit")]
    pub daily_limit: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: default_burst(),
            window: default_window(),
            daily_limit: default_daily_limit(),
        }
    }
}

/// Timeouts for the different kinds of network calls
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// API request timeout (default: 30 s)
    #[serde(rename = "api_secs", default = "default_api_timeout", with = "duration_serde")]
    pub api: Duration,

    /// Archive download timeout (default: 120 s)
    #[serde(
        rename = "download_secs",
        default = "default_download_timeout",
        with = "duration_serde"
    )]
    pub download: Duration,

    /// Link validation timeout (default: 20 s)
    #[serde(rename = "http_secs", default = "default_http_timeout", with = "duration_serde")]
    pub http: Duration,

    /// How long an export task may take before we give up (default: 300 s)
    #[serde(
        rename = "export_secs",
        default = "default_export_timeout",
        with = "duration_serde"
    )]
    pub export: Duration,

    /// Interval between export task polls (default: 500 ms)
    #[serde(
        rename = "export_poll_ms",
        default = "default_export_poll",
        with = "duration_ms_serde"
    )]
    pub export_poll: Duration,

    /// How long a `ghp-import` invocation may run (default: 300 s)
    #[serde(
        rename = "publish_secs",
        default = "default_publish_timeout",
        with = "duration_serde"
    )]
    pub publish: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            api: default_api_timeout(),
            download: default_download_timeout(),
            http: default_http_timeout(),
            export: default_export_timeout(),
            export_poll: default_export_poll(),
            publish: default_publish_timeout(),
        }
    }
}

/// Log file output, written next to the stderr log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogConfig {
    /// Write a log file (default: true)
    #[serde(default = "default_true")]
    pub file: bool,

    /// Directory for log files (default: "logs")
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    /// Daily files kept before the oldest is deleted (default: 3)
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: true,
            dir: default_log_dir(),
            max_files: default_max_log_files(),
        }
    }
}

/// Course API endpoints
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// REST base URL
    #[serde(default = "default_api_base")]
    pub base_url: String,

    /// OAuth token endpoint
    #[serde(default = "default_oauth_url")]
    pub oauth_url: String,

    /// Refresh tokens this long before they expire (default: 300 s)
    #[serde(
        rename = "token_refresh_margin_secs",
        default = "default_token_margin",
        with = "duration_serde"
    )]
    pub token_refresh_margin: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base(),
            oauth_url: default_oauth_url(),
            token_refresh_margin: default_token_margin(),
        }
    }
}

/// Display-name formatting rules
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DisplayNameConfig {
    /// First name → preferred first name (e.g. "Alexander" → "Alex")
    #[serde(default)]
    pub preferred: HashMap<String, String>,

    /// Exact full name → display name, applied before any other rule
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

/// API credentials, read from the environment only
#[derive(Clone)]
pub struct Credentials {
    /// OAuth client identifier
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
}

impl Credentials {
    /// Read credentials from [`CLIENT_ID_VAR`] and [`CLIENT_SECRET_VAR`]
    pub fn from_env() -> Result<Self> {
        let read = |var: &str| {
            std::env::var(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    Error::config(var, format!("environment variable {} must be set", var))
                })
        };
        Ok(Self {
            client_id: read(CLIENT_ID_VAR)?,
            client_secret: read(CLIENT_SECRET_VAR)?,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_site_dir() -> PathBuf {
    PathBuf::from("site")
}

fn default_exclude_globs() -> Vec<String> {
    vec![".git".into(), ".guides".into(), ".codio".into()]
}

fn default_max_concurrency() -> usize {
    8
}

fn default_branch() -> String {
    "gh-pages".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_burst() -> u32 {
    50
}

fn default_window() -> Duration {
    Duration::from_secs(10)
}

fn default_daily_limit() -> Option<u32> {
    Some(10_000)
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_export_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_export_poll() -> Duration {
    Duration::from_millis(500)
}

fn default_publish_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_max_log_files() -> usize {
    3
}

fn default_api_base() -> String {
    "https://octopus.codio.com/api/v1".to_string()
}

fn default_oauth_url() -> String {
    "https://oauth.codio.com/api/v1/token".to_string()
}

fn default_token_margin() -> Duration {
    Duration::from_secs(300)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
