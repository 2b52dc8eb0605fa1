//! Error types for class-showcase
//!
//! This module provides error handling for the whole pipeline, including:
//! - The failure taxonomy of a download run (fatal, per-section, per-student)
//! - Stable machine-readable error codes stored in the manifest
//! - Context information (section, archive path, HTTP status, etc.)

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for class-showcase operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for class-showcase
///
/// Variants are grouped by how far they propagate:
/// - fatal ([`Error::Authentication`], [`Error::Config`], [`Error::Cancelled`],
///   [`Error::NoSectionsSucceeded`]) abort the run,
/// - [`Error::AssignmentNotFound`] skips one section,
/// - everything else raised while processing a student is recorded in that
///   student's manifest entry.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "sections")
        key: Option<String>,
    },

    /// Credentials were rejected or could not be refreshed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The named assignment does not exist in a section's course
    #[error("assignment '{assignment}' not found in section {section}")]
    AssignmentNotFound {
        /// Section identifier (e.g. "7-1")
        section: String,
        /// Assignment name that was searched for
        assignment: String,
    },

    /// A transient failure kept happening until the retry budget ran out
    #[error("gave up after {attempts} attempts: {last}")]
    TransientFailureExhausted {
        /// Number of attempts made (including the first)
        attempts: u32,
        /// The error returned by the final attempt
        last: Box<Error>,
    },

    /// Archive could not be decoded or unpacked
    #[error("archive {archive} is corrupt: {reason}")]
    ArchiveCorrupt {
        /// Path of the archive that failed
        archive: PathBuf,
        /// Reason reported by the decoder
        reason: String,
    },

    /// The API answered with an unexpected HTTP status
    #[error("API returned HTTP {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// The API asked us to slow down (HTTP 429)
    #[error("rate limited by API, retry after {retry_after:?}")]
    RateLimited {
        /// Delay requested by the server's Retry-After header
        retry_after: Duration,
    },

    /// A response body could not be decoded into the expected shape
    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse {
        /// Endpoint path that produced the response
        endpoint: String,
        /// Decoder error
        reason: String,
    },

    /// The export task finished with an error
    #[error("export task failed: {0}")]
    ExportFailed(String),

    /// The export task did not finish in time
    #[error("export task {task} did not complete within {waited:?}")]
    ExportTimeout {
        /// Task URI being polled
        task: String,
        /// How long we waited
        waited: Duration,
    },

    /// Every configured section was skipped or failed
    #[error("no section could be processed ({skipped} skipped)")]
    NoSectionsSucceeded {
        /// Number of sections that were skipped
        skipped: usize,
    },

    /// A student's processing state attempted an illegal transition
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// State being left
        from: String,
        /// State requested
        to: String,
    },

    /// External tool execution failed (ghp-import)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// The run was cancelled (signal or fatal error in a sibling task)
    #[error("run cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file could not be parsed
    #[error("invalid configuration file: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Returns true if this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Authentication(_)
            | Error::Config { .. }
            | Error::TomlParse(_)
            | Error::Cancelled
            | Error::NoSectionsSucceeded { .. } => true,
            Error::TransientFailureExhausted { last, .. } => last.is_fatal(),
            _ => false,
        }
    }

    /// Machine-readable error code, stored in failed manifest entries
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Authentication(_) => "authentication_error",
            Error::AssignmentNotFound { .. } => "assignment_not_found",
            Error::TransientFailureExhausted { .. } => "transient_failure_exhausted",
            Error::ArchiveCorrupt { .. } => "archive_corrupt",
            Error::Api { .. } => "api_error",
            Error::RateLimited { .. } => "rate_limited",
            Error::MalformedResponse { .. } => "malformed_response",
            Error::ExportFailed(_) => "export_failed",
            Error::ExportTimeout { .. } => "export_timeout",
            Error::NoSectionsSucceeded { .. } => "no_sections_succeeded",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::ExternalTool(_) => "external_tool_error",
            Error::Cancelled => "cancelled",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::TomlParse(_) => "config_error",
            Error::Other(_) => "internal_error",
        }
    }
}
