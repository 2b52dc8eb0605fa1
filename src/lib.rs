//! # class-showcase
//!
//! Fetches every student's submission for one assignment from a course
//! hosting API, unpacks the projects, and publishes them as a static
//! showcase site that only shows "First L" display names.
//!
//! ## Stages
//!
//! - **download**: authenticate, discover sections and students, export and
//!   extract each project with a bounded worker pool, write `manifest.json`
//! - **build**: copy successful projects into the site directory and render
//!   the landing page
//! - **publish**: push the site to the hosting branch with `ghp-import`
//! - **validate**: check every student's page on the deployed site
//!
//! ## Quick Start
//!
//! ```no_run
//! use class_showcase::api::CourseApiClient;
//! use class_showcase::config::Credentials;
//! use class_showcase::{Config, Pipeline};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::load(Path::new("config/showcase.toml"))?);
//!     let client = CourseApiClient::new(&config, Credentials::from_env()?)?;
//!
//!     let pipeline = Pipeline::new(config.clone(), Arc::new(client));
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let manifest = pipeline.run().await?;
//!     class_showcase::site::build_site(&config, &manifest).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Course API client
pub mod api;
/// Configuration types
pub mod config;
/// Privacy-preserving display names and slugs
pub mod display_name;
/// Error types
pub mod error;
/// Archive extraction
pub mod extraction;
/// Log output
pub mod logging;
/// Run manifest
pub mod manifest;
/// Download pipeline
pub mod pipeline;
/// Client-side request throttling
pub mod rate_limit;
/// Retry logic with exponential backoff
pub mod retry;
/// Site build, publish and validation
pub mod site;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{Config, Credentials};
pub use error::{Error, Result};
pub use manifest::{Manifest, StudentRecord};
pub use pipeline::Pipeline;
pub use types::{Event, ExtractionStatus, ProcessingState, StudentKey};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal
///
/// Returns the handle of the background task waiting for the signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let token = CancellationToken::new();
///     let watcher = class_showcase::cancel_on_signal(token.clone());
///
///     token.cancelled().await;
///     watcher.abort();
/// }
/// ```
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::warn!("shutdown requested, cancelling run");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
