//! class-showcase command line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use class_showcase::api::CourseApiClient;
use class_showcase::site::{self, GhpImportPublisher};
use class_showcase::{Config, Credentials, Pipeline, cancel_on_signal, logging};

#[derive(Parser)]
#[command(
    name = "class-showcase",
    about = "Download student projects from the course API and publish them as a static site",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/showcase.toml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Export, download and extract every student's project, then write the manifest.
    Download,
    /// Build the static site from the manifest.
    Build,
    /// Push the built site to the hosting branch with ghp-import.
    Publish,
    /// Check every student's page on the deployed site.
    Validate,
    /// Run download, build, publish and validate in order.
    All,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Arc::new(
        Config::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?,
    );

    let level = if cli.verbose { "debug" } else { cli.log_level.as_str() };
    let _log_guard = logging::init(level, &config.logging)?;

    let cancel = CancellationToken::new();
    let watcher = cancel_on_signal(cancel.clone());
    let result = run(cli.command, config, cancel.clone()).await;
    watcher.abort();
    result
}

async fn run(
    command: Commands,
    config: Arc<Config>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let all = command == Commands::All;

    if all || command == Commands::Download {
        download(Arc::clone(&config), &cancel).await?;
    }
    if all || command == Commands::Build {
        let summary = site::build_from_manifest(&config).await?;
        info!(projects = summary.projects, sections = summary.sections, "build finished");
    }
    if all || command == Commands::Publish {
        let publisher =
            GhpImportPublisher::from_path()?.with_timeout(config.timeouts.publish);
        site::publish_site(&config, &publisher).await?;
    }
    if all || command == Commands::Validate {
        let report = site::validate_site(&config, &cancel).await?;
        if !report.all_passed() {
            warn!(
                failed = report.failed,
                missing_entry = report.missing_entry,
                "some student pages are not reachable"
            );
        }
    }
    Ok(())
}

async fn download(config: Arc<Config>, cancel: &CancellationToken) -> anyhow::Result<()> {
    let credentials = Credentials::from_env()?;
    let client = CourseApiClient::new(&config, credentials)?;
    let pipeline = Pipeline::new(config, Arc::new(client));

    // Forward shutdown requests to the pipeline's own token
    let run_token = pipeline.cancel_token();
    let forward = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            run_token.cancel();
        })
    };

    let result = pipeline.run().await;
    forward.abort();

    let manifest = result?;
    info!(
        succeeded = manifest.metadata.succeeded,
        failed = manifest.metadata.failed,
        "download finished"
    );
    Ok(())
}
