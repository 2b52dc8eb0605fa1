//! Downstream stages: build the static site, publish it, validate the deployment
//!
//! All three read `manifest.json` written by the download stage and never
//! talk to the course API. Only display names and slugs reach the output.

mod builder;
mod publish;
mod validate;

pub use builder::{SiteSummary, build_from_manifest, build_site};
pub use publish::{GhpImportPublisher, PUBLISH_TIMEOUT, PublishRequest, Publisher, publish_site};
pub use validate::{LinkCheck, LinkStatus, SiteValidator, ValidationReport, validate_site};
