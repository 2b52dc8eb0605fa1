//! Static site assembly from the download manifest

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extraction::remove_dir_if_exists;
use crate::manifest::{Manifest, StudentRecord};
use crate::utils::{copy_dir_all, write_atomic};
use chrono::{DateTime, Utc};
use minijinja::{AutoEscape, Environment, Value, context};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Marker file telling GitHub Pages not to run Jekyll
const NOJEKYLL: &str = ".nojekyll";

/// Outcome of a site build
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SiteSummary {
    /// Projects copied into the site
    pub projects: usize,
    /// Sections with at least one project
    pub sections: usize,
    /// Successful records whose extracted tree was missing on disk
    pub missing: usize,
}

/// One student's card on the landing page
#[derive(Clone, Debug)]
struct SiteEntry {
    section: String,
    display_name: String,
    href: String,
}

/// Final path component of a record's entry page (`about/index.html` → `index.html`)
pub(crate) fn entry_file(record: &StudentRecord) -> Option<&str> {
    record
        .entry_page
        .as_deref()
        .and_then(|page| page.rsplit('/').next())
        .filter(|name| !name.is_empty())
}

/// Directory copied into the site for a record
///
/// Projects whose entry page lives in a subdirectory are published from that
/// subdirectory so the page sits directly under `<section>/<slug>/`.
fn project_source(config: &Config, record: &StudentRecord) -> PathBuf {
    let root = config.build_dir.join(&record.local_path);
    match record.entry_page.as_deref().and_then(|p| p.rsplit_once('/')) {
        Some((dir, _)) if !dir.is_empty() => root.join(dir),
        _ => root,
    }
}

/// Build `<site_dir>` from the manifest
///
/// The site directory is recreated from scratch. Only successful records are
/// published, and only their display name and slug appear in the output.
///
/// # Errors
///
/// Returns an error if the site directory cannot be written, a project tree
/// fails to copy, or the configured landing page template is missing or
/// invalid.
pub async fn build_site(config: &Config, manifest: &Manifest) -> Result<SiteSummary> {
    let site_dir = &config.site_dir;
    info!(site_dir = %site_dir.display(), "building site");
    let template = index_template(config).await?;

    remove_dir_if_exists(site_dir).await?;
    tokio::fs::create_dir_all(site_dir).await?;

    let mut summary = SiteSummary::default();
    let mut entries = Vec::new();

    for record in manifest.successful() {
        let source = project_source(config, record);
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            warn!(
                section = %record.section,
                student = %record.display_name,
                path = %source.display(),
                "extracted project missing, skipping"
            );
            summary.missing += 1;
            continue;
        }

        let dest = site_dir.join(&record.section).join(&record.slug);
        let copied = tokio::task::spawn_blocking(move || copy_dir_all(&source, &dest))
            .await
            .map_err(|e| Error::Other(format!("copy task failed: {}", e)))??;
        debug!(section = %record.section, slug = %record.slug, files = copied, "project copied");

        let href = match entry_file(record) {
            Some(file) => format!("{}/{}/{}", record.section, record.slug, file),
            None => format!("{}/{}/", record.section, record.slug),
        };
        entries.push(SiteEntry {
            section: record.section.clone(),
            display_name: record.display_name.clone(),
            href,
        });
        summary.projects += 1;
    }

    let page = render_index(
        template.as_deref().unwrap_or(DEFAULT_INDEX_TEMPLATE),
        &config.site_title,
        &config.school_year,
        &entries,
        Utc::now(),
    )
    .map_err(|e| {
        Error::config("templates_dir", format!("cannot render landing page: {}", e))
    })?;
    write_atomic(&site_dir.join("index.html"), page.as_bytes()).await?;
    tokio::fs::write(site_dir.join(NOJEKYLL), b"").await?;

    summary.sections = entries
        .iter()
        .map(|e| e.section.as_str())
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    info!(
        projects = summary.projects,
        sections = summary.sections,
        missing = summary.missing,
        "site built"
    );
    Ok(summary)
}

/// Load the manifest from the build directory and build the site
pub async fn build_from_manifest(config: &Config) -> Result<SiteSummary> {
    let manifest = Manifest::load(&config.manifest_path()).await?;
    build_site(config, &manifest).await
}

/// Landing page used when no `templates_dir` is configured
const DEFAULT_INDEX_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{{ title }}</title>
<style>
body { font-family: system-ui, sans-serif; max-width: 960px; margin: 2rem auto; padding: 0 1rem; }
section { margin-bottom: 2rem; }
ul { list-style: none; padding: 0; display: grid; grid-template-columns: repeat(auto-fill, minmax(180px, 1fr)); gap: 0.5rem; }
li a { display: block; padding: 0.75rem; border: 1px solid #ddd; border-radius: 6px; text-decoration: none; }
footer { color: #666; font-size: 0.85rem; }
</style>
</head>
<body>
<h1>{{ title }}</h1>
<p>{{ school_year }}</p>
{% for section in sections %}
<section>
<h2>Section {{ section.name }}</h2>
<ul>
{% for student in section.students %}
<li><a href="{{ student.href }}">{{ student.display_name }}</a></li>
{% endfor %}
</ul>
</section>
{% else %}
<p>No projects have been published yet.</p>
{% endfor %}
<footer>Generated {{ generated_at }}</footer>
</body>
</html>
"#;

/// File looked up in `templates_dir`
const INDEX_TEMPLATE_NAME: &str = "index.html.j2";

/// Template source for the landing page: the configured one, or the built-in page
async fn index_template(config: &Config) -> Result<Option<String>> {
    let Some(dir) = &config.templates_dir else {
        return Ok(None);
    };
    let path = dir.join(INDEX_TEMPLATE_NAME);
    let source = tokio::fs::read_to_string(&path).await.map_err(|e| {
        Error::config(
            "templates_dir",
            format!("cannot read template {}: {}", path.display(), e),
        )
    })?;
    debug!(path = %path.display(), "using custom landing page template");
    Ok(Some(source))
}

/// Render the landing page
///
/// The template sees `title`, `school_year`, `generated_at` and `sections`,
/// a list of `{ name, students: [{ display_name, href }] }` in section
/// order. Every value is HTML-escaped.
fn render_index(
    template: &str,
    title: &str,
    school_year: &str,
    entries: &[SiteEntry],
    generated_at: DateTime<Utc>,
) -> std::result::Result<String, minijinja::Error> {
    let mut by_section: BTreeMap<&str, Vec<&SiteEntry>> = BTreeMap::new();
    for entry in entries {
        by_section.entry(&entry.section).or_default().push(entry);
    }

    let sections: Vec<Value> = by_section
        .into_iter()
        .map(|(name, students)| {
            let students: Vec<Value> = students
                .into_iter()
                .map(|entry| {
                    // Escaped here; the autoescaper would also encode '/'
                    context! {
                        display_name => entry.display_name,
                        href => Value::from_safe_string(escape_html(&entry.href)),
                    }
                })
                .collect();
            context! { name => name, students => students }
        })
        .collect();

    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    env.render_str(
        template,
        context! {
            title => title,
            school_year => school_year,
            generated_at => generated_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            sections => sections,
        },
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
