//! Privacy-friendly display names and URL slugs
//!
//! Full names never leave the local machine. Everything published (index
//! page, directory names, validation report) uses the display name
//! "First LastInitial" and a slug derived from it.

use crate::config::DisplayNameConfig;
use std::collections::{HashMap, HashSet};

/// Display name used when the API returns an empty name
pub const UNKNOWN_STUDENT: &str = "Unknown Student";

/// Compute the display name for a full name
///
/// - overrides (exact full-name match) win,
/// - one token → that token (preferred-name mapping applied),
/// - two or more → `"<first> <LAST-INITIAL>"` using the final token.
///
/// ```
/// use class_showcase::config::DisplayNameConfig;
/// use class_showcase::display_name::display_name;
///
/// let rules = DisplayNameConfig::default();
/// assert_eq!(display_name("Jordan Alvarez", &rules), "Jordan A");
/// assert_eq!(display_name("Madison", &rules), "Madison");
/// ```
pub fn display_name(full_name: &str, rules: &DisplayNameConfig) -> String {
    let trimmed = full_name.trim();
    if trimmed.is_empty() {
        return UNKNOWN_STUDENT.to_string();
    }

    let normalized = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some(name) = rules
        .overrides
        .get(trimmed)
        .or_else(|| rules.overrides.get(&normalized))
    {
        return name.clone();
    }

    let mut tokens = trimmed.split_whitespace();
    let Some(first) = tokens.next() else {
        return UNKNOWN_STUDENT.to_string();
    };
    let first = rules
        .preferred
        .get(first)
        .map(String::as_str)
        .unwrap_or(first);

    match tokens.last().and_then(|last| last.chars().next()) {
        Some(initial) => format!("{} {}", first, initial.to_uppercase()),
        None => first.to_string(),
    }
}

/// Convert a display name into a URL-safe directory name
///
/// Lowercases, keeps ASCII alphanumerics, collapses everything else to `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "student".to_string()
    } else {
        slug
    }
}

/// Names assigned to one student after collision handling
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssignedName {
    /// Unique display name within the section
    pub display_name: String,
    /// Unique slug within the section
    pub slug: String,
}

/// Assign unique display names and slugs within one section
///
/// `students` are `(student_id, full_name)` pairs. Students sharing a display
/// name are ordered by id; the first keeps the plain name, later ones get
/// " 2", " 3", ... Slugs are made unique the same way. Returns a map keyed by
/// student id.
pub fn assign_section_names(
    students: &[(String, String)],
    rules: &DisplayNameConfig,
) -> HashMap<String, AssignedName> {
    let mut ordered: Vec<(&String, String)> = students
        .iter()
        .map(|(id, full)| (id, display_name(full, rules)))
        .collect();
    ordered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    let mut name_counts: HashMap<String, usize> = HashMap::new();
    let mut used_slugs: HashSet<String> = HashSet::new();
    let mut assigned = HashMap::with_capacity(ordered.len());

    for (id, base) in ordered {
        let count = name_counts.entry(base.clone()).or_insert(0);
        *count += 1;
        let display_name = if *count == 1 {
            base
        } else {
            tracing::debug!(student_id = %id, name = %base, n = *count, "display name collision");
            format!("{} {}", base, count)
        };

        let base_slug = slugify(&display_name);
        let mut slug = base_slug.clone();
        let mut n = 2;
        while !used_slugs.insert(slug.clone()) {
            slug = format!("{}-{}", base_slug, n);
            n += 1;
        }

        assigned.insert(id.clone(), AssignedName { display_name, slug });
    }

    assigned
}
