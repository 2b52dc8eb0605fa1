//! Archive fixtures and a scripted course API

use sha2::{Digest, Sha256};
use std::io::Write;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A zstd-compressed tar holding `files`
pub fn tar_zst(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, name, *content).unwrap();
    }
    let tar = builder.into_inner().unwrap();

    let mut encoder = zstd::stream::write::Encoder::new(Vec::new(), 3).unwrap();
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

/// An About Me project with editor metadata that must not be published
pub fn about_me_project(title: &str) -> Vec<u8> {
    let page = format!("<html><body><h1>About {}</h1></body></html>", title);
    tar_zst(&[
        ("index.html", page.as_bytes()),
        ("css/style.css", b"body { color: teal; }"),
        (".guides/content.md", b"instructor notes"),
        (".codio", b"{}"),
    ])
}

/// Hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// One student served by the mock API
pub struct MockStudent {
    /// Student id
    pub id: &'static str,
    /// Full name
    pub name: &'static str,
    /// Archive served for the student
    pub archive: Vec<u8>,
}

impl MockStudent {
    /// Student with a standard About Me project titled by id
    pub fn new(id: &'static str, name: &'static str) -> Self {
        Self {
            id,
            name,
            archive: about_me_project(id),
        }
    }
}

/// Mount the token endpoint issuing `tok-1`
pub async fn mount_token(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/oauth/token"))
        .and(query_param("grant_type", "client_credentials"))
        .and(query_param("client_id", "client-123"))
        .and(query_param("client_secret", "s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok-1",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

/// Mount a course, its students and the full export flow for each student
///
/// `assignment` of `None` serves a course without the About Me assignment.
pub async fn mount_course(
    server: &MockServer,
    course_id: &str,
    assignment: Option<&str>,
    students: &[MockStudent],
) {
    let assignments = match assignment {
        Some(id) => serde_json::json!([{"id": id, "name": "About Me"}]),
        None => serde_json::json!([{"id": "a-0", "name": "Hello World"}]),
    };
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/courses/{}", course_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": course_id,
            "name": format!("Course {}", course_id),
            "modules": [{"name": "Projects", "assignments": assignments}]
        })))
        .mount(server)
        .await;

    let listing: Vec<_> = students
        .iter()
        .map(|s| serde_json::json!({"id": s.id, "name": s.name, "username": s.id}))
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/courses/{}/students", course_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing))
        .mount(server)
        .await;

    let Some(assignment) = assignment else {
        return;
    };
    for student in students {
        Mock::given(method("GET"))
            .and(path(format!(
                "/api/v1/courses/{}/assignments/{}/students/{}/download",
                course_id, assignment, student.id
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "taskUri": format!("tasks/{}", student.id)
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/tasks/{}", student.id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "done": true,
                "url": format!("{}/exports/{}.tar.zst", server.uri(), student.id)
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/exports/{}.tar.zst", student.id)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(student.archive.clone()))
            .mount(server)
            .await;
    }
}
