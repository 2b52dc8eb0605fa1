use super::*;
use crate::error::Error;
use crate::test_helpers::test_config;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};


fn credentials() -> crate::config::Credentials {
    crate::config::Credentials {
        client_id: "client-123".to_string(),
        client_secret: "s3cret".to_string(),
    }
}

/// Start a mock server with a working token endpoint issuing `tok-1`
async fn server_with_token() -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth/token"))
        .and(query_param("grant_type", "client_credentials"))
        .and(query_param("client_id", "client-123"))
        .and(query_param("client_secret", "s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok-1",
            "expires_in": 3600
        })))
        .mount(&mock_server)
        .await;
    mock_server
}

fn client_for(mock_server: &MockServer, temp_dir: &TempDir) -> CourseApiClient {
    let config = test_config(&mock_server.uri(), temp_dir.path());
    CourseApiClient::new(&config, credentials()).unwrap()
}

fn course_json() -> serde_json::Value {
    serde_json::json!({
        "id": "course-abc",
        "name": "Grade 7 Web Design",
        "modules": [
            {"name": "Intro", "assignments": [{"id": "a-1", "name": "Hello World"}]},
            {"name": "Projects", "assignments": [{"id": "a-2", "name": "About Me"}]}
        ]
    })
}

#[tokio::test]
async fn test_get_course_with_bearer_token() {
    let mock_server = server_with_token().await;
    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&mock_server, &temp_dir);

    Mock::given(method("GET"))
        .and(path("/api/v1/courses/course-abc"))
        .and(query_param("withHiddenAssignments", "true"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(course_json()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let course = client
        .get_course("course-abc", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(course.name, "Grade 7 Web Design");
    assert_eq!(
        course.find_assignment("about me").map(|a| a.id.as_str()),
        Some("a-2")
    );
}

#[tokio::test]
async fn test_token_is_cached_across_requests() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&mock_server, &temp_dir);

    Mock::given(method("GET"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "tok-1"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/courses/course-abc/students"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"id": "s-1", "name": "Jordan Alvarez", "username": "jalvarez"},
            {"id": "s-2", "name": "Madison"}
        ])))
        .expect(2)
        .mount(&mock_server)
        .await;

    let cancel = CancellationToken::new();
    let first = client.list_students("course-abc", &cancel).await.unwrap();
    let second = client.clone().list_students("course-abc", &cancel).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].username.as_deref(), Some("jalvarez"));
}

#[tokio::test]
async fn test_rejected_credentials_are_fatal_and_not_retried() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&mock_server, &temp_dir);

    Mock::given(method("GET"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let err = client
        .authenticate(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Authentication(_)), "got {err:?}");
    assert!(err.is_fatal());
    assert!(
        !err.to_string().contains("s3cret"),
        "client secret leaked into error: {err}"
    );
}

#[tokio::test]
async fn test_401_triggers_single_reauthentication() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&mock_server, &temp_dir);

    // First token is stale, second one works
    Mock::given(method("GET"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "tok-1"})),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "tok-2"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/courses/course-abc"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/courses/course-abc"))
        .and(header("authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(course_json()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let course = client
        .get_course("course-abc", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(course.id, "course-abc");
}

#[tokio::test]
async fn test_persistent_401_is_authentication_error() {
    let mock_server = server_with_token().await;
    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&mock_server, &temp_dir);

    Mock::given(method("GET"))
        .and(path("/api/v1/courses/course-abc"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&mock_server)
        .await;

    let err = client
        .get_course("course-abc", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Authentication(_)), "got {err:?}");
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let mock_server = server_with_token().await;
    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&mock_server, &temp_dir);

    Mock::given(method("GET"))
        .and(path("/api/v1/courses/course-abc"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/courses/course-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(course_json()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let course = client
        .get_course("course-abc", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(course.modules.len(), 2);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let mock_server = server_with_token().await;
    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&mock_server, &temp_dir);

    Mock::given(method("GET"))
        .and(path("/api/v1/courses/course-abc/students"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(4)
        .mount(&mock_server)
        .await;

    let err = client
        .list_students("course-abc", &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        Error::TransientFailureExhausted { attempts, last } => {
            assert_eq!(attempts, 4);
            assert!(matches!(*last, Error::Api { status: 502, .. }));
        }
        other => panic!("expected TransientFailureExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_response_is_not_retried() {
    let mock_server = server_with_token().await;
    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&mock_server, &temp_dir);

    Mock::given(method("GET"))
        .and(path("/api/v1/courses/course-abc/students"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let err = client
        .list_students("course-abc", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedResponse { .. }), "got {err:?}");
    assert_eq!(err.error_code(), "malformed_response");
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mock_server = server_with_token().await;
    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&mock_server, &temp_dir);

    Mock::given(method("GET"))
        .and(path("/api/v1/courses/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("course not found"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let err = client
        .get_course("missing", &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        Error::Api { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "course not found");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_429_honours_retry_after() {
    let mock_server = server_with_token().await;
    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&mock_server, &temp_dir);

    Mock::given(method("GET"))
        .and(path("/api/v1/courses/course-abc"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/courses/course-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(course_json()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let started = std::time::Instant::now();
    client
        .get_course("course-abc", &CancellationToken::new())
        .await
        .unwrap();
    assert!(
        started.elapsed() >= std::time::Duration::from_secs(1),
        "retry happened before Retry-After elapsed"
    );
}

#[tokio::test]
async fn test_invalid_base_url_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config("http://localhost:1", temp_dir.path());
    config.api.base_url = "not a url".to_string();

    let err = CourseApiClient::new(&config, credentials()).err().unwrap();
    assert!(matches!(err, Error::Config { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_download_archive_streams_and_hashes() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&mock_server, &temp_dir);

    let body: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    Mock::given(method("GET"))
        .and(path("/exports/s-1.tar.zst"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dest = temp_dir.path().join("build/.tmp/7-1/jordan-a.tar.zst");
    let url = format!("{}/exports/s-1.tar.zst", mock_server.uri());
    let archive = client
        .download_archive(&url, &dest, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(archive.path, dest);
    assert_eq!(archive.size, body.len() as u64);
    assert_eq!(archive.sha256, format!("{:x}", Sha256::digest(&body)));
    assert_eq!(std::fs::read(&dest).unwrap(), body);
}

#[tokio::test]
async fn test_failed_download_leaves_no_file() {
    let mock_server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&mock_server, &temp_dir);

    Mock::given(method("GET"))
        .and(path("/exports/gone.tar.zst"))
        .respond_with(ResponseTemplate::new(403).set_body_string("link expired"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dest = temp_dir.path().join("gone.tar.zst");
    let url = format!("{}/exports/gone.tar.zst", mock_server.uri());
    let err = client
        .download_archive(&url, &dest, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Api { status: 403, .. }), "got {err:?}");
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_cancelled_run_stops_retrying() {
    let mock_server = server_with_token().await;
    let temp_dir = TempDir::new().unwrap();
    let client = client_for(&mock_server, &temp_dir);

    Mock::given(method("GET"))
        .and(path("/api/v1/courses/course-abc"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = client.get_course("course-abc", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled), "got {err:?}");
}
