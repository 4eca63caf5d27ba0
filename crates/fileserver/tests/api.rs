//! End-to-end tests driving the real router

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use base64::Engine;
use fileserver::subtitles::{ProbedStream, ProbedTags};
use fileserver::{
    FileServerApi, FolderRules, GatedFolder, ServerConfig, ServerState, SubtitleError,
    SubtitleTool, UserAccount,
};
use serde_json::Value;
use tagstore::TagStore;
use tempfile::TempDir;
use tower::ServiceExt;

const TEN_MIB: usize = 10 * 1024 * 1024;

struct TestServer {
    dir: TempDir,
    state: ServerState,
    extractions: Arc<AtomicUsize>,
}

struct FakeSubtitles {
    extractions: Arc<AtomicUsize>,
}

#[async_trait]
impl SubtitleTool for FakeSubtitles {
    async fn probe(&self, _video: &Path) -> Result<Vec<ProbedStream>, SubtitleError> {
        Ok(vec![ProbedStream {
            index: 2,
            codec_name: Some("subrip".to_string()),
            tags: ProbedTags {
                language: Some("eng".to_string()),
                title: None,
            },
        }])
    }

    async fn extract(&self, _video: &Path, _track: usize, output: &Path) -> Result<(), SubtitleError> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, "WEBVTT\n\n00:00.000 --> 00:01.000\n{\\an8}Hi\n")
            .await
            .map_err(SubtitleError::Cache)
    }
}

fn film_bytes() -> Vec<u8> {
    (0..TEN_MIB).map(|i| (i % 253) as u8).collect()
}

fn create_server() -> TestServer {
    let dir = TempDir::new().unwrap();
    let media = dir.path().join("media");
    std::fs::create_dir_all(media.join("movies/.private")).unwrap();
    std::fs::create_dir_all(media.join("movies/.temp")).unwrap();
    std::fs::write(media.join("movies/ActionFilm.mp4"), film_bytes()).unwrap();
    std::fs::write(media.join("movies/.private/secret.mp4"), b"secret").unwrap();
    std::fs::write(media.join("movies/.temp/later.mkv"), b"later").unwrap();

    let mut config = ServerConfig::new(&media);
    config.subtitle_cache = dir.path().join("subtitles");
    config.users.insert(
        "family".to_string(),
        UserAccount {
            password: "another-password".to_string(),
            rules: FolderRules {
                hidden: vec![".private".to_string()],
                gated: vec![GatedFolder {
                    pattern: ".temp".to_string(),
                    secret: "letmein".to_string(),
                }],
            },
        },
    );
    config.users.insert(
        "admin".to_string(),
        UserAccount {
            password: "abe124".to_string(),
            rules: FolderRules::default(),
        },
    );

    let tags = Arc::new(TagStore::new(dir.path().join("tags.json")));
    let extractions = Arc::new(AtomicUsize::new(0));
    let state = ServerState::new(config, tags)
        .unwrap()
        .with_subtitle_tool(Arc::new(FakeSubtitles {
            extractions: extractions.clone(),
        }));

    TestServer {
        dir,
        state,
        extractions,
    }
}

impl TestServer {
    fn router(&self) -> Router {
        FileServerApi::new(self.state.clone()).router()
    }

    fn tags_file(&self) -> std::path::PathBuf {
        self.dir.path().join("tags.json")
    }
}

fn basic(user: &str, password: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password));
    format!("Basic {}", encoded)
}

fn get_as(user: &str, password: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, basic(user, password))
}

fn family(uri: &str) -> axum::http::request::Builder {
    get_as("family", "another-password", uri)
}

fn admin(uri: &str) -> axum::http::request::Builder {
    get_as("admin", "abe124", uri)
}

fn json_request(builder: axum::http::request::Builder, method: Method, body: Value) -> Request<Body> {
    builder
        .method(method)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (status, headers, body)
}

async fn send_json(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn names(list: &Value) -> Vec<String> {
    list.as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_requests_without_credentials_are_challenged() {
    let server = create_server();

    let request = Request::builder().uri("/api/browse").body(Body::empty()).unwrap();
    let (status, headers, body) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers[header::WWW_AUTHENTICATE], "Basic realm=\"Media Server\"");
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "Access denied. Please enter valid credentials.");

    let request = get_as("family", "wrong", "/health").body(Body::empty()).unwrap();
    let (status, _, _) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_preflight_skips_authentication() {
    let server = create_server();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/stream/movies/ActionFilm.mp4")
        .header(header::ORIGIN, "http://localhost:5173")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_browse_hides_private_folder_for_family() {
    let server = create_server();

    let request = family("/api/browse?path=movies").body(Body::empty()).unwrap();
    let (status, body) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body["files"]), vec!["ActionFilm.mp4"]);
    assert_eq!(names(&body["folders"]), vec![".temp"]);
    assert_eq!(body["folders"][0]["locked"], true);
    assert_eq!(body["currentPath"], "movies");
    assert_eq!(body["user"], "family");
    assert_eq!(body["breadcrumbs"][0]["name"], "Home");
    assert_eq!(body["breadcrumbs"][1]["path"], "movies");
    assert_eq!(body["files"][0]["type"], "file");
    assert_eq!(body["files"][0]["size"], TEN_MIB as u64);
    assert_eq!(body["files"][0]["sizeFormatted"], "10.00 MB");

    let request = admin("/api/browse?path=movies").body(Body::empty()).unwrap();
    let (_, body) = send_json(server.router(), request).await;
    assert_eq!(names(&body["folders"]), vec![".private", ".temp"]);
    assert_eq!(body["folders"][1]["locked"], false);
}

#[tokio::test]
async fn test_browse_errors() {
    let server = create_server();

    let request = family("/api/browse?path=movies/.private").body(Body::empty()).unwrap();
    let (status, _) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = family("/api/browse?path=movies/ActionFilm.mp4").body(Body::empty()).unwrap();
    let (status, body) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Path is not a directory");

    let request = family("/api/browse?path=missing").body(Body::empty()).unwrap();
    let (status, body) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["files"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_browse_below_a_file_is_empty() {
    let server = create_server();

    let request = family("/api/browse?path=movies/ActionFilm.mp4/sub")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["folders"].as_array().unwrap().is_empty());
    assert!(body["files"].as_array().unwrap().is_empty());
    assert_eq!(body["currentPath"], "movies/ActionFilm.mp4/sub");
}

#[tokio::test]
async fn test_range_request_returns_exact_window() {
    let server = create_server();

    let request = family("/api/stream/movies%2FActionFilm.mp4")
        .header(header::RANGE, "bytes=0-1023")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-1023/10485760");
    assert_eq!(headers[header::CONTENT_LENGTH], "1024");
    assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(body, &film_bytes()[..1024]);

    let request = family("/api/stream/movies/ActionFilm.mp4")
        .header(header::RANGE, "bytes=10485000-")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 10485000-10485759/10485760");
    assert_eq!(body, &film_bytes()[10_485_000..]);
}

#[tokio::test]
async fn test_full_stream_without_range() {
    let server = create_server();
    let request = family("/api/stream/movies/ActionFilm.mp4").body(Body::empty()).unwrap();
    let (status, headers, body) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_LENGTH], "10485760");
    assert_eq!(body, film_bytes());
}

#[tokio::test]
async fn test_unsatisfiable_range() {
    let server = create_server();
    let request = family("/api/stream/movies/ActionFilm.mp4")
        .header(header::RANGE, "bytes=10485760-")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes */10485760");
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_hidden_stream_is_forbidden_even_if_missing() {
    let server = create_server();

    for uri in [
        "/api/stream/movies%2F.private%2Fsecret.mp4",
        "/api/stream/movies/.private/does-not-exist.mp4",
        "/api/download/movies/.PRIVATE/secret.mp4",
        "/api/info/movies/.private/secret.mp4",
        "/api/subtitle-info/movies/.private/secret.mp4",
    ] {
        let request = family(uri).body(Body::empty()).unwrap();
        let (status, _, _) = send(server.router(), request).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
    }

    let request = admin("/api/stream/movies/.private/secret.mp4").body(Body::empty()).unwrap();
    let (status, _, body) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"secret");
}

#[tokio::test]
async fn test_gated_folder_needs_secret_header() {
    let server = create_server();

    let request = family("/api/stream/movies/.temp/later.mkv").body(Body::empty()).unwrap();
    let (status, _, _) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = family("/api/stream/movies/.temp/later.mkv")
        .header("X-Folder-Secret", "letmein")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"later");
}

#[tokio::test]
async fn test_traversal_stays_inside_root() {
    let server = create_server();
    std::fs::write(server.dir.path().join("outside.mp4"), b"outside").unwrap();

    let request = admin("/api/stream/..%2Foutside.mp4").body(Body::empty()).unwrap();
    let (status, _, _) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stream_missing_and_directory() {
    let server = create_server();

    let request = family("/api/stream/movies/nope.mp4").body(Body::empty()).unwrap();
    let (status, body) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "File not found");

    let request = family("/api/stream/movies").body(Body::empty()).unwrap();
    let (status, _) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_paths_below_a_file_are_not_found() {
    let server = create_server();

    for route in ["stream", "download", "info", "subtitle-info"] {
        let uri = format!("/api/{}/movies/ActionFilm.mp4/x.mp4", route);
        let request = family(&uri).body(Body::empty()).unwrap();
        let (status, body) = send_json(server.router(), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["error"], "File not found", "{}", uri);
    }
}

#[tokio::test]
async fn test_download_is_attachment() {
    let server = create_server();
    let request = family("/api/download/movies/ActionFilm.mp4").body(Body::empty()).unwrap();
    let (status, headers, body) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename*=UTF-8''ActionFilm.mp4"
    );
    assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(body.len(), TEN_MIB);
}

#[tokio::test]
async fn test_tag_round_trip_survives_reload() {
    let server = create_server();
    let body = serde_json::json!({ "filePath": "movies/ActionFilm.mp4", "tag": "favorite" });

    let request = json_request(family("/api/add-tag"), Method::POST, body.clone());
    let (status, response) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["success"], true);
    assert_eq!(response["tags"], serde_json::json!(["favorite"]));

    let request = family("/api/browse?path=movies").body(Body::empty()).unwrap();
    let (_, listing) = send_json(server.router(), request).await;
    assert_eq!(listing["files"][0]["tags"], serde_json::json!(["favorite"]));
    assert_eq!(listing["allTags"], serde_json::json!(["favorite"]));

    let reloaded = TagStore::load(server.tags_file()).unwrap();
    assert_eq!(reloaded.get("movies/ActionFilm.mp4"), vec!["favorite"]);

    let request = json_request(family("/api/remove-tag"), Method::DELETE, body);
    let (status, response) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["tags"], serde_json::json!([]));

    let request = family("/api/browse?path=movies").body(Body::empty()).unwrap();
    let (_, listing) = send_json(server.router(), request).await;
    assert_eq!(listing["files"][0]["tags"], serde_json::json!([]));
}

#[tokio::test]
async fn test_toggle_watched_twice() {
    let server = create_server();
    let body = serde_json::json!({ "filePath": "/movies//ActionFilm.mp4" });

    let request = json_request(family("/api/toggle-watched"), Method::POST, body.clone());
    let (status, response) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["watched"], true);

    let request = family("/api/info/movies/ActionFilm.mp4").body(Body::empty()).unwrap();
    let (_, info) = send_json(server.router(), request).await;
    assert_eq!(info["watched"], true);
    assert_eq!(info["extension"], ".mp4");
    assert_eq!(info["name"], "ActionFilm.mp4");

    let request = json_request(family("/api/toggle-watched"), Method::POST, body);
    let (_, response) = send_json(server.router(), request).await;
    assert_eq!(response["watched"], false);
}

#[tokio::test]
async fn test_tag_validation_and_access() {
    let server = create_server();

    let request = json_request(
        family("/api/add-tag"),
        Method::POST,
        serde_json::json!({ "filePath": "movies/ActionFilm.mp4", "tag": "  " }),
    );
    let (status, _) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = json_request(
        family("/api/toggle-watched"),
        Method::POST,
        serde_json::json!({ "filePath": "" }),
    );
    let (status, _) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = json_request(
        family("/api/add-tag"),
        Method::POST,
        serde_json::json!({ "filePath": "movies/.private/secret.mp4", "tag": "x" }),
    );
    let (status, _) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!server.tags_file().exists());
}

#[tokio::test]
async fn test_subtitle_endpoints() {
    let server = create_server();

    let request = family("/api/subtitle-info/movies/ActionFilm.mp4").body(Body::empty()).unwrap();
    let (status, body) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    let track = &body["subtitles"][0];
    assert_eq!(track["index"], 2);
    assert_eq!(track["trackIndex"], 0);
    assert_eq!(track["language"], "eng");
    assert_eq!(track["title"], "Subtitle 1");
    assert_eq!(track["url"], "/api/subtitle/movies/ActionFilm.mp4/0");

    for _ in 0..2 {
        let request = family("/api/subtitle/movies/ActionFilm.mp4/0").body(Body::empty()).unwrap();
        let (status, headers, body) = send(server.router(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/vtt; charset=utf-8");
        assert_eq!(String::from_utf8(body).unwrap(), "WEBVTT\n\n00:00.000 --> 00:01.000\nHi\n");
    }
    assert_eq!(server.extractions.load(Ordering::SeqCst), 1);

    let request = family("/api/subtitle/movies/ActionFilm.mp4/abc").body(Body::empty()).unwrap();
    let (status, _, _) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_transcode_info_reports_mobile_decision() {
    let server = create_server();
    let request = family("/api/transcode-info/movies/.temp/later.mkv")
        .header("X-Folder-Secret", "letmein")
        .header(header::USER_AGENT, "Mozilla/5.0 (Linux; Android 14) Mobile")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["needsTranscoding"], true);
    assert_eq!(body["isMobile"], true);
    assert_eq!(body["originalFormat"], ".mkv");
}

#[tokio::test]
async fn test_user_logout_and_unknown_api() {
    let server = create_server();

    let request = family("/api/user").body(Body::empty()).unwrap();
    let (status, body) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "family");
    assert_eq!(body["isAuthenticated"], true);

    let request = family("/api/logout").method(Method::POST).body(Body::empty()).unwrap();
    let (status, _, _) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = family("/api/nothing-here").body(Body::empty()).unwrap();
    let (status, body) = send_json(server.router(), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "API endpoint not found");

    let request = family("/health").body(Body::empty()).unwrap();
    let (status, _, _) = send(server.router(), request).await;
    assert_eq!(status, StatusCode::OK);
}
