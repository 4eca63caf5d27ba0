//! HTTP API: browsing, range streaming, downloads, subtitles and tags

use std::future::Future;
use std::io::{self, ErrorKind};
use std::path::PathBuf;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::access::Identity;
use crate::auth::require_basic_auth;
use crate::encoding::decode_path;
use crate::error::{unauthorized_response, AppResult, MediaError};
use crate::listing::{FolderEntry, MediaFileEntry};
use crate::paths;
use crate::state::ServerState;
use crate::stream;
use crate::transcode::{needs_transcoding, DeviceProfile, TranscodeInfo};
use crate::utils::{breadcrumbs, format_size, to_utc, Breadcrumb};

/// Request header carrying the secret of a gated folder
pub const FOLDER_SECRET_HEADER: &str = "x-folder-secret";

/// File server API wrapping the router and its state
#[derive(Clone)]
pub struct FileServerApi {
    state: ServerState,
}

impl FileServerApi {
    pub fn new(state: ServerState) -> Self {
        Self { state }
    }

    /// Create the axum router with all routes configured
    ///
    /// Every route, including the static UI fallback, sits behind Basic
    /// authentication. Pre-flight requests are answered by the CORS layer.
    pub fn router(&self) -> Router {
        let api = Router::new()
            .route("/browse", get(browse))
            .route("/stream/*path", get(stream_media))
            .route("/download/*path", get(download_media))
            .route("/info/*path", get(file_info))
            .route("/subtitle-info/*path", get(subtitle_info))
            .route("/subtitle/*path", get(subtitle_track))
            .route("/transcode-info/*path", get(transcode_info))
            .route("/toggle-watched", post(toggle_watched))
            .route("/add-tag", post(add_tag))
            .route("/remove-tag", delete(remove_tag))
            .route("/user", get(current_user))
            .route("/logout", post(logout))
            .fallback(api_not_found);

        let router = Router::new()
            .nest("/api", api)
            .route("/health", get(health_check));

        let router = match self.state.static_dir() {
            Some(dir) => router.fallback_service(
                ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html"))),
            ),
            None => router.fallback(not_found),
        };

        router
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_basic_auth,
            ))
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve plain HTTP on `listener` until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("HTTP server listening on http://{}", addr);
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }
}

/// Unlock secret presented with the request, if any
fn folder_secret(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(FOLDER_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
}

/// Sanitise, access-check and resolve a path taken from the URL
fn resolve_target(
    state: &ServerState,
    identity: &Identity,
    raw: &str,
    headers: &HeaderMap,
) -> Result<(String, PathBuf), MediaError> {
    let relative = paths::sanitize(&decode_path(raw));
    state
        .policy()
        .check_access(identity, &relative, folder_secret(headers))?;
    let full_path = state.root().resolve(&relative)?;
    Ok((relative, full_path))
}

/// Run filesystem-bound work off the async workers
async fn run_blocking<T, F>(context: &'static str, work: F) -> Result<T, MediaError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| MediaError::io(context, io::Error::new(ErrorKind::Other, e)))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "Media server running")
}

async fn api_not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "API endpoint not found" })),
    )
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}

#[derive(Debug, Deserialize)]
struct BrowseQuery {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrowseResponse {
    folders: Vec<FolderEntry>,
    files: Vec<MediaFileEntry>,
    current_path: String,
    breadcrumbs: Vec<Breadcrumb>,
    all_tags: Vec<String>,
    user: String,
}

/// List one directory for the current user
async fn browse(
    State(state): State<ServerState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<BrowseQuery>,
    headers: HeaderMap,
) -> AppResult<Json<BrowseResponse>> {
    let relative = decode_path(&query.path);
    let unlock = folder_secret(&headers).map(str::to_owned);
    tracing::info!("User {} browsing \"{}\"", identity, relative);

    let lister = state.lister();
    let user = identity.clone();
    let listing = run_blocking("Listing directory", move || {
        lister.list(&user, &relative, unlock.as_deref())
    })
    .await??;

    Ok(Json(BrowseResponse {
        breadcrumbs: breadcrumbs(&listing.current_path),
        all_tags: state.tags().all_tags(),
        user: identity.name().to_string(),
        folders: listing.folders,
        files: listing.files,
        current_path: listing.current_path,
    }))
}

/// Range-aware streaming, or a transcoded stream for incompatible clients
async fn stream_media(
    State(state): State<ServerState>,
    Extension(identity): Extension<Identity>,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let (relative, full_path) = resolve_target(&state, &identity, &raw, &headers)?;
    tracing::info!("User {} streaming {}", identity, relative);

    if let Some(transcoder) = state.transcoder() {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if needs_transcoding(&DeviceProfile::from_user_agent(user_agent), &relative) {
            stream::stat_file(&full_path).await?;
            return Ok(transcoder.stream(&full_path)?);
        }
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    Ok(stream::stream_file(&full_path, range).await?)
}

async fn download_media(
    State(state): State<ServerState>,
    Extension(identity): Extension<Identity>,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let (relative, full_path) = resolve_target(&state, &identity, &raw, &headers)?;
    tracing::info!("User {} downloading {}", identity, relative);
    Ok(stream::download_file(&full_path).await?)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileInfo {
    name: String,
    path: String,
    size: u64,
    size_formatted: String,
    created: chrono::DateTime<chrono::Utc>,
    modified: chrono::DateTime<chrono::Utc>,
    extension: String,
    tags: Vec<String>,
    watched: bool,
}

async fn file_info(
    State(state): State<ServerState>,
    Extension(identity): Extension<Identity>,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<FileInfo>> {
    let (relative, full_path) = resolve_target(&state, &identity, &raw, &headers)?;
    let metadata = stream::stat_file(&full_path).await?;

    let modified = metadata.modified().map(to_utc).unwrap_or_default();
    let tags = state.tags().get(&relative);
    Ok(Json(FileInfo {
        name: paths::segments(&relative).last().unwrap_or_default().to_string(),
        size: metadata.len(),
        size_formatted: format_size(metadata.len()),
        created: metadata.created().map(to_utc).unwrap_or(modified),
        modified,
        extension: crate::media::extension_of(&relative)
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default(),
        watched: tags.iter().any(|t| t == tagstore::WATCHED_TAG),
        tags,
        path: relative,
    }))
}

async fn subtitle_info(
    State(state): State<ServerState>,
    Extension(identity): Extension<Identity>,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let (relative, full_path) = resolve_target(&state, &identity, &raw, &headers)?;
    stream::stat_file(&full_path).await?;

    let subtitles = state.subtitles().list_tracks(&full_path, &relative).await;
    tracing::debug!("Found {} subtitle tracks in {}", subtitles.len(), relative);
    Ok(Json(json!({ "subtitles": subtitles })).into_response())
}

/// WebVTT for `<path>/<track>`
async fn subtitle_track(
    State(state): State<ServerState>,
    Extension(identity): Extension<Identity>,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let (video, track) = raw
        .trim_end_matches('/')
        .rsplit_once('/')
        .ok_or_else(|| MediaError::BadRequest("Missing subtitle track index".to_string()))?;
    let track: usize = track
        .parse()
        .map_err(|_| MediaError::BadRequest("Invalid subtitle track index".to_string()))?;

    let (relative, full_path) = resolve_target(&state, &identity, video, &headers)?;
    stream::stat_file(&full_path).await?;
    tracing::info!("User {} requested subtitle track {} of {}", identity, track, relative);

    let content = state
        .subtitles()
        .get_track(&full_path, track)
        .await
        .map_err(|source| MediaError::UpstreamTool {
            context: "Subtitle extraction",
            source,
        })?;

    Ok((
        [(header::CONTENT_TYPE, "text/vtt; charset=utf-8")],
        content,
    )
        .into_response())
}

async fn transcode_info(
    State(state): State<ServerState>,
    Extension(identity): Extension<Identity>,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<TranscodeInfo>> {
    let (relative, _) = resolve_target(&state, &identity, &raw, &headers)?;
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    Ok(Json(TranscodeInfo::evaluate(
        &DeviceProfile::from_user_agent(user_agent),
        &relative,
    )))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagRequest {
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    tag: Option<String>,
}

impl TagRequest {
    /// Sanitised, access-checked tag key
    fn file_key(
        &self,
        state: &ServerState,
        identity: &Identity,
        headers: &HeaderMap,
    ) -> Result<String, MediaError> {
        let key = paths::sanitize(self.file_path.as_deref().unwrap_or_default());
        if key.is_empty() {
            return Err(MediaError::BadRequest("File path is required".to_string()));
        }
        state
            .policy()
            .check_access(identity, &key, folder_secret(headers))?;
        Ok(key)
    }

    fn tag(&self) -> Result<String, MediaError> {
        self.tag
            .as_deref()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| MediaError::BadRequest("Tag is required".to_string()))
    }
}

async fn toggle_watched(
    State(state): State<ServerState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Json(request): Json<TagRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let key = request.file_key(&state, &identity, &headers)?;
    let tags = state.tags().clone();
    let watched = run_blocking("Updating tags", move || tags.toggle_watched(&key)).await?;
    Ok(Json(json!({ "success": true, "watched": watched })))
}

async fn add_tag(
    State(state): State<ServerState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Json(request): Json<TagRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let key = request.file_key(&state, &identity, &headers)?;
    let tag = request.tag()?;
    tracing::info!("User {} tagging {} with \"{}\"", identity, key, tag);

    let tags = state.tags().clone();
    let updated = run_blocking("Updating tags", move || tags.add(&key, &tag)).await?;
    Ok(Json(json!({ "success": true, "tags": updated })))
}

async fn remove_tag(
    State(state): State<ServerState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Json(request): Json<TagRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let key = request.file_key(&state, &identity, &headers)?;
    let tag = request.tag()?;

    let tags = state.tags().clone();
    let updated = run_blocking("Updating tags", move || tags.remove(&key, &tag)).await?;
    Ok(Json(json!({ "success": true, "tags": updated })))
}

async fn current_user(Extension(identity): Extension<Identity>) -> impl IntoResponse {
    Json(json!({ "username": identity.name(), "isAuthenticated": true }))
}

/// Answer with a fresh challenge so the browser drops cached credentials
async fn logout(
    State(state): State<ServerState>,
    Extension(identity): Extension<Identity>,
) -> Response {
    tracing::info!("User {} logged out", identity);
    unauthorized_response(state.realm())
}
