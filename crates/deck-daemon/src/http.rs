use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use deck_proto::config::RateLimitConfig;
use deck_proto::protocol::{
    AlbumSummary, ApiMessage, CreatePlaylistRequest, CreatedPlaylist, RestoreRequest,
    SearchResults, TrackRequest,
};
use deck_proto::track::{HistoryEntry, PlaylistSummary, PlaylistView, TopTrack};

use crate::acquire::AcquisitionPipeline;
use crate::auth::{Authenticator, CurrentUser, ADMIN_RESTORE, MUSICS_DOWNLOAD, MUSICS_PLAY};
use crate::catalog::Catalog;
use crate::error::{AcquireError, CatalogError, LibraryError, StoreError};
use crate::library::Library;
use crate::rate_limit::{RateLimit, RateLimiter};
use crate::store::Store;

const HISTORY_LIMIT: usize = 50;
const TOP_LIMIT: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AcquisitionPipeline>,
    pub library: Arc<Library>,
    pub catalog: Arc<dyn Catalog>,
    pub store: Arc<dyn Store>,
    pub auth: Arc<Authenticator>,
    pub play_limiter: Arc<RateLimiter>,
    pub download_limiter: Arc<RateLimiter>,
    pub limits: RateLimitConfig,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthenticated,
    Forbidden,
    RateLimited(RateLimit),
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    BadGateway(String),
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, "Not authenticated.".to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Not authorized.".to_string()),
            ApiError::RateLimited(_) => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests. Please try again later.".to_string(),
            ),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            ApiError::BadGateway(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let mut response = (status, Json(ApiMessage::new(message))).into_response();
        if let ApiError::RateLimited(limit) = self {
            rate_limit_headers(response.headers_mut(), &limit);
        }
        response
    }
}

impl From<AcquireError> for ApiError {
    fn from(e: AcquireError) -> Self {
        match e {
            AcquireError::Connection(e) => ApiError::Unavailable(e.to_string()),
            AcquireError::NotFound(_) => ApiError::NotFound("Track not found.".to_string()),
            AcquireError::Download(m) => ApiError::BadGateway(m),
            AcquireError::Metadata(m) => ApiError::BadGateway(m),
            AcquireError::Store(e) => e.into(),
        }
    }
}

impl From<LibraryError> for ApiError {
    fn from(e: LibraryError) -> Self {
        match e {
            LibraryError::NotFound(m) => ApiError::NotFound(m.to_string()),
            LibraryError::Invalid(m) => ApiError::BadRequest(m.to_string()),
            LibraryError::Acquire(e) => e.into(),
            LibraryError::Store(e) => e.into(),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(what) => ApiError::NotFound(format!("Catalog has no {}.", what)),
            other => {
                warn!(error = %other, "Catalog request failed");
                ApiError::BadGateway(other.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        error!(error = %e, "Store failure");
        ApiError::Internal
    }
}

fn rate_limit_headers(headers: &mut HeaderMap, limit: &RateLimit) {
    for (name, value) in limit.headers() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

fn check_limit(limiter: &RateLimiter, limit: u32, user: &CurrentUser) -> Result<RateLimit, ApiError> {
    let result = limiter.check(limit, &format!("song_{}", user.record.email));
    if result.limited {
        warn!(user = %user.record.id, "Rate limited");
        return Err(ApiError::RateLimited(result));
    }
    Ok(result)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/track/:id/song", get(get_song))
        .route("/api/track/:id/download", post(download_track))
        .route(
            "/api/favourites",
            get(get_favourites)
                .post(add_favourite)
                .delete(remove_favourite),
        )
        .route("/api/playlists", get(list_playlists).post(create_playlist))
        .route("/api/playlist/:id", get(get_playlist).delete(delete_playlist))
        .route(
            "/api/playlist/:id/tracks",
            post(add_playlist_track).delete(remove_playlist_track),
        )
        .route("/api/history", get(history))
        .route("/api/top", get(top_tracks))
        .route("/api/search", get(search))
        .route("/api/new-releases", get(new_releases))
        .route("/api/restore", post(restore))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(bind_address: String, port: u16, state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

// ── tracks ───────────────────────────────────────────────────────────────────

async fn get_song(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(track_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    user.require(MUSICS_PLAY)?;
    let limit = check_limit(&state.play_limiter, state.limits.play_per_interval, &user)?;

    let bytes: Bytes = state.pipeline.read_artifact(&track_id).await?;
    if !query.contains_key("check") {
        state.pipeline.log_listen(&track_id, &user.record.id).await;
    }

    let disposition = HeaderValue::from_str(&format!("inline; filename=\"track-{}.mp3\"", track_id))
        .map_err(|_| ApiError::BadRequest("Invalid track id".to_string()))?;
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    rate_limit_headers(&mut headers, &limit);

    Ok((headers, bytes).into_response())
}

async fn download_track(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(track_id): Path<String>,
) -> Result<Response, ApiError> {
    user.require(MUSICS_DOWNLOAD)?;
    let limit = check_limit(
        &state.download_limiter,
        state.limits.download_per_interval,
        &user,
    )?;

    info!(track = %track_id, user = %user.record.id, "Download requested");
    state
        .pipeline
        .ensure_available(&track_id, &user.record.id)
        .await?;

    let mut headers = HeaderMap::new();
    rate_limit_headers(&mut headers, &limit);
    Ok((headers, Json(ApiMessage::new("Track downloaded successfully"))).into_response())
}

// ── favourites ───────────────────────────────────────────────────────────────

async fn get_favourites(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<PlaylistView>, ApiError> {
    Ok(Json(state.library.favourites(&user.record).await?))
}

async fn add_favourite(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<TrackRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    let outcome = state
        .library
        .add_to_favourites(&req.track_id, &user.record)
        .await?;
    Ok(Json(ApiMessage::new(outcome.message())))
}

async fn remove_favourite(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<TrackRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    state
        .library
        .remove_from_favourites(&req.track_id, &user.record)
        .await?;
    Ok(Json(ApiMessage::new("Track removed from playlist successfully")))
}

// ── playlists ────────────────────────────────────────────────────────────────

async fn list_playlists(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<PlaylistSummary>>, ApiError> {
    Ok(Json(state.library.list_playlists(&user.record).await?))
}

async fn create_playlist(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreatePlaylistRequest>,
) -> Result<Json<CreatedPlaylist>, ApiError> {
    let id = state.library.create_playlist(&req.name, &user.record).await?;
    Ok(Json(CreatedPlaylist { id }))
}

async fn get_playlist(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<PlaylistView>, ApiError> {
    Ok(Json(state.library.get_playlist(&id, &user.record).await?))
}

async fn delete_playlist(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ApiMessage>, ApiError> {
    state.library.delete_playlist(&id, &user.record).await?;
    Ok(Json(ApiMessage::new("Playlist deleted successfully")))
}

async fn add_playlist_track(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<TrackRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    let outcome = state
        .library
        .add_track(&id, &req.track_id, &user.record)
        .await?;
    Ok(Json(ApiMessage::new(outcome.message())))
}

async fn remove_playlist_track(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<TrackRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    state
        .library
        .remove_track(&id, &req.track_id, &user.record)
        .await?;
    Ok(Json(ApiMessage::new("Track removed from playlist successfully")))
}

// ── listening data & catalog ─────────────────────────────────────────────────

async fn history(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    Ok(Json(
        state
            .store
            .recent_history(&user.record.id, HISTORY_LIMIT)
            .await?,
    ))
}

async fn top_tracks(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<TopTrack>>, ApiError> {
    Ok(Json(state.store.most_played(&user.record.id, TOP_LIMIT).await?))
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn search(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResults>, ApiError> {
    let q = query.q.trim();
    if q.is_empty() {
        return Ok(Json(SearchResults::default()));
    }
    Ok(Json(state.catalog.search(q).await?))
}

async fn new_releases(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<Vec<AlbumSummary>>, ApiError> {
    Ok(Json(state.catalog.new_releases().await?))
}

// ── admin ────────────────────────────────────────────────────────────────────

async fn restore(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<RestoreRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    user.require(ADMIN_RESTORE)?;
    info!(user = %user.record.id, users = req.users.len(), "Import requested");

    for (email, data) in &req.users {
        let Some(config) = state.auth.find_by_email(email) else {
            info!(%email, "Skipping import for unknown user");
            continue;
        };
        let owner = state
            .store
            .ensure_user(&config.id, &config.email, &config.name)
            .await?;
        if let Err(e) = state.library.restore(&owner, &data.playlists).await {
            error!(user = %owner.id, error = %e, "Import failed");
            return Err(ApiError::Internal);
        }
    }
    Ok(Json(ApiMessage::new("Import completed")))
}
