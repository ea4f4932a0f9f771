//! HTTP server: JSON API, static storage and the HTML player.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/auth/login` | Exchange an access code for a token |
//! | `GET`  | `/users/me` | The authenticated user |
//! | `POST` | `/packages` | Upload a `.mag` archive (multipart field `file` or `magFile`) |
//! | `GET`  | `/packages` | List packages, most recent first |
//! | `GET`  | `/packages/{id}` | Package with its assets and references |
//! | `GET`  | `/files/audio[/{id}]` | List / fetch audio assets |
//! | `DELETE` | `/files/audio/{id}` | Delete an audio asset and its file |
//! | `GET`  | `/files/documents[/{id}]` | List / fetch documents |
//! | `DELETE` | `/files/documents/{id}` | Delete a document |
//! | `GET`  | `/files/search?term=` | Case-insensitive substring search |
//! | `GET`  | `/references/{source_id}` | References originating from a document |
//! | `GET`  | `/storage/*` | Extracted files |
//!
//! HTML pages: `/`, `/login`, `/logout`, `/player`, `/upload`,
//! `/player/{id}` and `/arquivos/{id}`.
//!
//! Everything except `/health`, `/auth/login` and the login page requires a
//! token (see [`crate::auth`]).
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "not a valid zip archive" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `capacity` (413), `internal` (500), `insufficient_storage` (507).

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, Request, State},
    http::{header, request::Parts, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::db;
use crate::error::{ErrorKind, PackageError};
use crate::extract::is_package_id;
use crate::ingest::{self, Upload};
use crate::migrate;
use crate::models::{
    AudioAsset, DocumentAsset, Package, PackageContents, Reference, SearchResults, User,
};
use crate::player::{self, Pages};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Catalog,
    pub pages: Arc<Pages>,
}

/// Starts the HTTP server.
///
/// Creates the schema, reconciles the configured users, then binds to
/// `[server].bind` and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let synced = auth::sync_users(&pool, &config.users).await?;
    std::fs::create_dir_all(config.storage.packages_dir()).with_context(|| {
        format!(
            "Failed to create packages directory: {}",
            config.storage.packages_dir().display()
        )
    })?;
    let upload_dir = config.storage.upload_dir();
    std::fs::create_dir_all(&upload_dir).with_context(|| {
        format!("Failed to create upload directory: {}", upload_dir.display())
    })?;

    let state = AppState {
        config: Arc::new(config.clone()),
        catalog: Catalog::new(pool, config.storage.root.clone()),
        pages: Arc::new(Pages::new().context("Failed to compile page templates")?),
    };
    let app = build_router(state)?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, users = synced, "server listening");
    println!("MAG player listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config.server.cors_origins)?;
    let upload_limit = DefaultBodyLimit::max(state.config.limits.max_upload_bytes);

    let storage = Router::new()
        .fallback_service(ServeDir::new(&state.config.storage.root))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/auth/login", post(handle_login))
        .route("/users/me", get(handle_me))
        .route(
            "/packages",
            get(handle_list_packages)
                .post(handle_upload)
                .layer(upload_limit.clone()),
        )
        .route("/packages/{id}", get(handle_get_package))
        .route("/files/audio", get(handle_list_audio))
        .route(
            "/files/audio/{id}",
            get(handle_get_audio).delete(handle_delete_audio),
        )
        .route("/files/documents", get(handle_list_documents))
        .route(
            "/files/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/files/search", get(handle_search))
        .route("/references/{source_id}", get(handle_references))
        .route("/", get(page_index))
        .route("/login", post(page_login))
        .route("/logout", get(page_logout))
        .route("/player", get(page_player_home))
        .route("/upload", post(page_upload).layer(upload_limit))
        .route("/player/{id}", get(page_package_player))
        .route("/arquivos/{id}", get(page_package_files))
        .nest("/storage", storage)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    Ok(app)
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .with_context(|| format!("Invalid CORS origin: {}", o))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<PackageError> for AppError {
    fn from(err: PackageError) -> Self {
        let message = err.to_string();
        match (&err, err.kind()) {
            (PackageError::InsufficientSpace { .. }, _) => AppError::new(
                StatusCode::INSUFFICIENT_STORAGE,
                "insufficient_storage",
                message,
            ),
            (_, ErrorKind::Malformed) => bad_request(message),
            (_, ErrorKind::Policy) => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "capacity", message)
            }
            (_, ErrorKind::Storage) => internal(message),
        }
    }
}

impl From<tera::Error> for AppError {
    fn from(err: tera::Error) -> Self {
        tracing::error!(error = ?err, "page render failed");
        internal(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<PackageError>() {
            Ok(pkg) => pkg.into(),
            Err(other) => {
                tracing::error!(error = %format!("{:#}", other), "request failed");
                internal(format!("{:#}", other))
            }
        }
    }
}

// ============ Authentication ============

/// The caller, resolved from a bearer token or the session cookie.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = auth::token_from_headers(&parts.headers)
            .ok_or_else(|| unauthorized("missing credentials"))?;
        auth::authenticate(state.catalog.pool(), &state.config.auth.secret, &token)
            .await?
            .map(AuthUser)
            .ok_or_else(|| unauthorized("invalid or expired token"))
    }
}

async fn require_auth(_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Auth ============

#[derive(Deserialize)]
struct LoginRequest {
    code: String,
}

async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<auth::Session>, AppError> {
    let auth_config = &state.config.auth;
    auth::login(
        state.catalog.pool(),
        &auth_config.secret,
        auth_config.token_ttl_minutes,
        &req.code,
    )
    .await?
    .map(Json)
    .ok_or_else(|| unauthorized("invalid access code"))
}

async fn handle_me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

// ============ Packages ============

/// Form fields accepted as the uploaded archive.
const UPLOAD_FIELDS: [&str; 2] = ["file", player::UPLOAD_FIELD];

/// Stream the first archive field of `multipart` into a temporary file in
/// the upload staging directory, which is never served.
async fn receive_upload(
    mut multipart: Multipart,
    tmp_dir: &FsPath,
) -> Result<(String, NamedTempFile), AppError> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if !field.name().is_some_and(|n| UPLOAD_FIELDS.contains(&n)) {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("upload field has no file name"))?;

        std::fs::create_dir_all(tmp_dir).map_err(|e| internal(e.to_string()))?;
        let tmp = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(tmp_dir)
            .map_err(|e| internal(e.to_string()))?;
        let std_file = tmp.as_file().try_clone().map_err(|e| internal(e.to_string()))?;
        let mut out = tokio::fs::File::from_std(std_file);

        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            out.write_all(&chunk)
                .await
                .map_err(|e| internal(e.to_string()))?;
        }
        out.flush().await.map_err(|e| internal(e.to_string()))?;

        return Ok((file_name, tmp));
    }
    Err(bad_request("missing upload field 'file'"))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "capacity", err.body_text())
    } else {
        bad_request(err.body_text())
    }
}

async fn ingest_multipart(
    state: &AppState,
    multipart: Multipart,
    user: &User,
) -> Result<PackageContents, AppError> {
    let (file_name, tmp) = receive_upload(multipart, &state.config.storage.upload_dir()).await?;
    tracing::info!(archive = %file_name, user = %user.code, "upload received");
    let contents = ingest::process_upload(
        &state.config,
        &state.catalog,
        Upload {
            file_name,
            path: tmp.path().to_path_buf(),
        },
        &user.code,
    )
    .await?;
    Ok(contents)
}

async fn handle_upload(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<PackageContents>), AppError> {
    let contents = ingest_multipart(&state, multipart, &user).await?;
    Ok((StatusCode::CREATED, Json(contents)))
}

async fn handle_list_packages(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<Package>>, AppError> {
    Ok(Json(state.catalog.list_packages().await?))
}

async fn handle_get_package(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<PackageContents>, AppError> {
    state
        .catalog
        .package_contents(&id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("package not found: {}", id)))
}

// ============ Files ============

async fn handle_list_audio(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<AudioAsset>>, AppError> {
    Ok(Json(state.catalog.list_audio().await?))
}

async fn handle_get_audio(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<AudioAsset>, AppError> {
    state
        .catalog
        .get_audio(&id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("audio not found: {}", id)))
}

async fn handle_delete_audio(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.catalog.delete_audio(&id).await? {
        tracing::info!(audio = %id, user = %user.code, "audio deleted via api");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("audio not found: {}", id)))
    }
}

async fn handle_list_documents(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<DocumentAsset>>, AppError> {
    Ok(Json(state.catalog.list_documents().await?))
}

async fn handle_get_document(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DocumentAsset>, AppError> {
    state
        .catalog
        .get_document(&id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("document not found: {}", id)))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.catalog.delete_document(&id).await? {
        tracing::info!(document = %id, user = %user.code, "document deleted via api");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("document not found: {}", id)))
    }
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    term: String,
}

async fn handle_search(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(q): Query<SearchQuery>,
) -> Result<Json<SearchResults>, AppError> {
    Ok(Json(state.catalog.search(&q.term).await?))
}

async fn handle_references(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(source_id): Path<String>,
) -> Result<Json<Vec<Reference>>, AppError> {
    Ok(Json(state.catalog.references_from(&source_id).await?))
}

// ============ HTML pages ============

async fn page_index(
    State(state): State<AppState>,
    user: Result<AuthUser, AppError>,
) -> Result<Response, AppError> {
    Ok(match user {
        Ok(_) => Redirect::to("/player").into_response(),
        Err(_) => Html(state.pages.login(None)?).into_response(),
    })
}

#[derive(Deserialize)]
struct LoginForm {
    code: String,
}

async fn page_login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let auth_config = &state.config.auth;
    let session = auth::login(
        state.catalog.pool(),
        &auth_config.secret,
        auth_config.token_ttl_minutes,
        &form.code,
    )
    .await?;

    Ok(match session {
        Some(session) => (
            [(
                header::SET_COOKIE,
                auth::session_cookie(&session.token, auth_config.token_ttl_minutes),
            )],
            Redirect::to("/player"),
        )
            .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Html(state.pages.login(Some("Invalid access code. Try again."))?),
        )
            .into_response(),
    })
}

async fn page_logout() -> Response {
    (
        [(header::SET_COOKIE, auth::clear_cookie())],
        Redirect::to("/"),
    )
        .into_response()
}

async fn page_player_home(
    State(state): State<AppState>,
    user: Result<AuthUser, AppError>,
) -> Result<Response, AppError> {
    let Ok(AuthUser(user)) = user else {
        return Ok(Redirect::to("/").into_response());
    };
    let packages = state.catalog.list_packages().await?;
    Ok(Html(state.pages.player_home(&user, &packages, None)?).into_response())
}

async fn page_upload(
    State(state): State<AppState>,
    user: Result<AuthUser, AppError>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let Ok(AuthUser(user)) = user else {
        return Ok(Redirect::to("/").into_response());
    };

    match ingest_multipart(&state, multipart, &user).await {
        Ok(contents) => {
            Ok(Redirect::to(&format!("/player/{}", contents.package.id)).into_response())
        }
        Err(err) => {
            let packages = state.catalog.list_packages().await?;
            let page = state.pages.player_home(&user, &packages, Some(&err.message))?;
            Ok((err.status, Html(page)).into_response())
        }
    }
}

async fn load_page_contents(
    state: &AppState,
    id: &str,
) -> Result<Result<PackageContents, Response>, AppError> {
    let contents = if is_package_id(id) {
        state.catalog.package_contents(id).await?
    } else {
        None
    };
    match contents {
        Some(contents) => Ok(Ok(contents)),
        None => {
            let page = state.pages.not_found("Package not found")?;
            Ok(Err((StatusCode::NOT_FOUND, Html(page)).into_response()))
        }
    }
}

async fn page_package_player(
    State(state): State<AppState>,
    user: Result<AuthUser, AppError>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let Ok(AuthUser(user)) = user else {
        return Ok(Redirect::to("/").into_response());
    };
    Ok(match load_page_contents(&state, &id).await? {
        Ok(contents) => Html(state.pages.package_player(&user, &contents)?).into_response(),
        Err(missing) => missing,
    })
}

async fn page_package_files(
    State(state): State<AppState>,
    user: Result<AuthUser, AppError>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let Ok(AuthUser(user)) = user else {
        return Ok(Redirect::to("/").into_response());
    };
    Ok(match load_page_contents(&state, &id).await? {
        Ok(contents) => Html(state.pages.package_files(&user, &contents)?).into_response(),
        Err(missing) => missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_error_mapping() {
        let e: AppError = PackageError::EmptyUpload.into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        assert_eq!(e.code, "bad_request");

        let e: AppError = PackageError::PackageTooLarge {
            declared: 10,
            limit: 5,
        }
        .into();
        assert_eq!(e.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(e.code, "capacity");

        let e: AppError = PackageError::InsufficientSpace {
            required: 10,
            usable: 5,
        }
        .into();
        assert_eq!(e.status, StatusCode::INSUFFICIENT_STORAGE);

        let e: AppError = PackageError::storage(
            "/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        )
        .into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.code, "internal");
    }

    #[test]
    fn test_anyhow_downcast_keeps_kind() {
        let err = anyhow::Error::from(PackageError::UnsupportedUpload("a.tar".into()));
        let e: AppError = err.into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let e: AppError = anyhow::anyhow!("database is locked").into();
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_cors_rejects_invalid_origin() {
        assert!(cors_layer(&["http://localhost:3000".to_string()]).is_ok());
        assert!(cors_layer(&["bad\norigin".to_string()]).is_err());
    }
}
