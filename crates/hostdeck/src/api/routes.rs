//! API route definitions.

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers::{self, files, logs, scripts, terminal};
use super::session::session_middleware;
use super::state::AppState;

/// Headroom for multipart framing on top of the upload limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);
    let max_body_size =
        usize::try_from(state.config.files.max_upload_size).unwrap_or(usize::MAX)
            .saturating_add(MULTIPART_OVERHEAD);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let api_routes = Router::new()
        // Scripts and jobs
        .route("/scripts", get(scripts::list_scripts))
        .route("/scripts/run", post(scripts::run_script))
        .route("/scripts/upload", post(scripts::upload_script))
        .route("/scripts/{name}", get(scripts::script_status))
        .route("/scripts/{name}/stop", post(scripts::stop_script))
        .route("/jobs", get(scripts::list_jobs))
        // Terminal
        .route("/terminal", get(terminal::get_terminal))
        .route("/terminal/exec", post(terminal::exec_command))
        .route("/terminal/clear", post(terminal::clear_terminal))
        .route("/terminal/reset", post(terminal::reset_terminal))
        // Files
        .route("/files", get(files::browse))
        .route("/files/view", get(files::view_file))
        .route("/files/edit", put(files::edit_file))
        .route("/files/upload", post(files::upload_file))
        .route("/files/download", get(files::download_file))
        .route("/files/backup", get(files::backup))
        // Logs
        .route("/logs", get(logs::list_logs))
        .route("/logs/tail", get(logs::tail_log))
        .layer(middleware::from_fn(session_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(cors)
        .layer(trace_layer)
        .with_state(state)
}

/// Build the CORS layer from configured origins.
///
/// With no origins configured only same-origin requests are possible.
fn build_cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("CORS: Invalid origin in config: {}", origin);
                None
            })
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::new();
    }

    tracing::info!("CORS: Allowing {} origin(s)", origins.len());
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN, header::COOKIE])
        .allow_credentials(true)
}
