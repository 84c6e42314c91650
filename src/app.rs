use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    response::Redirect,
    routing::{get, post},
};
use log::info;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::backend::{Backend, SupabaseClient};
use crate::config::Config;
use crate::login::{self, DASHBOARD_PATH, SessionStore};
use crate::views::Views;
use crate::{import, schedule, settings};

/// State shared by every handler
pub struct AppState {
    pub config: Config,
    pub backend: Arc<dyn Backend>,
    pub sessions: SessionStore,
    pub views: Views,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(AppState {
            config,
            backend,
            sessions: SessionStore::new(),
            views: Views::new()?,
        })
    }
}

/// Build the application router
///
/// `/` is the sign-in screen; everything under `/app` requires a session.
pub fn router(state: SharedState) -> Router {
    let shell = Router::new()
        .route("/", get(to_dashboard))
        .route(
            "/dashboard",
            get(schedule::serve_dashboard).post(schedule::handle_save),
        )
        .route(
            "/config",
            get(settings::serve_config).post(settings::handle_logo_upload),
        )
        .route(
            "/import",
            get(import::serve_import).post(import::handle_upload),
        )
        .route("/import/confirm", post(import::handle_confirm))
        .fallback(to_dashboard)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            login::require_auth,
        ));

    Router::new()
        .route("/", get(login::serve_home))
        .route("/auth/magic-link", post(login::handle_magic_link))
        .route("/auth/confirm", get(login::handle_confirm))
        .route("/logout", post(login::handle_logout))
        .nest("/app", shell)
        .nest_service("/static", ServeDir::new(&state.config.static_dir))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .with_state(state)
}

async fn to_dashboard() -> Redirect {
    Redirect::to(DASHBOARD_PATH)
}

/// Start the web server
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let backend = SupabaseClient::new(&config)?;
    let bind = config.bind;
    let state = Arc::new(AppState::new(config, Arc::new(backend))?);
    let app = router(state);

    let listener = TcpListener::bind(bind).await?;
    info!("Listening on http://{}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}
