use http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes::{connect, hooks};
use crate::ServerState;

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState) -> Router {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_origin(Any);

        Router::new()
            .route("/", get(health))
            .route("/connect/google", post(connect::connect_google))
            .route("/connect/google/callback", get(connect::oauth_callback))
            .route("/scan/rescan", post(connect::request_rescan))
            .route("/hooks/revocation", post(hooks::revocation))
            .route("/hooks/suggestion_created", post(hooks::suggestion_created))
            .fallback(not_found)
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(state)
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
