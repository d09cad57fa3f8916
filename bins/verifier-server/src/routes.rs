// Router configuration for the verifier server

use std::sync::Arc;

use axum::{middleware, routing::any, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", any(handlers::index))
        .route("/:runtime", any(handlers::verify))
}

/// Routes plus access logging and `Access-Control-Allow-Origin: *`
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes())
        .layer(middleware::from_fn(handlers::log_access))
        .layer(cors)
        .with_state(state)
}
