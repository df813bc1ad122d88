use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::Router;
use chatsync::handlers::{matchmaker_router, MatchBoard};
use chatsync::{utils, Config};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_logging();

    let port = Config::stub_port_from_env();
    let app = create_router();

    let listener = tokio::net::TcpListener::bind(&format!("0.0.0.0:{}", port)).await?;
    tracing::info!("🚀 Matchmaker stub running on port {}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

fn create_router() -> Router {
    let board = Arc::new(Mutex::new(MatchBoard::new()));
    matchmaker_router(board).layer(create_cors_layer())
}

fn create_cors_layer() -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    // ALLOWED_ORIGINS is a comma separated list; anything goes when unset
    let origins: Vec<HeaderValue> = std::env::var("ALLOWED_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(origins)
    }
}
