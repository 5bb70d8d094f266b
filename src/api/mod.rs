use crate::config::RelayConfig;
use crate::core::traits::ChatBackend;
use axum::Router;
use axum::response::Html;
use axum::routing::get;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;

pub mod chat;

/// Shared, read-only dependencies handed to every connection.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn ChatBackend>,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(backend: Arc<dyn ChatBackend>, config: Arc<RelayConfig>) -> Self {
        Self { backend, config }
    }
}

/// Full application: chat page, its static assets and the relay endpoint.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .nest_service(
            "/static",
            ServiceBuilder::new().service(ServeDir::new("static")),
        )
        .merge(chat::router())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}
