use anyhow::Result;
use axum::{
    extract::Extension,
    routing::{delete, get, post},
    Router,
};
use std::env;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing;

use crate::handlers::{self, ApiState};

pub async fn run(state: ApiState) -> Result<()> {
    let host = state.ctx.config.server.host.clone();
    let port = state.ctx.config.server.port;

    let cors_layer = if let Ok(origins) = env::var("CORS_ORIGINS") {
        let mut cors = CorsLayer::new();
        for origin in origins.split(',').map(|s| s.trim()) {
            if let Ok(parsed) = origin.parse::<axum::http::HeaderValue>() {
                cors = cors.allow_origin(parsed);
            }
        }
        cors.allow_methods(Any).allow_headers(Any)
    } else {
        tracing::warn!("CORS_ORIGINS not set, using permissive CORS");
        CorsLayer::permissive()
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/appointments/add", post(handlers::add_appointments))
        .route("/appointments/delete/:id", delete(handlers::delete_appointment))
        .route("/appointments/available", get(handlers::available_appointments))
        .route("/appointments/booked", get(handlers::booked_appointments))
        .route("/appointments/all", get(handlers::all_appointments))
        .route("/appointments/book/:id", post(handlers::book_appointment))
        .route("/appointments/status/:id", post(handlers::set_appointment_status))
        .route("/users/register", post(handlers::register_user))
        .route("/users/:userName", get(handlers::get_user))
        .route("/users", get(handlers::list_users))
        .route("/admin/set-category", post(handlers::set_category))
        .route("/high-demand/setup", post(handlers::setup_high_demand))
        .route("/high-demand", get(handlers::get_high_demand))
        .route("/webhook", post(handlers::webhook))
        .layer(ServiceBuilder::new().layer(Extension(state)).layer(cors_layer));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
