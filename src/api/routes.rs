use axum::{
    routing::{get, post},
    Router,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::api::{handlers, state::AppState};

pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // User endpoints
        .route("/api/user/register", post(handlers::register))
        .route("/api/user/login", post(handlers::login))
        // Order endpoints
        .route(
            "/api/user/orders",
            post(handlers::submit_order).get(handlers::get_orders),
        )
        // Balance endpoints
        .route("/api/user/balance", get(handlers::get_balance))
        .route("/api/user/balance/withdraw", post(handlers::withdraw))
        .route("/api/user/withdrawals", get(handlers::get_withdrawals))
        // System endpoints
        .route("/api/health", get(handlers::health))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
