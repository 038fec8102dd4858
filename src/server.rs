use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    balance::handlers::{get_balance, list_withdrawals, withdraw},
    bootstrap::AppState,
    error::{AppError, AppResult},
    orders::handlers::{list_orders, upload_order},
};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// GET /health
pub async fn health_check(State(_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    })
}

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api/user",
            Router::new()
                .route("/orders", post(upload_order).get(list_orders))
                .route("/balance", get(get_balance))
                .route("/balance/withdraw", post(withdraw))
                .route("/withdrawals", get(list_withdrawals)),
        )
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server<F>(app: Router, bind_address: &str, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| AppError::Config(format!("cannot bind {}: {}", bind_address, e)))?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AppError::Internal(format!("http server: {}", e)))?;

    info!("✓ HTTP server stopped");
    Ok(())
}
