pub mod auth;
pub mod payouts;
pub mod summary;
pub mod teachers;
pub mod transactions;

use crate::health::{check_health, IntegrityChecker, StoreChecker};
use crate::services::IntegrityAlert;
use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store = StoreChecker::new(state.store.clone());
    let integrity = IntegrityChecker::new(state.integrity.clone());
    let report = check_health(&store, &integrity, state.started_at).await;

    // Return 503 if the store is down, 200 otherwise
    let status_code = if report.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(report))
}

/// Integrity alerts raised since startup, newest first.
pub async fn integrity_alerts(State(state): State<AppState>) -> Json<Vec<IntegrityAlert>> {
    Json(state.integrity.recent().await)
}
