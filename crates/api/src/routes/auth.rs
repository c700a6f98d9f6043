//! Administrator login.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use store::ReservationStore;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub token_type: &'static str,
}

/// POST /auth/login: exchange administrator credentials for the API token.
#[tracing::instrument(skip_all)]
pub async fn login<S: ReservationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Some(admin) = state.admin.as_ref() else {
        tracing::warn!("login attempted but administrator credentials are not configured");
        return Err(ApiError::Unauthorized);
    };

    let token = admin.token().expose().to_string();
    let admin = admin.clone();
    let accepted = tokio::task::spawn_blocking(move || admin.verify(&req.email, &req.password))
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "password verification task failed");
            false
        });
    if !accepted {
        tracing::warn!("administrator login rejected");
        metrics::counter!("admin_logins_total", "result" => "rejected").increment(1);
        return Err(ApiError::Unauthorized);
    }

    metrics::counter!("admin_logins_total", "result" => "accepted").increment(1);
    Ok(Json(LoginResponse {
        success: true,
        token,
        token_type: "Bearer",
    }))
}
