use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::{reject, ApiResult};
use crate::api::{
    auth::AuthUser,
    state::AppState,
    types::{WithdrawRequest, WithdrawalResponse},
};

/// POST /api/user/balance/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<WithdrawRequest>,
) -> ApiResult<StatusCode> {
    state
        .withdrawals
        .create(&req.order, req.sum, user_id)
        .await
        .map_err(reject)?;
    Ok(StatusCode::OK)
}

/// GET /api/user/withdrawals
pub async fn get_withdrawals(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Response> {
    let withdrawals = state
        .withdrawals
        .read_all_by_user(user_id)
        .await
        .map_err(reject)?;

    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let body: Vec<WithdrawalResponse> = withdrawals
        .into_iter()
        .map(WithdrawalResponse::from)
        .collect();
    Ok(Json(body).into_response())
}
