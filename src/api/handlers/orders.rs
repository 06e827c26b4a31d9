use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::{reject, ApiResult};
use crate::api::{auth::AuthUser, state::AppState, types::OrderResponse};
use crate::domain::SubmitOutcome;

/// POST /api/user/orders
///
/// Body is the bare order number as `text/plain`. 202 when newly accepted,
/// 200 when this user already submitted it.
pub async fn submit_order(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    headers: HeaderMap,
    body: String,
) -> ApiResult<StatusCode> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/plain");
    if !content_type.starts_with("text/plain") {
        return Err((
            StatusCode::BAD_REQUEST,
            "order number must be sent as text/plain".to_string(),
        ));
    }
    if body.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "order number is required".to_string(),
        ));
    }

    match state.orders.create(&body, user_id).await.map_err(reject)? {
        SubmitOutcome::Created(_) => Ok(StatusCode::ACCEPTED),
        SubmitOutcome::AlreadyRegistered(_) => Ok(StatusCode::OK),
    }
}

/// GET /api/user/orders
pub async fn get_orders(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Response> {
    let orders = state
        .orders
        .read_all_by_user(user_id)
        .await
        .map_err(reject)?;

    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let body: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(body).into_response())
}
