use axum::{
    extract::State,
    http::{
        header::{AUTHORIZATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    Json,
};

use super::{reject, ApiResult};
use crate::api::{
    auth::{build_session_cookie, AuthUser},
    state::AppState,
    types::CredentialsRequest,
};
use crate::domain::{Balance, User};
use crate::error::LedgerError;

fn session_headers(state: &AppState, user: &User) -> ApiResult<HeaderMap> {
    let token = state.sessions.issue(user.id).map_err(reject)?;

    let cookie = build_session_cookie(&token, state.sessions.ttl());
    let cookie_value = HeaderValue::from_str(&cookie).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to build auth cookie: {}", e),
        )
    })?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to build auth header: {}", e),
        )
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie_value);
    headers.insert(AUTHORIZATION, bearer);
    Ok(headers)
}

/// Malformed credentials are a bad request here, not an unprocessable one
fn reject_credentials(err: LedgerError) -> (StatusCode, String) {
    match err {
        LedgerError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
        other => reject(other),
    }
}

/// POST /api/user/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> ApiResult<(StatusCode, HeaderMap)> {
    let user = state
        .users
        .register(&req.login, &req.password)
        .await
        .map_err(reject_credentials)?;
    Ok((StatusCode::OK, session_headers(&state, &user)?))
}

/// POST /api/user/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> ApiResult<(StatusCode, HeaderMap)> {
    let user = state
        .users
        .authenticate(&req.login, &req.password)
        .await
        .map_err(reject_credentials)?;
    Ok((StatusCode::OK, session_headers(&state, &user)?))
}

/// GET /api/user/balance
pub async fn get_balance(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<Balance>> {
    let balance = state.users.balance(user_id).await.map_err(reject)?;
    Ok(Json(balance))
}
