use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, header::COOKIE, request::Parts, HeaderMap, StatusCode};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::api::state::AppState;
use crate::error::{LedgerError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "auth";

/// Signs and checks session tokens of the form `user_id.expires_at.signature`
#[derive(Clone)]
pub struct SessionKeys {
    secret: Arc<Vec<u8>>,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: Arc::new(secret.as_bytes().to_vec()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `user_id` valid for the configured TTL
    pub fn issue(&self, user_id: i64) -> Result<String> {
        self.issue_at(user_id, Utc::now().timestamp())
    }

    /// Check signature and expiry; returns the user id
    pub fn verify(&self, token: &str) -> Result<i64> {
        self.verify_at(token, Utc::now().timestamp())
    }

    fn issue_at(&self, user_id: i64, now: i64) -> Result<String> {
        let expires_at = now + self.ttl.as_secs() as i64;
        let payload = format!("{}.{}", user_id, expires_at);
        let signature = self.mac(&payload)?.finalize().into_bytes();
        Ok(format!("{}.{}", payload, hex::encode(signature)))
    }

    fn verify_at(&self, token: &str, now: i64) -> Result<i64> {
        let (payload, signature) = token
            .rsplit_once('.')
            .ok_or_else(|| LedgerError::Auth("malformed token".to_string()))?;
        let signature = hex::decode(signature)
            .map_err(|_| LedgerError::Auth("malformed token signature".to_string()))?;

        self.mac(payload)?
            .verify_slice(&signature)
            .map_err(|_| LedgerError::Auth("invalid token signature".to_string()))?;

        let (user_id, expires_at) = payload
            .split_once('.')
            .ok_or_else(|| LedgerError::Auth("malformed token".to_string()))?;
        let user_id: i64 = user_id
            .parse()
            .map_err(|_| LedgerError::Auth("malformed token".to_string()))?;
        let expires_at: i64 = expires_at
            .parse()
            .map_err(|_| LedgerError::Auth("malformed token".to_string()))?;

        if expires_at <= now {
            return Err(LedgerError::Auth("token expired".to_string()));
        }
        Ok(user_id)
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| LedgerError::Internal(format!("HMAC init failed: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }
}

pub fn build_session_cookie(token: &str, ttl: Duration) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        SESSION_COOKIE,
        token,
        ttl.as_secs()
    )
}

fn extract_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key.trim() == cookie_name).then(|| value.trim().to_string())
    })
}

fn extract_bearer_token(raw: &str) -> Option<&str> {
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::trim)
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    extract_cookie(headers, SESSION_COOKIE).or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer_token)
            .map(str::to_string)
    })
}

/// Authenticated caller, taken from the `auth` cookie or a bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub i64);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let Some(token) = session_token(&parts.headers) else {
            return Err((StatusCode::UNAUTHORIZED, "missing session token".to_string()));
        };

        state.sessions.verify(&token).map(AuthUser).map_err(|e| {
            debug!("Rejected session token: {}", e);
            (StatusCode::UNAUTHORIZED, "invalid session token".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn keys() -> SessionKeys {
        SessionKeys::new("test-secret", Duration::from_secs(3600))
    }

    #[test]
    fn test_issue_and_verify() {
        let keys = keys();
        let token = keys.issue_at(42, 1_000).unwrap();
        assert!(token.starts_with("42.4600."));
        assert_eq!(keys.verify_at(&token, 1_001).unwrap(), 42);
    }

    #[test]
    fn test_expired_token() {
        let keys = keys();
        let token = keys.issue_at(42, 1_000).unwrap();
        assert!(matches!(
            keys.verify_at(&token, 4_600),
            Err(LedgerError::Auth(_))
        ));
    }

    #[test]
    fn test_tampered_token() {
        let keys = keys();
        let token = keys.issue_at(42, 1_000).unwrap();
        let forged = token.replacen("42.", "43.", 1);
        assert!(keys.verify_at(&forged, 1_001).is_err());

        let other = SessionKeys::new("other-secret", Duration::from_secs(3600));
        assert!(other.verify_at(&token, 1_001).is_err());
        assert!(keys.verify_at("garbage", 1_001).is_err());
    }

    #[test]
    fn test_token_from_cookie_or_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; auth=abc.def"));
        assert_eq!(session_token(&headers).as_deref(), Some("abc.def"));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(session_token(&headers).as_deref(), Some("xyz"));

        assert_eq!(session_token(&HeaderMap::new()), None);
    }
}
