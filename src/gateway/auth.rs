//! Request identity.
//!
//! Users are authenticated by the upstream proxy, which forwards the result
//! in trusted headers. These middlewares turn those headers into an
//! [`AuthenticatedUser`] extension and guard the admin routes.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::state::AppState;
use super::types::{ApiError, error_codes};
use crate::core_types::{PlanTier, UserId};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_PLAN_HEADER: &str = "x-user-plan";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub plan: PlanTier,
    pub email: String,
}

impl AuthenticatedUser {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);

        let user_id = header(USER_ID_HEADER)
            .ok_or_else(|| ApiError::unauthorized("Missing X-User-Id header"))?
            .parse::<UserId>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| {
                ApiError::new(
                    axum::http::StatusCode::UNAUTHORIZED,
                    error_codes::AUTH_FAILED,
                    "Invalid X-User-Id header",
                )
            })?;

        let plan = match header(USER_PLAN_HEADER) {
            Some(raw) if !raw.is_empty() => raw.parse::<PlanTier>().map_err(ApiError::bad_request)?,
            _ => PlanTier::Free,
        };

        Ok(Self {
            user_id,
            plan,
            email: header(USER_EMAIL_HEADER).unwrap_or_default().to_string(),
        })
    }
}

pub async fn identity_middleware(mut request: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let user = AuthenticatedUser::from_headers(request.headers())?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

pub async fn admin_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = state
        .admin_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::forbidden("Admin API disabled"))?;

    let supplied = request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !token_matches(supplied, expected) {
        tracing::warn!(security = true, path = %request.uri().path(), "Admin token rejected");
        return Err(ApiError::forbidden("Invalid admin token"));
    }
    Ok(next.run(request).await)
}

/// Compare fixed-length digests so neither content nor length leaks.
fn token_matches(supplied: &str, expected: &str) -> bool {
    let supplied = Sha256::digest(supplied.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    supplied.as_slice().ct_eq(expected.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        h
    }

    #[test]
    fn test_identity_from_headers() {
        let user = AuthenticatedUser::from_headers(&headers(&[
            (USER_ID_HEADER, "42"),
            (USER_PLAN_HEADER, "pro"),
            (USER_EMAIL_HEADER, "a@b.co"),
        ]))
        .unwrap();
        assert_eq!(user.user_id, 42);
        assert_eq!(user.plan, PlanTier::Pro);
        assert_eq!(user.email, "a@b.co");

        let user = AuthenticatedUser::from_headers(&headers(&[(USER_ID_HEADER, "7")])).unwrap();
        assert_eq!(user.plan, PlanTier::Free);
    }

    #[test]
    fn test_identity_rejections() {
        let e = AuthenticatedUser::from_headers(&HeaderMap::new()).unwrap_err();
        assert_eq!(e.code, error_codes::MISSING_AUTH);
        let e = AuthenticatedUser::from_headers(&headers(&[(USER_ID_HEADER, "abc")])).unwrap_err();
        assert_eq!(e.code, error_codes::AUTH_FAILED);
        let e = AuthenticatedUser::from_headers(&headers(&[(USER_ID_HEADER, "1"), (USER_PLAN_HEADER, "gold")]))
            .unwrap_err();
        assert_eq!(e.code, error_codes::INVALID_PARAMETER);
    }

    #[test]
    fn test_token_matches() {
        assert!(token_matches("secret", "secret"));
        assert!(!token_matches("secret", "secreT"));
        assert!(!token_matches("secret", "secret!"));
        assert!(!token_matches("", "secret"));
    }
}
