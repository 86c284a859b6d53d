use std::net::SocketAddr;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use petid_cache::{Admission, PolicyKind};
use serde_json::json;

use crate::server::AppState;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

// =============================================================================
// Rate Limiting Middleware
// =============================================================================

/// Route class of a request path. Paths outside `/api` are not limited.
pub fn policy_for_path(path: &str) -> Option<PolicyKind> {
    let rest = path.strip_prefix("/api")?;
    if !(rest.is_empty() || rest.starts_with('/')) {
        return None;
    }

    let in_section = |section: &str| {
        rest.strip_prefix(section)
            .is_some_and(|tail| tail.is_empty() || tail.starts_with('/'))
    };

    if in_section("/auth") {
        Some(PolicyKind::Auth)
    } else if in_section("/uploads") {
        Some(PolicyKind::Upload)
    } else {
        Some(PolicyKind::Standard)
    }
}

/// Identity a request is counted against: the first `X-Forwarded-For` hop,
/// else the peer address, else `"unknown"`.
pub fn client_identity(req: &Request<Body>) -> String {
    let forwarded = req
        .headers()
        .get(X_FORWARDED_FOR)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Counts every `/api` request against its route class budget.
///
/// Rejected requests get HTTP 429 with the policy message. Admitted ones
/// carry `X-RateLimit-*` headers.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(kind) = policy_for_path(req.uri().path()) else {
        return next.run(req).await;
    };

    let client = client_identity(&req);
    let limiter = state.limiters.get(kind);
    let admission = limiter.admit(&client).await;

    if !admission.allowed {
        tracing::info!(
            policy = %kind,
            client = %client,
            total_hits = admission.total_hits,
            "Request rejected by rate limit"
        );
        let mut response = error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMIT",
            &limiter.policy().message,
        );
        apply_rate_limit_headers(response.headers_mut(), &admission);
        response.headers_mut().insert(
            header::RETRY_AFTER,
            HeaderValue::from(limiter.policy().window_secs()),
        );
        return response;
    }

    let mut response = next.run(req).await;
    apply_rate_limit_headers(response.headers_mut(), &admission);
    response
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, admission: &Admission) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(admission.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(admission.remaining()));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(admission.reset_at.unix_timestamp()),
    );
}

// =============================================================================
// Revocation Middleware
// =============================================================================

/// Rejects requests whose Bearer token has been revoked.
///
/// Requests without a token pass through; verifying tokens is the job of
/// the authentication layer behind this one.
pub async fn revocation_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // Owned: the request body is not Sync, so no borrow of it may cross an await
    let token = bearer_token(req.headers()).map(str::to_owned);
    if let Some(token) = token {
        if state.registry.is_revoked(&token).await {
            tracing::debug!(path = %req.uri().path(), "Request with revoked token rejected");
            return error_response(
                StatusCode::UNAUTHORIZED,
                "TOKEN_REVOKED",
                "Token has been revoked",
            );
        }
    }
    next.run(req).await
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// `{ "success": false, "error": { "code", "message" } }`
pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = json!({
        "success": false,
        "error": {
            "code": code,
            "message": message,
        }
    });
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_for_path() {
        assert_eq!(policy_for_path("/api/auth/login"), Some(PolicyKind::Auth));
        assert_eq!(policy_for_path("/api/auth"), Some(PolicyKind::Auth));
        assert_eq!(policy_for_path("/api/uploads/photo"), Some(PolicyKind::Upload));
        assert_eq!(policy_for_path("/api/pets/12"), Some(PolicyKind::Standard));
        assert_eq!(policy_for_path("/api/authors"), Some(PolicyKind::Standard));
        assert_eq!(policy_for_path("/api"), Some(PolicyKind::Standard));
        assert_eq!(policy_for_path("/apiary"), None);
        assert_eq!(policy_for_path("/health"), None);
    }

    #[test]
    fn test_client_identity_prefers_forwarded_for() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_identity(&req), "203.0.113.7");
    }

    #[test]
    fn test_client_identity_falls_back_to_peer() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 5555))));
        assert_eq!(client_identity(&req), "192.0.2.1");

        let bare = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_identity(&bare), "unknown");
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);
    }
}
