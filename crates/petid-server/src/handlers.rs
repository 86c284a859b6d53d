use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};

use crate::middleware::{bearer_token, error_response};
use crate::server::AppState;

/// Revoke the caller's Bearer token until its natural expiry.
///
/// The `exp` claim is read without verifying the signature; verification
/// happens in the authentication layer. Tokens without a readable `exp` are
/// revoked for the configured default token lifetime.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Authentication required",
        );
    };

    let now_ms = state.store.clock().now_ms();
    let lifetime_ms = (state.auth.default_token_lifetime_secs as i64).saturating_mul(1000);
    let expires_at_ms = token_expiry_ms(token).unwrap_or_else(|| now_ms.saturating_add(lifetime_ms));

    state.registry.revoke(token, expires_at_ms).await;
    tracing::info!("Token revoked on logout");

    Json(json!({ "success": true })).into_response()
}

/// `exp` claim of a JWT in epoch milliseconds.
///
/// `exp` is a NumericDate and may carry a fractional part; it is floored to
/// whole seconds.
pub fn token_expiry_ms(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?;
    let secs = match exp.as_i64() {
        Some(secs) => secs,
        None => {
            let secs = exp.as_f64()?.floor();
            if !secs.is_finite() || secs < i64::MIN as f64 || secs > i64::MAX as f64 {
                return None;
            }
            secs as i64
        }
    };
    secs.checked_mul(1000)
}

/// Liveness plus cache tier health. Always 200: a degraded cache is not an
/// outage.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let cache = state.store.health().await;
    Json(json!({
        "status": "ok",
        "cache": cache,
    }))
}

pub async fn metrics() -> Response {
    match crate::metrics::render_metrics() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
