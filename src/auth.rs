// Optional Bearer token authentication middleware.
// If AUTH_SECRET env is set, all protected routes require
// `Authorization: Bearer <secret>`. If not set, auth is disabled (dev mode).
//
// The cron endpoint uses a separate secret (CRON_SECRET) compared in
// constant time — see `check_cron_token`.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Middleware that enforces Bearer token auth when AUTH_SECRET is configured.
/// Public routes (health, readiness, cron) should NOT use this middleware.
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let secret = match state.auth_secret.as_deref() {
        Some(s) => s,
        None => return Ok(next.run(request).await), // Dev mode — no auth required
    };

    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(header) if header.starts_with("Bearer ") => {
            let token = &header[7..];
            if token.as_bytes().ct_eq(secret.as_bytes()).into() {
                Ok(next.run(request).await)
            } else {
                tracing::warn!("Auth failed: invalid token");
                Err(StatusCode::UNAUTHORIZED)
            }
        }
        _ => {
            tracing::warn!("Auth failed: missing or malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Outcome of validating the cron bearer token.
#[derive(Debug, PartialEq, Eq)]
pub enum CronAuth {
    Ok,
    /// CRON_SECRET is not configured on this deployment.
    Disabled,
    Invalid,
}

/// Compare the `Authorization: Bearer` header against CRON_SECRET in
/// constant time.
pub fn check_cron_token(auth_header: Option<&str>, cron_secret: Option<&str>) -> CronAuth {
    let Some(secret) = cron_secret else {
        return CronAuth::Disabled;
    };

    match auth_header {
        Some(header) if header.starts_with("Bearer ") => {
            let token = &header[7..];
            if token.as_bytes().ct_eq(secret.as_bytes()).into() {
                CronAuth::Ok
            } else {
                CronAuth::Invalid
            }
        }
        _ => CronAuth::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_token_matches() {
        assert_eq!(
            check_cron_token(Some("Bearer s3cret"), Some("s3cret")),
            CronAuth::Ok
        );
    }

    #[test]
    fn cron_token_mismatch() {
        assert_eq!(
            check_cron_token(Some("Bearer wrong"), Some("s3cret")),
            CronAuth::Invalid
        );
        assert_eq!(check_cron_token(None, Some("s3cret")), CronAuth::Invalid);
        assert_eq!(
            check_cron_token(Some("Token s3cret"), Some("s3cret")),
            CronAuth::Invalid
        );
    }

    #[test]
    fn cron_disabled_without_secret() {
        assert_eq!(check_cron_token(Some("Bearer x"), None), CronAuth::Disabled);
    }
}
