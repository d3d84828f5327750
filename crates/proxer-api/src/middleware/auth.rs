//! HTTP Basic authentication for the admin surface.
//!
//! The spec's only admin auth surface is a super-admin username/password
//! pair (spec §6 `super_admin_username`/`super_admin_password`); there is
//! no session or token concept to maintain, so Basic auth checked against
//! an Argon2id hash on every request is sufficient.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use base64::Engine as _;
use std::sync::Arc;

use crate::models::ErrorResponse;
use crate::AppState;

fn unauthorized() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "unauthorized".to_string(),
            message: "admin credentials missing or incorrect".to_string(),
            tenant_id: None,
            route_id: None,
            plan_id: None,
        }),
    )
}

fn parse_basic_auth(request: &Request) -> Option<(String, String)> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let Some((username, password)) = parse_basic_auth(&request) else {
        return Err(unauthorized());
    };
    if !proxer_auth::constant_time_eq(username.as_bytes(), state.super_admin_username.as_bytes()) {
        return Err(unauthorized());
    }
    match proxer_auth::verify_password(&password, &state.super_admin_password_hash) {
        Ok(true) => Ok(next.run(request).await),
        _ => Err(unauthorized()),
    }
}
