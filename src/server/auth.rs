use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use serde::Serialize;

use super::{AppState, AuthUser, Envelope, ValidatedJson};
use crate::domain::auth::{LoginRequest, Session};
use crate::domain::{Role, User};
use crate::error::Result;
use crate::validation::Validated;

impl Validated for LoginRequest {
    const SCHEMA: &'static str = "login";
}

#[derive(Serialize)]
struct Me {
    user: User,
    roles: Vec<Role>,
    capabilities: Vec<String>,
}

#[derive(Serialize)]
struct LoggedOut {
    logged_out: bool,
}

async fn login(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<LoginRequest>,
) -> Result<Envelope<Session>> {
    let user = state
        .storage
        .authenticate(&body.email, &body.password)
        .await?;
    let session = state
        .storage
        .create_session(user, state.config.auth.token_ttl_hours)
        .await?;
    Ok(Envelope::ok(session))
}

async fn logout(State(state): State<AppState>, auth: AuthUser) -> Result<Envelope<LoggedOut>> {
    state.storage.revoke_session(&auth.token).await?;
    Ok(Envelope::ok(LoggedOut { logged_out: true }))
}

async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<Envelope<Me>> {
    let roles = state.storage.user_roles(&auth.user.id).await?;
    Ok(Envelope::ok(Me {
        user: auth.user,
        roles,
        capabilities: auth.capabilities,
    }))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}
