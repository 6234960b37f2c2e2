use axum::{
    extract::{Path, State},
    routing::{get, put},
    Router,
};

use super::envelope::Deleted;
use super::extract::IdList;
use super::{AppState, AuthUser, Envelope, QueryParams, ValidatedJson};
use crate::domain::auth::{
    check_password, NewPolicy, NewRole, NewUser, PolicyPatch, RolePatch, UserPatch,
};
use crate::domain::{Page, Policy, Role, User};
use crate::error::{ApiError, Result};
use crate::validation::Validated;

const USERS_READ: &str = "users:read";
const USERS_WRITE: &str = "users:write";
const ROLES_READ: &str = "roles:read";
const ROLES_WRITE: &str = "roles:write";
const POLICIES_READ: &str = "policies:read";
const POLICIES_WRITE: &str = "policies:write";

impl Validated for NewUser {
    const SCHEMA: &'static str = "user.create";
}

impl Validated for UserPatch {
    const SCHEMA: &'static str = "user.update";
}

impl Validated for NewRole {
    const SCHEMA: &'static str = "role.create";
}

impl Validated for RolePatch {
    const SCHEMA: &'static str = "role.update";
}

impl Validated for NewPolicy {
    const SCHEMA: &'static str = "policy.create";
}

impl Validated for PolicyPatch {
    const SCHEMA: &'static str = "policy.update";
}

fn password_policy(state: &AppState, password: &str) -> Result<()> {
    check_password(password, state.config.auth.password_min_length)
        .map_err(|e| ApiError::Validation(vec![e]))
}

// Users

async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
    QueryParams(page): QueryParams<Page>,
) -> Result<Envelope<Vec<User>>> {
    auth.require(USERS_READ)?;
    Ok(Envelope::ok(state.storage.list_users(page).await?))
}

async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(body): ValidatedJson<NewUser>,
) -> Result<Envelope<User>> {
    auth.require(USERS_WRITE)?;
    password_policy(&state, &body.password)?;
    Ok(Envelope::created(state.storage.create_user(body).await?))
}

async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<User>> {
    auth.require(USERS_READ)?;
    Ok(Envelope::ok(state.storage.get_user(&id).await?))
}

async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<UserPatch>,
) -> Result<Envelope<User>> {
    auth.require(USERS_WRITE)?;
    if let Some(password) = &body.password {
        password_policy(&state, password)?;
    }
    Ok(Envelope::ok(state.storage.update_user(&id, body).await?))
}

async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Deleted>> {
    auth.require(USERS_WRITE)?;
    if id == auth.user.id {
        return Err(ApiError::Conflict("cannot delete your own account".to_string()));
    }
    state.storage.delete_user(&id).await?;
    Ok(Deleted::new(id))
}

async fn set_user_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<IdList>,
) -> Result<Envelope<User>> {
    auth.require(USERS_WRITE)?;
    Ok(Envelope::ok(state.storage.set_user_roles(&id, body.ids).await?))
}

// Roles

async fn list_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    QueryParams(page): QueryParams<Page>,
) -> Result<Envelope<Vec<Role>>> {
    auth.require(ROLES_READ)?;
    Ok(Envelope::ok(state.storage.list_roles(page).await?))
}

async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(body): ValidatedJson<NewRole>,
) -> Result<Envelope<Role>> {
    auth.require(ROLES_WRITE)?;
    Ok(Envelope::created(state.storage.create_role(body).await?))
}

async fn get_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Role>> {
    auth.require(ROLES_READ)?;
    Ok(Envelope::ok(state.storage.get_role(&id).await?))
}

async fn update_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<RolePatch>,
) -> Result<Envelope<Role>> {
    auth.require(ROLES_WRITE)?;
    Ok(Envelope::ok(state.storage.update_role(&id, body).await?))
}

async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Deleted>> {
    auth.require(ROLES_WRITE)?;
    state.storage.delete_role(&id).await?;
    Ok(Deleted::new(id))
}

async fn set_role_policies(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<IdList>,
) -> Result<Envelope<Role>> {
    auth.require(ROLES_WRITE)?;
    Ok(Envelope::ok(
        state.storage.set_role_policies(&id, body.ids).await?,
    ))
}

// Policies

async fn list_policies(
    State(state): State<AppState>,
    auth: AuthUser,
    QueryParams(page): QueryParams<Page>,
) -> Result<Envelope<Vec<Policy>>> {
    auth.require(POLICIES_READ)?;
    Ok(Envelope::ok(state.storage.list_policies(page).await?))
}

async fn create_policy(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(body): ValidatedJson<NewPolicy>,
) -> Result<Envelope<Policy>> {
    auth.require(POLICIES_WRITE)?;
    Ok(Envelope::created(state.storage.create_policy(body).await?))
}

async fn get_policy(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Policy>> {
    auth.require(POLICIES_READ)?;
    Ok(Envelope::ok(state.storage.get_policy(&id).await?))
}

async fn update_policy(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<PolicyPatch>,
) -> Result<Envelope<Policy>> {
    auth.require(POLICIES_WRITE)?;
    Ok(Envelope::ok(state.storage.update_policy(&id, body).await?))
}

async fn delete_policy(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Deleted>> {
    auth.require(POLICIES_WRITE)?;
    state.storage.delete_policy(&id).await?;
    Ok(Deleted::new(id))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
        .route("/users/:id/roles", put(set_user_roles))
        .route("/roles", get(list_roles).post(create_role))
        .route(
            "/roles/:id",
            get(get_role).patch(update_role).delete(delete_role),
        )
        .route("/roles/:id/policies", put(set_role_policies))
        .route("/policies", get(list_policies).post(create_policy))
        .route(
            "/policies/:id",
            get(get_policy).patch(update_policy).delete(delete_policy),
        )
}
