use axum::{
    extract::{Path, State},
    routing::{get, post},
    Router,
};

use super::envelope::Deleted;
use super::extract::IdList;
use super::{AppState, AuthUser, Envelope, QueryParams, ValidatedJson};
use crate::domain::cohort::{Cohort, CohortMember, CohortPatch, NewCohort};
use crate::domain::Page;
use crate::error::Result;
use crate::validation::Validated;

const COHORTS_READ: &str = "cohorts:read";
const COHORTS_WRITE: &str = "cohorts:write";

impl Validated for NewCohort {
    const SCHEMA: &'static str = "cohort.create";
}

impl Validated for CohortPatch {
    const SCHEMA: &'static str = "cohort.update";
}

async fn list_cohorts(
    State(state): State<AppState>,
    auth: AuthUser,
    QueryParams(page): QueryParams<Page>,
) -> Result<Envelope<Vec<Cohort>>> {
    auth.require(COHORTS_READ)?;
    Ok(Envelope::ok(state.storage.list_cohorts(page).await?))
}

async fn create_cohort(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(body): ValidatedJson<NewCohort>,
) -> Result<Envelope<Cohort>> {
    auth.require(COHORTS_WRITE)?;
    Ok(Envelope::created(state.storage.create_cohort(body).await?))
}

async fn get_cohort(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Cohort>> {
    auth.require(COHORTS_READ)?;
    Ok(Envelope::ok(state.storage.get_cohort(&id).await?))
}

async fn update_cohort(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<CohortPatch>,
) -> Result<Envelope<Cohort>> {
    auth.require(COHORTS_WRITE)?;
    Ok(Envelope::ok(state.storage.update_cohort(&id, body).await?))
}

async fn delete_cohort(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Deleted>> {
    auth.require(COHORTS_WRITE)?;
    state.storage.delete_cohort(&id).await?;
    Ok(Deleted::new(id))
}

/// Resolved membership: static members plus current rule matches.
async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Vec<CohortMember>>> {
    auth.require(COHORTS_READ)?;
    Ok(Envelope::ok(state.storage.cohort_members(&id).await?))
}

async fn replace_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<IdList>,
) -> Result<Envelope<Vec<CohortMember>>> {
    auth.require(COHORTS_WRITE)?;
    Ok(Envelope::ok(
        state.storage.replace_cohort_members(&id, body.ids).await?,
    ))
}

async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((id, person_id)): Path<(String, String)>,
) -> Result<Envelope<Vec<CohortMember>>> {
    auth.require(COHORTS_WRITE)?;
    state.storage.add_cohort_member(&id, &person_id).await?;
    Ok(Envelope::ok(state.storage.cohort_members(&id).await?))
}

async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((id, person_id)): Path<(String, String)>,
) -> Result<Envelope<Vec<CohortMember>>> {
    auth.require(COHORTS_WRITE)?;
    state.storage.remove_cohort_member(&id, &person_id).await?;
    Ok(Envelope::ok(state.storage.cohort_members(&id).await?))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cohorts", get(list_cohorts).post(create_cohort))
        .route(
            "/cohorts/:id",
            get(get_cohort).patch(update_cohort).delete(delete_cohort),
        )
        .route(
            "/cohorts/:id/members",
            get(list_members).put(replace_members),
        )
        .route(
            "/cohorts/:id/members/:person_id",
            post(add_member).delete(remove_member),
        )
}
