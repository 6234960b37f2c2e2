use axum::{
    extract::{Path, State},
    routing::get,
    Router,
};

use super::envelope::Deleted;
use super::{AppState, AuthUser, Envelope, QueryParams, ValidatedJson};
use crate::domain::dimension::{
    DimensionTypePatch, EntityTypeFilter, EntityTypePatch, NewDimensionType, NewEntityType,
};
use crate::domain::{DimensionType, EntityType, Page};
use crate::error::Result;
use crate::validation::Validated;

const TYPES_READ: &str = "types:read";
const TYPES_WRITE: &str = "types:write";

impl Validated for NewDimensionType {
    const SCHEMA: &'static str = "dimension_type.create";
}

impl Validated for DimensionTypePatch {
    const SCHEMA: &'static str = "dimension_type.update";
}

impl Validated for NewEntityType {
    const SCHEMA: &'static str = "entity_type.create";
}

impl Validated for EntityTypePatch {
    const SCHEMA: &'static str = "entity_type.update";
}

async fn list_dimension_types(
    State(state): State<AppState>,
    auth: AuthUser,
    QueryParams(page): QueryParams<Page>,
) -> Result<Envelope<Vec<DimensionType>>> {
    auth.require(TYPES_READ)?;
    Ok(Envelope::ok(state.storage.list_dimension_types(page).await?))
}

async fn create_dimension_type(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(body): ValidatedJson<NewDimensionType>,
) -> Result<Envelope<DimensionType>> {
    auth.require(TYPES_WRITE)?;
    Ok(Envelope::created(
        state.storage.create_dimension_type(body).await?,
    ))
}

async fn get_dimension_type(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<DimensionType>> {
    auth.require(TYPES_READ)?;
    Ok(Envelope::ok(state.storage.get_dimension_type(&id).await?))
}

async fn update_dimension_type(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<DimensionTypePatch>,
) -> Result<Envelope<DimensionType>> {
    auth.require(TYPES_WRITE)?;
    Ok(Envelope::ok(
        state.storage.update_dimension_type(&id, body).await?,
    ))
}

async fn delete_dimension_type(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Deleted>> {
    auth.require(TYPES_WRITE)?;
    state.storage.delete_dimension_type(&id).await?;
    Ok(Deleted::new(id))
}

async fn list_entity_types(
    State(state): State<AppState>,
    auth: AuthUser,
    QueryParams(filter): QueryParams<EntityTypeFilter>,
    QueryParams(page): QueryParams<Page>,
) -> Result<Envelope<Vec<EntityType>>> {
    auth.require(TYPES_READ)?;
    Ok(Envelope::ok(
        state.storage.list_entity_types(filter, page).await?,
    ))
}

async fn create_entity_type(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(body): ValidatedJson<NewEntityType>,
) -> Result<Envelope<EntityType>> {
    auth.require(TYPES_WRITE)?;
    Ok(Envelope::created(state.storage.create_entity_type(body).await?))
}

async fn get_entity_type(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<EntityType>> {
    auth.require(TYPES_READ)?;
    Ok(Envelope::ok(state.storage.get_entity_type(&id).await?))
}

async fn update_entity_type(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<EntityTypePatch>,
) -> Result<Envelope<EntityType>> {
    auth.require(TYPES_WRITE)?;
    Ok(Envelope::ok(
        state.storage.update_entity_type(&id, body).await?,
    ))
}

async fn delete_entity_type(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Deleted>> {
    auth.require(TYPES_WRITE)?;
    state.storage.delete_entity_type(&id).await?;
    Ok(Deleted::new(id))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/dimension-types",
            get(list_dimension_types).post(create_dimension_type),
        )
        .route(
            "/dimension-types/:id",
            get(get_dimension_type)
                .patch(update_dimension_type)
                .delete(delete_dimension_type),
        )
        .route(
            "/entity-types",
            get(list_entity_types).post(create_entity_type),
        )
        .route(
            "/entity-types/:id",
            get(get_entity_type)
                .patch(update_entity_type)
                .delete(delete_entity_type),
        )
}
