use axum::{
    extract::{Path, State},
    routing::get,
    Router,
};

use super::envelope::Deleted;
use super::{AppState, AuthUser, Envelope, QueryParams, ValidatedJson};
use crate::domain::tag::{NewTag, Tag, TagFilter, TagPatch};
use crate::domain::Page;
use crate::error::Result;
use crate::validation::Validated;

const TAGS_READ: &str = "tags:read";
const TAGS_WRITE: &str = "tags:write";

impl Validated for NewTag {
    const SCHEMA: &'static str = "tag.create";
}

impl Validated for TagPatch {
    const SCHEMA: &'static str = "tag.update";
}

async fn list_tags(
    State(state): State<AppState>,
    auth: AuthUser,
    QueryParams(filter): QueryParams<TagFilter>,
    QueryParams(page): QueryParams<Page>,
) -> Result<Envelope<Vec<Tag>>> {
    auth.require(TAGS_READ)?;
    Ok(Envelope::ok(state.storage.list_tags(filter, page).await?))
}

async fn create_tag(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(body): ValidatedJson<NewTag>,
) -> Result<Envelope<Tag>> {
    auth.require(TAGS_WRITE)?;
    Ok(Envelope::created(state.storage.create_tag(body).await?))
}

async fn get_tag(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Tag>> {
    auth.require(TAGS_READ)?;
    Ok(Envelope::ok(state.storage.get_tag(&id).await?))
}

async fn tag_children(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Vec<Tag>>> {
    auth.require(TAGS_READ)?;
    Ok(Envelope::ok(state.storage.tag_children(&id).await?))
}

/// Renames move the whole subtree along with the tag.
async fn update_tag(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<TagPatch>,
) -> Result<Envelope<Tag>> {
    auth.require(TAGS_WRITE)?;
    Ok(Envelope::ok(state.storage.update_tag(&id, body).await?))
}

async fn delete_tag(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Deleted>> {
    auth.require(TAGS_WRITE)?;
    state.storage.delete_tag(&id).await?;
    Ok(Deleted::new(id))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tags", get(list_tags).post(create_tag))
        .route(
            "/tags/:id",
            get(get_tag).patch(update_tag).delete(delete_tag),
        )
        .route("/tags/:id/children", get(tag_children))
}
