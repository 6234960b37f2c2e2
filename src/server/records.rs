//! People, resources, events and facts. All four share the same route shape:
//! list/create on the collection, get/patch/delete on the item and a
//! `PUT /:id/tags` that replaces the item's tags.

use axum::{
    extract::{Path, State},
    routing::{get, put},
    Router,
};

use super::envelope::Deleted;
use super::extract::TagList;
use super::{AppState, AuthUser, Envelope, QueryParams, ValidatedJson};
use crate::domain::record::{
    Event, EventFilter, EventPatch, Fact, FactFilter, FactPatch, NewEvent, NewFact, NewPerson,
    NewResource, Person, PersonFilter, PersonPatch, Resource, ResourceFilter, ResourcePatch,
};
use crate::domain::Page;
use crate::error::Result;
use crate::validation::Validated;

impl Validated for NewPerson {
    const SCHEMA: &'static str = "person.create";
}

impl Validated for PersonPatch {
    const SCHEMA: &'static str = "person.update";
}

impl Validated for NewResource {
    const SCHEMA: &'static str = "resource.create";
}

impl Validated for ResourcePatch {
    const SCHEMA: &'static str = "resource.update";
}

impl Validated for NewEvent {
    const SCHEMA: &'static str = "event.create";
}

impl Validated for EventPatch {
    const SCHEMA: &'static str = "event.update";
}

impl Validated for NewFact {
    const SCHEMA: &'static str = "fact.create";
}

impl Validated for FactPatch {
    const SCHEMA: &'static str = "fact.update";
}

// People

async fn list_people(
    State(state): State<AppState>,
    auth: AuthUser,
    QueryParams(filter): QueryParams<PersonFilter>,
    QueryParams(page): QueryParams<Page>,
) -> Result<Envelope<Vec<Person>>> {
    auth.require("people:read")?;
    Ok(Envelope::ok(state.storage.list_people(filter, page).await?))
}

async fn create_person(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(body): ValidatedJson<NewPerson>,
) -> Result<Envelope<Person>> {
    auth.require("people:write")?;
    Ok(Envelope::created(state.storage.create_person(body).await?))
}

async fn get_person(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Person>> {
    auth.require("people:read")?;
    Ok(Envelope::ok(state.storage.get_person(&id).await?))
}

async fn update_person(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<PersonPatch>,
) -> Result<Envelope<Person>> {
    auth.require("people:write")?;
    Ok(Envelope::ok(state.storage.update_person(&id, body).await?))
}

async fn delete_person(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Deleted>> {
    auth.require("people:write")?;
    state.storage.delete_person(&id).await?;
    Ok(Deleted::new(id))
}

async fn set_person_tags(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<TagList>,
) -> Result<Envelope<Person>> {
    auth.require("people:write")?;
    Ok(Envelope::ok(state.storage.set_person_tags(&id, body.tags).await?))
}

// Resources

async fn list_resources(
    State(state): State<AppState>,
    auth: AuthUser,
    QueryParams(filter): QueryParams<ResourceFilter>,
    QueryParams(page): QueryParams<Page>,
) -> Result<Envelope<Vec<Resource>>> {
    auth.require("resources:read")?;
    Ok(Envelope::ok(
        state.storage.list_resources(filter, page).await?,
    ))
}

async fn create_resource(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(body): ValidatedJson<NewResource>,
) -> Result<Envelope<Resource>> {
    auth.require("resources:write")?;
    Ok(Envelope::created(state.storage.create_resource(body).await?))
}

async fn get_resource(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Resource>> {
    auth.require("resources:read")?;
    Ok(Envelope::ok(state.storage.get_resource(&id).await?))
}

async fn update_resource(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<ResourcePatch>,
) -> Result<Envelope<Resource>> {
    auth.require("resources:write")?;
    Ok(Envelope::ok(state.storage.update_resource(&id, body).await?))
}

async fn delete_resource(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Deleted>> {
    auth.require("resources:write")?;
    state.storage.delete_resource(&id).await?;
    Ok(Deleted::new(id))
}

async fn set_resource_tags(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<TagList>,
) -> Result<Envelope<Resource>> {
    auth.require("resources:write")?;
    Ok(Envelope::ok(
        state.storage.set_resource_tags(&id, body.tags).await?,
    ))
}

// Events

async fn list_events(
    State(state): State<AppState>,
    auth: AuthUser,
    QueryParams(filter): QueryParams<EventFilter>,
    QueryParams(page): QueryParams<Page>,
) -> Result<Envelope<Vec<Event>>> {
    auth.require("events:read")?;
    Ok(Envelope::ok(state.storage.list_events(filter, page).await?))
}

async fn create_event(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(body): ValidatedJson<NewEvent>,
) -> Result<Envelope<Event>> {
    auth.require("events:write")?;
    Ok(Envelope::created(state.storage.create_event(body).await?))
}

async fn get_event(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Event>> {
    auth.require("events:read")?;
    Ok(Envelope::ok(state.storage.get_event(&id).await?))
}

async fn update_event(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<EventPatch>,
) -> Result<Envelope<Event>> {
    auth.require("events:write")?;
    Ok(Envelope::ok(state.storage.update_event(&id, body).await?))
}

async fn delete_event(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Deleted>> {
    auth.require("events:write")?;
    state.storage.delete_event(&id).await?;
    Ok(Deleted::new(id))
}

async fn set_event_tags(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<TagList>,
) -> Result<Envelope<Event>> {
    auth.require("events:write")?;
    Ok(Envelope::ok(state.storage.set_event_tags(&id, body.tags).await?))
}

// Facts

async fn list_facts(
    State(state): State<AppState>,
    auth: AuthUser,
    QueryParams(filter): QueryParams<FactFilter>,
    QueryParams(page): QueryParams<Page>,
) -> Result<Envelope<Vec<Fact>>> {
    auth.require("facts:read")?;
    Ok(Envelope::ok(state.storage.list_facts(filter, page).await?))
}

async fn create_fact(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(body): ValidatedJson<NewFact>,
) -> Result<Envelope<Fact>> {
    auth.require("facts:write")?;
    Ok(Envelope::created(state.storage.create_fact(body).await?))
}

async fn get_fact(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Fact>> {
    auth.require("facts:read")?;
    Ok(Envelope::ok(state.storage.get_fact(&id).await?))
}

async fn update_fact(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<FactPatch>,
) -> Result<Envelope<Fact>> {
    auth.require("facts:write")?;
    Ok(Envelope::ok(state.storage.update_fact(&id, body).await?))
}

async fn delete_fact(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Envelope<Deleted>> {
    auth.require("facts:write")?;
    state.storage.delete_fact(&id).await?;
    Ok(Deleted::new(id))
}

async fn set_fact_tags(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<TagList>,
) -> Result<Envelope<Fact>> {
    auth.require("facts:write")?;
    Ok(Envelope::ok(state.storage.set_fact_tags(&id, body.tags).await?))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/people", get(list_people).post(create_person))
        .route(
            "/people/:id",
            get(get_person).patch(update_person).delete(delete_person),
        )
        .route("/people/:id/tags", put(set_person_tags))
        .route("/resources", get(list_resources).post(create_resource))
        .route(
            "/resources/:id",
            get(get_resource)
                .patch(update_resource)
                .delete(delete_resource),
        )
        .route("/resources/:id/tags", put(set_resource_tags))
        .route("/events", get(list_events).post(create_event))
        .route(
            "/events/:id",
            get(get_event).patch(update_event).delete(delete_event),
        )
        .route("/events/:id/tags", put(set_event_tags))
        .route("/facts", get(list_facts).post(create_fact))
        .route(
            "/facts/:id",
            get(get_fact).patch(update_fact).delete(delete_fact),
        )
        .route("/facts/:id/tags", put(set_fact_tags))
}
