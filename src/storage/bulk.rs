//! Bulk insert behind `POST /data/insert`.
//!
//! Items are the same bodies the single-record endpoints accept, plus an
//! optional client `ref` naming the item so later items can point at it via
//! `person_ref`, `resource_ref` or `event_ref`. Everything runs in one
//! transaction; the first failing item aborts the batch and is reported as
//! `<section>/<index>`.

use libsql::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use super::events::insert_event;
use super::facts::insert_fact;
use super::people::insert_person;
use super::resources::insert_resource;
use super::DatabaseStorage;
use crate::domain::record::{NewEvent, NewFact, NewPerson, NewResource};
use crate::domain::EntityKind;
use crate::error::{ApiError, Result};
use crate::metrics;
use crate::validation::{self, Validated};

const REF: &str = "ref";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkInsert {
    #[serde(default)]
    pub people: Vec<Value>,
    #[serde(default)]
    pub resources: Vec<Value>,
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub facts: Vec<Value>,
}

impl Validated for BulkInsert {
    const SCHEMA: &'static str = "data_insert";
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BulkInsertSummary {
    pub people: usize,
    pub resources: usize,
    pub events: usize,
    pub facts: usize,
    /// Client ref to created id, per section.
    pub refs: BTreeMap<String, BTreeMap<String, String>>,
}

/// Client refs seen so far, per record kind.
#[derive(Default)]
struct RefTable {
    ids: HashMap<EntityKind, BTreeMap<String, String>>,
}

impl RefTable {
    fn resolve(&self, kind: EntityKind, client_ref: &str) -> Option<&String> {
        self.ids.get(&kind).and_then(|refs| refs.get(client_ref))
    }

    fn record(&mut self, kind: EntityKind, client_ref: Option<String>, id: &str) -> Result<()> {
        let Some(client_ref) = client_ref else {
            return Ok(());
        };
        let refs = self.ids.entry(kind).or_default();
        if refs.contains_key(&client_ref) {
            return Err(ApiError::Validation(vec![format!(
                "ref: '{client_ref}' is already used"
            )]));
        }
        refs.insert(client_ref, id.to_string());
        Ok(())
    }

    fn into_summary(self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.ids
            .into_iter()
            .map(|(kind, refs)| (kind.table().to_string(), refs))
            .collect()
    }
}

/// Split the bulk-only keys out of an item and turn `*_ref` links into ids.
fn prepare_item(
    item: Value,
    links: &[(&'static str, &'static str, EntityKind)],
    refs: &RefTable,
) -> Result<(Option<String>, Value)> {
    let Value::Object(mut fields) = item else {
        return Err(ApiError::Validation(vec!["must be an object".to_string()]));
    };

    let client_ref = take_string(&mut fields, REF)?;
    for (ref_key, id_key, kind) in links {
        let Some(target) = take_string(&mut fields, ref_key)? else {
            continue;
        };
        if fields.get(*id_key).is_some_and(|v| !v.is_null()) {
            return Err(ApiError::Validation(vec![format!(
                "{ref_key}: cannot be combined with {id_key}"
            )]));
        }
        let id = refs.resolve(*kind, &target).ok_or_else(|| {
            ApiError::Validation(vec![format!(
                "{ref_key}: no earlier {kind} with ref '{target}'"
            )])
        })?;
        fields.insert(id_key.to_string(), Value::String(id.clone()));
    }

    Ok((client_ref, Value::Object(fields)))
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Result<Option<String>> {
    match fields.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.is_empty() => Ok(Some(s)),
        Some(_) => Err(ApiError::Validation(vec![format!(
            "{key}: must be a non-empty string"
        )])),
    }
}

/// Prefix every message of `err` with the item's location in the batch.
fn at(section: &str, index: usize, err: ApiError) -> ApiError {
    let location = format!("{section}/{index}");
    match err {
        ApiError::Validation(errors) => ApiError::Validation(
            errors
                .into_iter()
                .map(|e| {
                    if e.starts_with('/') {
                        format!("/{location}{e}")
                    } else {
                        format!("/{location}: {e}")
                    }
                })
                .collect(),
        ),
        ApiError::BadRequest(msg) => ApiError::BadRequest(format!("/{location}: {msg}")),
        ApiError::Conflict(msg) => ApiError::Conflict(format!("/{location}: {msg}")),
        ApiError::NotFound(msg) => {
            ApiError::Validation(vec![format!("/{location}: {msg} not found")])
        }
        other => other,
    }
}

/// Validate and insert one item, returning the new record's id.
async fn insert_item(conn: &Connection, kind: EntityKind, body: Value) -> Result<String> {
    match kind {
        EntityKind::Person => {
            let input: NewPerson = validation::parse("person.create", body)?;
            insert_person(conn, &input).await
        }
        EntityKind::Resource => {
            let input: NewResource = validation::parse("resource.create", body)?;
            insert_resource(conn, &input).await
        }
        EntityKind::Event => {
            let input: NewEvent = validation::parse("event.create", body)?;
            insert_event(conn, &input).await
        }
        EntityKind::Fact => {
            let input: NewFact = validation::parse("fact.create", body)?;
            insert_fact(conn, &input).await
        }
    }
}

/// `*_ref` keys an item of `kind` may carry, with the id field each fills.
fn links(kind: EntityKind) -> &'static [(&'static str, &'static str, EntityKind)] {
    match kind {
        EntityKind::Person | EntityKind::Resource => &[],
        EntityKind::Event => &[
            ("person_ref", "person_id", EntityKind::Person),
            ("resource_ref", "resource_id", EntityKind::Resource),
        ],
        EntityKind::Fact => &[
            ("person_ref", "person_id", EntityKind::Person),
            ("resource_ref", "resource_id", EntityKind::Resource),
            ("event_ref", "event_id", EntityKind::Event),
        ],
    }
}

async fn insert_section(
    conn: &Connection,
    kind: EntityKind,
    items: Vec<Value>,
    refs: &mut RefTable,
) -> Result<usize> {
    let total = items.len();
    for (index, item) in items.into_iter().enumerate() {
        let inserted = async {
            let (client_ref, body) = prepare_item(item, links(kind), refs)?;
            let id = insert_item(conn, kind, body).await?;
            refs.record(kind, client_ref, &id)
        }
        .await;
        inserted.map_err(|e| at(kind.table(), index, e))?;
    }
    Ok(total)
}

impl DatabaseStorage {
    pub async fn bulk_insert(&self, batch: BulkInsert) -> Result<BulkInsertSummary> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let mut refs = RefTable::default();

        let people = insert_section(&tx, EntityKind::Person, batch.people, &mut refs).await?;
        let resources =
            insert_section(&tx, EntityKind::Resource, batch.resources, &mut refs).await?;
        let events = insert_section(&tx, EntityKind::Event, batch.events, &mut refs).await?;
        let facts = insert_section(&tx, EntityKind::Fact, batch.facts, &mut refs).await?;

        tx.commit().await?;

        for (kind, n) in [
            ("person", people),
            ("resource", resources),
            ("event", events),
            ("fact", facts),
        ] {
            if n > 0 {
                metrics::record_created(kind, n as u64);
            }
        }
        info!(
            "Bulk insert: {} people, {} resources, {} events, {} facts",
            people, resources, events, facts
        );

        Ok(BulkInsertSummary {
            people,
            resources,
            events,
            facts,
            refs: refs.into_summary(),
        })
    }
}
