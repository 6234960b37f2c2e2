use libsql::{Connection, Row};
use tracing::{debug, info};

use super::attributes::{
    check_references, delete_attributes, load_dimensions, load_tags, write_dimensions, write_tags,
};
use super::{exists, query_all, query_one, DatabaseStorage, Filters};
use crate::domain::record::{FactFilter, FactPatch, NewFact};
use crate::domain::{new_id, now, timestamp, EntityKind, Fact, Page};
use crate::error::{ApiError, Result};
use crate::metrics;

const FACT_COLUMNS: &str =
    "id, type_id, observed_at, person_id, resource_id, event_id, note, created_at, updated_at";

fn map_fact(row: &Row) -> Result<Fact> {
    Ok(Fact {
        id: row.get(0)?,
        type_id: row.get(1)?,
        observed_at: row.get(2)?,
        person_id: row.get(3)?,
        resource_id: row.get(4)?,
        event_id: row.get(5)?,
        note: row.get(6)?,
        dimensions: Default::default(),
        tags: Vec::new(),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

async fn hydrate(conn: &Connection, mut fact: Fact) -> Result<Fact> {
    fact.dimensions = load_dimensions(conn, EntityKind::Fact, &fact.id).await?;
    fact.tags = load_tags(conn, EntityKind::Fact, &fact.id).await?;
    Ok(fact)
}

pub(super) async fn load_fact(conn: &Connection, id: &str) -> Result<Fact> {
    let fact = query_one(
        conn,
        &format!("SELECT {FACT_COLUMNS} FROM facts WHERE id = ?1"),
        [id],
        map_fact,
    )
    .await?
    .ok_or_else(|| ApiError::not_found("fact", id))?;
    hydrate(conn, fact).await
}

pub(super) async fn insert_fact(conn: &Connection, input: &NewFact) -> Result<String> {
    check_references(
        conn,
        &[
            ("person_id", EntityKind::Person, input.person_id.as_deref()),
            (
                "resource_id",
                EntityKind::Resource,
                input.resource_id.as_deref(),
            ),
            ("event_id", EntityKind::Event, input.event_id.as_deref()),
        ],
    )
    .await?;

    let id = new_id();
    write_dimensions(
        conn,
        EntityKind::Fact,
        &id,
        input.type_id.as_deref(),
        &input.dimensions,
    )
    .await?;

    conn.execute(
        "INSERT INTO facts (id, type_id, observed_at, person_id, resource_id, event_id, note, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        libsql::params![
            id.as_str(),
            input.type_id.clone(),
            timestamp(&input.observed_at),
            input.person_id.clone(),
            input.resource_id.clone(),
            input.event_id.clone(),
            input.note.clone(),
            now()
        ],
    )
    .await?;

    write_tags(conn, EntityKind::Fact, &id, &input.tags).await?;
    Ok(id)
}

impl DatabaseStorage {
    pub async fn create_fact(&self, input: NewFact) -> Result<Fact> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let id = insert_fact(&tx, &input).await?;
        let fact = load_fact(&tx, &id).await?;
        tx.commit().await?;

        metrics::record_created("fact", 1);
        debug!("Created fact {} observed at {}", fact.id, fact.observed_at);
        Ok(fact)
    }

    pub async fn get_fact(&self, id: &str) -> Result<Fact> {
        let conn = self.conn().await?;
        load_fact(&conn, id).await
    }

    /// Newest observations first.
    pub async fn list_facts(&self, filter: FactFilter, page: Page) -> Result<Vec<Fact>> {
        let mut filters = Filters::default();
        if let Some(type_id) = filter.type_id {
            filters.push("type_id = ?", type_id);
        }
        if let Some(person_id) = filter.person_id {
            filters.push("person_id = ?", person_id);
        }
        if let Some(resource_id) = filter.resource_id {
            filters.push("resource_id = ?", resource_id);
        }
        if let Some(event_id) = filter.event_id {
            filters.push("event_id = ?", event_id);
        }
        if let Some(from) = filter.from {
            filters.push("observed_at >= ?", timestamp(&from));
        }
        if let Some(to) = filter.to {
            filters.push("observed_at <= ?", timestamp(&to));
        }

        let (clause, params) = filters.paged("observed_at DESC, id", page);
        let conn = self.conn().await?;
        let facts = query_all(
            &conn,
            &format!("SELECT {FACT_COLUMNS} FROM facts{clause}"),
            params,
            map_fact,
        )
        .await?;

        let mut hydrated = Vec::with_capacity(facts.len());
        for fact in facts {
            hydrated.push(hydrate(&conn, fact).await?);
        }
        Ok(hydrated)
    }

    pub async fn update_fact(&self, id: &str, patch: FactPatch) -> Result<Fact> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let existing = load_fact(&tx, id).await?;

        check_references(
            &tx,
            &[
                ("person_id", EntityKind::Person, patch.person_id.as_deref()),
                (
                    "resource_id",
                    EntityKind::Resource,
                    patch.resource_id.as_deref(),
                ),
                ("event_id", EntityKind::Event, patch.event_id.as_deref()),
            ],
        )
        .await?;

        if patch.type_id.is_some() || patch.dimensions.is_some() {
            let type_id = patch.type_id.as_deref().or(existing.type_id.as_deref());
            let dimensions = patch.dimensions.as_ref().unwrap_or(&existing.dimensions);
            write_dimensions(&tx, EntityKind::Fact, id, type_id, dimensions).await?;
        }

        tx.execute(
            "UPDATE facts SET
                type_id = COALESCE(?2, type_id),
                observed_at = COALESCE(?3, observed_at),
                person_id = COALESCE(?4, person_id),
                resource_id = COALESCE(?5, resource_id),
                event_id = COALESCE(?6, event_id),
                note = COALESCE(?7, note),
                updated_at = ?8
             WHERE id = ?1",
            libsql::params![
                id,
                patch.type_id,
                patch.observed_at.as_ref().map(timestamp),
                patch.person_id,
                patch.resource_id,
                patch.event_id,
                patch.note,
                now()
            ],
        )
        .await?;

        if let Some(tags) = &patch.tags {
            write_tags(&tx, EntityKind::Fact, id, tags).await?;
        }

        let fact = load_fact(&tx, id).await?;
        tx.commit().await?;
        Ok(fact)
    }

    pub async fn set_fact_tags(&self, id: &str, tags: Vec<String>) -> Result<Fact> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        if !exists(&tx, "SELECT 1 FROM facts WHERE id = ?1", [id]).await? {
            return Err(ApiError::not_found("fact", id));
        }
        write_tags(&tx, EntityKind::Fact, id, &tags).await?;
        let fact = load_fact(&tx, id).await?;
        tx.commit().await?;
        Ok(fact)
    }

    pub async fn delete_fact(&self, id: &str) -> Result<()> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        if !exists(&tx, "SELECT 1 FROM facts WHERE id = ?1", [id]).await? {
            return Err(ApiError::not_found("fact", id));
        }
        tx.execute("DELETE FROM facts WHERE id = ?1", [id]).await?;
        delete_attributes(&tx, EntityKind::Fact, id).await?;
        tx.commit().await?;

        info!("Deleted fact {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dimension::NewDimensionType;
    use crate::domain::record::NewPerson;
    use crate::domain::DataType;
    use crate::storage::test_support::test_storage;
    use chrono::DateTime;
    use serde_json::json;

    fn observation(observed_at: &str, person_id: Option<&str>) -> NewFact {
        NewFact {
            type_id: None,
            observed_at: DateTime::parse_from_rfc3339(observed_at).unwrap(),
            person_id: person_id.map(str::to_string),
            resource_id: None,
            event_id: None,
            note: None,
            dimensions: Default::default(),
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn facts_list_newest_first() {
        let (storage, _dir) = test_storage().await;
        let person = storage
            .create_person(NewPerson {
                name: "Ada".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        for at in [
            "2024-01-01T00:00:00Z",
            "2024-03-01T00:00:00Z",
            "2024-02-01T00:00:00Z",
        ] {
            storage
                .create_fact(observation(at, Some(&person.id)))
                .await
                .unwrap();
        }
        storage
            .create_fact(observation("2024-04-01T00:00:00Z", None))
            .await
            .unwrap();

        let facts = storage
            .list_facts(
                FactFilter {
                    person_id: Some(person.id.clone()),
                    ..Default::default()
                },
                Page::default(),
            )
            .await
            .unwrap();
        let observed: Vec<&str> = facts.iter().map(|f| f.observed_at.as_str()).collect();
        assert_eq!(
            observed,
            vec![
                "2024-03-01T00:00:00.000Z",
                "2024-02-01T00:00:00.000Z",
                "2024-01-01T00:00:00.000Z"
            ]
        );
    }

    #[tokio::test]
    async fn dimensions_replace_whole_set_on_update() {
        let (storage, _dir) = test_storage().await;
        for (name, data_type) in [("systolic", DataType::Integer), ("site", DataType::String)] {
            storage
                .create_dimension_type(NewDimensionType {
                    name: name.into(),
                    label: None,
                    data_type,
                    unit: None,
                    description: None,
                })
                .await
                .unwrap();
        }

        let mut input = observation("2024-01-01T00:00:00Z", None);
        input.dimensions.insert("systolic".into(), json!(120));
        input.dimensions.insert("site".into(), json!("left arm"));
        let fact = storage.create_fact(input).await.unwrap();
        assert_eq!(fact.dimensions.len(), 2);

        let updated = storage
            .update_fact(
                &fact.id,
                FactPatch {
                    dimensions: Some([("systolic".to_string(), json!(118))].into_iter().collect()),
                    note: Some("repeat".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.dimensions.len(), 1);
        assert_eq!(updated.dimensions["systolic"], json!(118));
        assert_eq!(updated.note.as_deref(), Some("repeat"));
        assert_eq!(updated.observed_at, fact.observed_at);
    }

    #[tokio::test]
    async fn unknown_event_is_validation_error() {
        let (storage, _dir) = test_storage().await;
        let mut input = observation("2024-01-01T00:00:00Z", None);
        input.event_id = Some("missing".into());
        assert!(matches!(
            storage.create_fact(input).await,
            Err(ApiError::Validation(_))
        ));
    }
}
