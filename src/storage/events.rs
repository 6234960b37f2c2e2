use libsql::{Connection, Row};
use tracing::info;

use super::attributes::{
    check_references, delete_attributes, load_dimensions, load_tags, write_dimensions, write_tags,
};
use super::{exists, query_all, query_one, DatabaseStorage, Filters};
use crate::domain::record::{EventFilter, EventPatch, NewEvent};
use crate::domain::{new_id, now, timestamp, EntityKind, Event, Page};
use crate::error::{ApiError, Result};
use crate::metrics;

const EVENT_COLUMNS: &str =
    "id, type_id, name, starts_at, ends_at, person_id, resource_id, created_at, updated_at";

fn map_event(row: &Row) -> Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        type_id: row.get(1)?,
        name: row.get(2)?,
        starts_at: row.get(3)?,
        ends_at: row.get(4)?,
        person_id: row.get(5)?,
        resource_id: row.get(6)?,
        dimensions: Default::default(),
        tags: Vec::new(),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

async fn hydrate(conn: &Connection, mut event: Event) -> Result<Event> {
    event.dimensions = load_dimensions(conn, EntityKind::Event, &event.id).await?;
    event.tags = load_tags(conn, EntityKind::Event, &event.id).await?;
    Ok(event)
}

/// Stored timestamps share one UTC layout, so string order is time order.
fn check_interval(starts_at: &str, ends_at: Option<&str>) -> Result<()> {
    match ends_at {
        Some(ends_at) if ends_at < starts_at => Err(ApiError::Validation(vec![
            "ends_at: must not be before starts_at".to_string(),
        ])),
        _ => Ok(()),
    }
}

pub(super) async fn load_event(conn: &Connection, id: &str) -> Result<Event> {
    let event = query_one(
        conn,
        &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
        [id],
        map_event,
    )
    .await?
    .ok_or_else(|| ApiError::not_found("event", id))?;
    hydrate(conn, event).await
}

pub(super) async fn insert_event(conn: &Connection, input: &NewEvent) -> Result<String> {
    let starts_at = timestamp(&input.starts_at);
    let ends_at = input.ends_at.as_ref().map(timestamp);
    check_interval(&starts_at, ends_at.as_deref())?;
    check_references(
        conn,
        &[
            ("person_id", EntityKind::Person, input.person_id.as_deref()),
            (
                "resource_id",
                EntityKind::Resource,
                input.resource_id.as_deref(),
            ),
        ],
    )
    .await?;

    let id = new_id();
    write_dimensions(
        conn,
        EntityKind::Event,
        &id,
        input.type_id.as_deref(),
        &input.dimensions,
    )
    .await?;

    conn.execute(
        "INSERT INTO events (id, type_id, name, starts_at, ends_at, person_id, resource_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        libsql::params![
            id.as_str(),
            input.type_id.clone(),
            input.name.as_str(),
            starts_at,
            ends_at,
            input.person_id.clone(),
            input.resource_id.clone(),
            now()
        ],
    )
    .await?;

    write_tags(conn, EntityKind::Event, &id, &input.tags).await?;
    Ok(id)
}

impl DatabaseStorage {
    pub async fn create_event(&self, input: NewEvent) -> Result<Event> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let id = insert_event(&tx, &input).await?;
        let event = load_event(&tx, &id).await?;
        tx.commit().await?;

        metrics::record_created("event", 1);
        info!("Created event {} ({})", event.name, event.id);
        Ok(event)
    }

    pub async fn get_event(&self, id: &str) -> Result<Event> {
        let conn = self.conn().await?;
        load_event(&conn, id).await
    }

    pub async fn list_events(&self, filter: EventFilter, page: Page) -> Result<Vec<Event>> {
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
        if let Some(from) = filter.from {
            filters.push("starts_at >= ?", timestamp(&from));
        }
        if let Some(to) = filter.to {
            filters.push("starts_at <= ?", timestamp(&to));
        }

        let (clause, params) = filters.paged("starts_at, id", page);
        let conn = self.conn().await?;
        let events = query_all(
            &conn,
            &format!("SELECT {EVENT_COLUMNS} FROM events{clause}"),
            params,
            map_event,
        )
        .await?;

        let mut hydrated = Vec::with_capacity(events.len());
        for event in events {
            hydrated.push(hydrate(&conn, event).await?);
        }
        Ok(hydrated)
    }

    pub async fn update_event(&self, id: &str, patch: EventPatch) -> Result<Event> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let existing = load_event(&tx, id).await?;

        let starts_at = patch.starts_at.as_ref().map(timestamp);
        let ends_at = patch.ends_at.as_ref().map(timestamp);
        check_interval(
            starts_at.as_deref().unwrap_or(&existing.starts_at),
            ends_at.as_deref().or(existing.ends_at.as_deref()),
        )?;
        check_references(
            &tx,
            &[
                ("person_id", EntityKind::Person, patch.person_id.as_deref()),
                (
                    "resource_id",
                    EntityKind::Resource,
                    patch.resource_id.as_deref(),
                ),
            ],
        )
        .await?;

        if patch.type_id.is_some() || patch.dimensions.is_some() {
            let type_id = patch.type_id.as_deref().or(existing.type_id.as_deref());
            let dimensions = patch.dimensions.as_ref().unwrap_or(&existing.dimensions);
            write_dimensions(&tx, EntityKind::Event, id, type_id, dimensions).await?;
        }

        tx.execute(
            "UPDATE events SET
                type_id = COALESCE(?2, type_id),
                name = COALESCE(?3, name),
                starts_at = COALESCE(?4, starts_at),
                ends_at = COALESCE(?5, ends_at),
                person_id = COALESCE(?6, person_id),
                resource_id = COALESCE(?7, resource_id),
                updated_at = ?8
             WHERE id = ?1",
            libsql::params![
                id,
                patch.type_id,
                patch.name,
                starts_at,
                ends_at,
                patch.person_id,
                patch.resource_id,
                now()
            ],
        )
        .await?;

        if let Some(tags) = &patch.tags {
            write_tags(&tx, EntityKind::Event, id, tags).await?;
        }

        let event = load_event(&tx, id).await?;
        tx.commit().await?;
        Ok(event)
    }

    pub async fn set_event_tags(&self, id: &str, tags: Vec<String>) -> Result<Event> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        if !exists(&tx, "SELECT 1 FROM events WHERE id = ?1", [id]).await? {
            return Err(ApiError::not_found("event", id));
        }
        write_tags(&tx, EntityKind::Event, id, &tags).await?;
        let event = load_event(&tx, id).await?;
        tx.commit().await?;
        Ok(event)
    }

    pub async fn delete_event(&self, id: &str) -> Result<()> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        if !exists(&tx, "SELECT 1 FROM events WHERE id = ?1", [id]).await? {
            return Err(ApiError::not_found("event", id));
        }
        tx.execute("DELETE FROM events WHERE id = ?1", [id]).await?;
        delete_attributes(&tx, EntityKind::Event, id).await?;
        tx.commit().await?;

        info!("Deleted event {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::NewPerson;
    use crate::storage::test_support::test_storage;
    use chrono::DateTime;

    fn visit(starts_at: &str, ends_at: Option<&str>) -> NewEvent {
        NewEvent {
            type_id: None,
            name: "Clinic visit".into(),
            starts_at: DateTime::parse_from_rfc3339(starts_at).unwrap(),
            ends_at: ends_at.map(|e| DateTime::parse_from_rfc3339(e).unwrap()),
            person_id: None,
            resource_id: None,
            dimensions: Default::default(),
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn interval_must_not_run_backwards() {
        let (storage, _dir) = test_storage().await;
        let err = storage
            .create_event(visit(
                "2024-05-01T10:00:00Z",
                Some("2024-05-01T09:00:00Z"),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        // Offsets are normalized before comparing
        let event = storage
            .create_event(visit(
                "2024-05-01T10:00:00+02:00",
                Some("2024-05-01T09:00:00Z"),
            ))
            .await
            .unwrap();
        assert_eq!(event.starts_at, "2024-05-01T08:00:00.000Z");

        let err = storage
            .update_event(
                &event.id,
                EventPatch {
                    ends_at: Some(DateTime::parse_from_rfc3339("2024-05-01T07:00:00Z").unwrap()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_person_is_validation_error() {
        let (storage, _dir) = test_storage().await;
        let mut input = visit("2024-05-01T10:00:00Z", None);
        input.person_id = Some("ghost".into());
        assert!(matches!(
            storage.create_event(input).await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn referenced_person_cannot_be_deleted() {
        let (storage, _dir) = test_storage().await;
        let person = storage
            .create_person(NewPerson {
                name: "Ada".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut input = visit("2024-05-01T10:00:00Z", None);
        input.person_id = Some(person.id.clone());
        let event = storage.create_event(input).await.unwrap();

        assert!(matches!(
            storage.delete_person(&person.id).await,
            Err(ApiError::Conflict(_))
        ));

        storage.delete_event(&event.id).await.unwrap();
        storage.delete_person(&person.id).await.unwrap();
    }

    #[tokio::test]
    async fn list_filters_by_window() {
        let (storage, _dir) = test_storage().await;
        for day in ["01", "02", "03"] {
            storage
                .create_event(visit(&format!("2024-05-{day}T10:00:00Z"), None))
                .await
                .unwrap();
        }

        let window = storage
            .list_events(
                EventFilter {
                    from: Some(DateTime::parse_from_rfc3339("2024-05-02T00:00:00Z").unwrap()),
                    to: Some(DateTime::parse_from_rfc3339("2024-05-02T23:59:59Z").unwrap()),
                    ..Default::default()
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].starts_at, "2024-05-02T10:00:00.000Z");
    }
}
