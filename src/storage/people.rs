use libsql::{Connection, Row};
use tracing::info;

use super::attributes::{
    delete_attributes, load_dimensions, load_tags, tagged_within_clause, write_dimensions,
    write_tags,
};
use super::{contains_pattern, exists, query_all, query_one, DatabaseStorage, Filters};
use crate::domain::record::{NewPerson, PersonFilter, PersonPatch};
use crate::domain::{new_id, now, EntityKind, Page, Person, TagPath};
use crate::error::{ApiError, Result};
use crate::metrics;

const PERSON_COLUMNS: &str =
    "id, type_id, name, external_id, email, birth_date, created_at, updated_at";

fn map_person(row: &Row) -> Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        type_id: row.get(1)?,
        name: row.get(2)?,
        external_id: row.get(3)?,
        email: row.get(4)?,
        birth_date: row.get(5)?,
        dimensions: Default::default(),
        tags: Vec::new(),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

async fn hydrate(conn: &Connection, mut person: Person) -> Result<Person> {
    person.dimensions = load_dimensions(conn, EntityKind::Person, &person.id).await?;
    person.tags = load_tags(conn, EntityKind::Person, &person.id).await?;
    Ok(person)
}

pub(super) async fn load_person(conn: &Connection, id: &str) -> Result<Person> {
    let person = query_one(
        conn,
        &format!("SELECT {PERSON_COLUMNS} FROM people WHERE id = ?1"),
        [id],
        map_person,
    )
    .await?
    .ok_or_else(|| ApiError::not_found("person", id))?;
    hydrate(conn, person).await
}

/// All people, hydrated. Cohort resolution evaluates rules over this set.
pub(super) async fn load_all_people(conn: &Connection) -> Result<Vec<Person>> {
    let people = query_all(
        conn,
        &format!("SELECT {PERSON_COLUMNS} FROM people ORDER BY name, id"),
        (),
        map_person,
    )
    .await?;
    let mut hydrated = Vec::with_capacity(people.len());
    for person in people {
        hydrated.push(hydrate(conn, person).await?);
    }
    Ok(hydrated)
}

/// Insert a person with its dimensions and tags on `conn`, which is expected
/// to be inside a transaction.
pub(super) async fn insert_person(conn: &Connection, input: &NewPerson) -> Result<String> {
    let id = new_id();
    // Dimensions first so an unknown type is a validation error, not a foreign key conflict
    write_dimensions(
        conn,
        EntityKind::Person,
        &id,
        input.type_id.as_deref(),
        &input.dimensions,
    )
    .await?;

    conn.execute(
        "INSERT INTO people (id, type_id, name, external_id, email, birth_date, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        libsql::params![
            id.as_str(),
            input.type_id.clone(),
            input.name.as_str(),
            input.external_id.clone(),
            input.email.clone(),
            input.birth_date.map(|d| d.to_string()),
            now()
        ],
    )
    .await?;

    write_tags(conn, EntityKind::Person, &id, &input.tags).await?;
    Ok(id)
}

impl DatabaseStorage {
    pub async fn create_person(&self, input: NewPerson) -> Result<Person> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let id = insert_person(&tx, &input).await?;
        let person = load_person(&tx, &id).await?;
        tx.commit().await?;

        metrics::record_created("person", 1);
        info!("Created person {} ({})", person.name, person.id);
        Ok(person)
    }

    pub async fn get_person(&self, id: &str) -> Result<Person> {
        let conn = self.conn().await?;
        load_person(&conn, id).await
    }

    pub async fn list_people(&self, filter: PersonFilter, page: Page) -> Result<Vec<Person>> {
        let mut filters = Filters::default();
        if let Some(type_id) = filter.type_id {
            filters.push("type_id = ?", type_id);
        }
        if let Some(tag) = filter.tag {
            let path = TagPath::parse(&tag)
                .map_err(|e| ApiError::Validation(vec![format!("tag: {e}")]))?;
            filters.push(
                &tagged_within_clause(EntityKind::Person, "id"),
                path.to_string(),
            );
        }
        if let Some(q) = filter.q.filter(|q| !q.trim().is_empty()) {
            filters.push(
                "(name LIKE ? ESCAPE '\\' OR external_id LIKE ? ESCAPE '\\')",
                contains_pattern(q.trim()),
            );
        }

        let (clause, params) = filters.paged("name, id", page);
        let conn = self.conn().await?;
        let people = query_all(
            &conn,
            &format!("SELECT {PERSON_COLUMNS} FROM people{clause}"),
            params,
            map_person,
        )
        .await?;

        let mut hydrated = Vec::with_capacity(people.len());
        for person in people {
            hydrated.push(hydrate(&conn, person).await?);
        }
        Ok(hydrated)
    }

    pub async fn update_person(&self, id: &str, patch: PersonPatch) -> Result<Person> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let existing = load_person(&tx, id).await?;

        if patch.type_id.is_some() || patch.dimensions.is_some() {
            let type_id = patch.type_id.as_deref().or(existing.type_id.as_deref());
            let dimensions = patch.dimensions.as_ref().unwrap_or(&existing.dimensions);
            write_dimensions(&tx, EntityKind::Person, id, type_id, dimensions).await?;
        }

        tx.execute(
            "UPDATE people SET
                type_id = COALESCE(?2, type_id),
                name = COALESCE(?3, name),
                external_id = COALESCE(?4, external_id),
                email = COALESCE(?5, email),
                birth_date = COALESCE(?6, birth_date),
                updated_at = ?7
             WHERE id = ?1",
            libsql::params![
                id,
                patch.type_id,
                patch.name,
                patch.external_id,
                patch.email,
                patch.birth_date.map(|d| d.to_string()),
                now()
            ],
        )
        .await?;

        if let Some(tags) = &patch.tags {
            write_tags(&tx, EntityKind::Person, id, tags).await?;
        }

        let person = load_person(&tx, id).await?;
        tx.commit().await?;
        Ok(person)
    }

    pub async fn set_person_tags(&self, id: &str, tags: Vec<String>) -> Result<Person> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        if !exists(&tx, "SELECT 1 FROM people WHERE id = ?1", [id]).await? {
            return Err(ApiError::not_found("person", id));
        }
        write_tags(&tx, EntityKind::Person, id, &tags).await?;
        let person = load_person(&tx, id).await?;
        tx.commit().await?;
        Ok(person)
    }

    /// Refused with a conflict while events or facts reference the person.
    pub async fn delete_person(&self, id: &str) -> Result<()> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        if !exists(&tx, "SELECT 1 FROM people WHERE id = ?1", [id]).await? {
            return Err(ApiError::not_found("person", id));
        }
        tx.execute("DELETE FROM people WHERE id = ?1", [id]).await?;
        delete_attributes(&tx, EntityKind::Person, id).await?;
        tx.commit().await?;

        info!("Deleted person {}", id);
        Ok(())
    }
}
