use libsql::{Connection, Row};
use tracing::info;

use super::{count, query_all, query_one, DatabaseStorage};
use crate::domain::dimension::{
    DimensionTypePatch, EntityTypeFilter, EntityTypePatch, FieldSpec, NewDimensionType,
    NewEntityType, SchemaField,
};
use crate::domain::{new_id, now, DimensionType, EntityKind, EntityType, Page};
use crate::error::{ApiError, Result};

const DIMENSION_TYPE_COLUMNS: &str =
    "id, name, label, data_type, unit, description, created_at, updated_at";
const ENTITY_TYPE_COLUMNS: &str = "id, kind, name, description, created_at, updated_at";

pub(super) fn map_dimension_type(row: &Row) -> Result<DimensionType> {
    let data_type: String = row.get(3)?;
    Ok(DimensionType {
        id: row.get(0)?,
        name: row.get(1)?,
        label: row.get(2)?,
        data_type: data_type.parse().map_err(ApiError::Internal)?,
        unit: row.get(4)?,
        description: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn map_entity_type(row: &Row) -> Result<EntityType> {
    let kind: String = row.get(1)?;
    Ok(EntityType {
        id: row.get(0)?,
        kind: kind.parse().map_err(ApiError::Internal)?,
        name: row.get(2)?,
        description: row.get(3)?,
        dimensions: Vec::new(),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub(super) async fn schema_fields(conn: &Connection, type_id: &str) -> Result<Vec<SchemaField>> {
    query_all(
        conn,
        "SELECT etd.dimension_type_id, dt.name, etd.required
         FROM entity_type_dimensions etd
         JOIN dimension_types dt ON dt.id = etd.dimension_type_id
         WHERE etd.entity_type_id = ?1 ORDER BY dt.name",
        [type_id],
        |row| {
            Ok(SchemaField {
                dimension_type_id: row.get(0)?,
                name: row.get(1)?,
                required: row.get::<i64>(2)? != 0,
            })
        },
    )
    .await
}

async fn load_entity_type(conn: &Connection, id: &str) -> Result<EntityType> {
    let mut entity_type = query_one(
        conn,
        &format!("SELECT {ENTITY_TYPE_COLUMNS} FROM entity_types WHERE id = ?1"),
        [id],
        map_entity_type,
    )
    .await?
    .ok_or_else(|| ApiError::not_found("entity type", id))?;

    entity_type.dimensions = schema_fields(conn, id).await?;
    Ok(entity_type)
}

async fn write_schema(conn: &Connection, type_id: &str, fields: &[FieldSpec]) -> Result<()> {
    let mut errors = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        let known = query_one(
            conn,
            "SELECT id FROM dimension_types WHERE id = ?1",
            [field.dimension_type_id.as_str()],
            |_| Ok(()),
        )
        .await?;
        if known.is_none() {
            errors.push(format!(
                "dimensions/{i}: unknown dimension type '{}'",
                field.dimension_type_id
            ));
        }
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    conn.execute(
        "DELETE FROM entity_type_dimensions WHERE entity_type_id = ?1",
        [type_id],
    )
    .await?;
    for field in fields {
        conn.execute(
            "INSERT INTO entity_type_dimensions (entity_type_id, dimension_type_id, required)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(entity_type_id, dimension_type_id) DO UPDATE SET required = excluded.required",
            libsql::params![
                type_id,
                field.dimension_type_id.as_str(),
                i64::from(field.required)
            ],
        )
        .await?;
    }
    Ok(())
}

impl DatabaseStorage {
    pub async fn create_dimension_type(&self, input: NewDimensionType) -> Result<DimensionType> {
        let conn = self.conn().await?;
        let id = new_id();
        let timestamp = now();

        conn.execute(
            "INSERT INTO dimension_types (id, name, label, data_type, unit, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            libsql::params![
                id.as_str(),
                input.name.as_str(),
                input.label,
                input.data_type.as_str(),
                input.unit,
                input.description,
                timestamp
            ],
        )
        .await?;

        info!("Created dimension type {} ({})", input.name, input.data_type);
        self.get_dimension_type(&id).await
    }

    pub async fn get_dimension_type(&self, id: &str) -> Result<DimensionType> {
        let conn = self.conn().await?;
        query_one(
            &conn,
            &format!("SELECT {DIMENSION_TYPE_COLUMNS} FROM dimension_types WHERE id = ?1"),
            [id],
            map_dimension_type,
        )
        .await?
        .ok_or_else(|| ApiError::not_found("dimension type", id))
    }

    pub async fn list_dimension_types(&self, page: Page) -> Result<Vec<DimensionType>> {
        let conn = self.conn().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {DIMENSION_TYPE_COLUMNS} FROM dimension_types ORDER BY name LIMIT ?1 OFFSET ?2"
            ),
            libsql::params![page.limit(), page.offset()],
            map_dimension_type,
        )
        .await
    }

    pub async fn update_dimension_type(
        &self,
        id: &str,
        patch: DimensionTypePatch,
    ) -> Result<DimensionType> {
        let conn = self.conn().await?;
        let changed = conn
            .execute(
                "UPDATE dimension_types SET
                   label = COALESCE(?2, label),
                   unit = COALESCE(?3, unit),
                   description = COALESCE(?4, description),
                   updated_at = ?5
                 WHERE id = ?1",
                libsql::params![id, patch.label, patch.unit, patch.description, now()],
            )
            .await?;
        if changed == 0 {
            return Err(ApiError::not_found("dimension type", id));
        }
        self.get_dimension_type(id).await
    }

    pub async fn delete_dimension_type(&self, id: &str) -> Result<()> {
        let conn = self.conn().await?;
        let in_use = count(
            &conn,
            "SELECT (SELECT COUNT(*) FROM dimensions WHERE dimension_type_id = ?1)
                  + (SELECT COUNT(*) FROM entity_type_dimensions WHERE dimension_type_id = ?1)",
            [id],
        )
        .await?;
        if in_use > 0 {
            return Err(ApiError::Conflict(format!(
                "dimension type '{id}' is used by {in_use} values or type schemas"
            )));
        }

        let deleted = conn
            .execute("DELETE FROM dimension_types WHERE id = ?1", [id])
            .await?;
        if deleted == 0 {
            return Err(ApiError::not_found("dimension type", id));
        }
        Ok(())
    }

    pub async fn create_entity_type(&self, input: NewEntityType) -> Result<EntityType> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let id = new_id();
        let timestamp = now();

        tx.execute(
            "INSERT INTO entity_types (id, kind, name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            libsql::params![
                id.as_str(),
                input.kind.as_str(),
                input.name.as_str(),
                input.description,
                timestamp
            ],
        )
        .await?;
        write_schema(&tx, &id, &input.dimensions).await?;
        tx.commit().await?;

        info!("Created {} type {}", input.kind, input.name);
        self.get_entity_type(&id).await
    }

    pub async fn get_entity_type(&self, id: &str) -> Result<EntityType> {
        let conn = self.conn().await?;
        load_entity_type(&conn, id).await
    }

    /// Type name lookup used when evaluating `type` cohort rules.
    pub(super) async fn entity_type_names(&self, kind: EntityKind) -> Result<Vec<(String, String)>> {
        let conn = self.conn().await?;
        query_all(
            &conn,
            "SELECT id, name FROM entity_types WHERE kind = ?1",
            [kind.as_str()],
            |row| Ok((row.get::<String>(0)?, row.get::<String>(1)?)),
        )
        .await
    }

    pub async fn list_entity_types(
        &self,
        filter: EntityTypeFilter,
        page: Page,
    ) -> Result<Vec<EntityType>> {
        let conn = self.conn().await?;
        let mut types = match filter.kind {
            Some(kind) => {
                query_all(
                    &conn,
                    &format!(
                        "SELECT {ENTITY_TYPE_COLUMNS} FROM entity_types WHERE kind = ?1
                         ORDER BY kind, name LIMIT ?2 OFFSET ?3"
                    ),
                    libsql::params![kind.as_str(), page.limit(), page.offset()],
                    map_entity_type,
                )
                .await?
            }
            None => {
                query_all(
                    &conn,
                    &format!(
                        "SELECT {ENTITY_TYPE_COLUMNS} FROM entity_types
                         ORDER BY kind, name LIMIT ?1 OFFSET ?2"
                    ),
                    libsql::params![page.limit(), page.offset()],
                    map_entity_type,
                )
                .await?
            }
        };

        for entity_type in &mut types {
            entity_type.dimensions = schema_fields(&conn, &entity_type.id).await?;
        }
        Ok(types)
    }

    /// Schema changes apply to future writes; existing values are not re-checked.
    pub async fn update_entity_type(&self, id: &str, patch: EntityTypePatch) -> Result<EntityType> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let changed = tx
            .execute(
                "UPDATE entity_types SET
                   name = COALESCE(?2, name),
                   description = COALESCE(?3, description),
                   updated_at = ?4
                 WHERE id = ?1",
                libsql::params![id, patch.name, patch.description, now()],
            )
            .await?;
        if changed == 0 {
            return Err(ApiError::not_found("entity type", id));
        }
        if let Some(fields) = &patch.dimensions {
            write_schema(&tx, id, fields).await?;
        }
        tx.commit().await?;

        self.get_entity_type(id).await
    }

    pub async fn delete_entity_type(&self, id: &str) -> Result<()> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let entity_type = load_entity_type(&tx, id).await?;

        let in_use = count(
            &tx,
            &format!(
                "SELECT COUNT(*) FROM {} WHERE type_id = ?1",
                entity_type.kind.table()
            ),
            [id],
        )
        .await?;
        if in_use > 0 {
            return Err(ApiError::Conflict(format!(
                "{} type '{}' is used by {in_use} records",
                entity_type.kind, entity_type.name
            )));
        }

        tx.execute("DELETE FROM entity_types WHERE id = ?1", [id])
            .await?;
        tx.commit().await?;
        info!("Deleted {} type {}", entity_type.kind, entity_type.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::NewPerson;
    use crate::domain::DataType;
    use crate::storage::test_support::test_storage;

    fn dimension(name: &str, data_type: DataType) -> NewDimensionType {
        NewDimensionType {
            name: name.to_string(),
            label: None,
            data_type,
            unit: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn dimension_type_crud() {
        let (storage, _dir) = test_storage().await;
        let created = storage
            .create_dimension_type(dimension("weight", DataType::Number))
            .await
            .unwrap();
        assert_eq!(created.data_type, DataType::Number);

        let updated = storage
            .update_dimension_type(
                &created.id,
                DimensionTypePatch {
                    unit: Some("kg".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.unit.as_deref(), Some("kg"));
        assert_eq!(updated.name, "weight");

        let duplicate = storage
            .create_dimension_type(dimension("weight", DataType::String))
            .await
            .unwrap_err();
        assert!(matches!(duplicate, ApiError::Conflict(_)));

        storage.delete_dimension_type(&created.id).await.unwrap();
        assert!(matches!(
            storage.get_dimension_type(&created.id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn entity_type_carries_its_schema() {
        let (storage, _dir) = test_storage().await;
        let age = storage
            .create_dimension_type(dimension("age", DataType::Integer))
            .await
            .unwrap();

        let patient = storage
            .create_entity_type(NewEntityType {
                kind: EntityKind::Person,
                name: "patient".into(),
                description: None,
                dimensions: vec![FieldSpec {
                    dimension_type_id: age.id.clone(),
                    required: true,
                }],
            })
            .await
            .unwrap();
        assert_eq!(patient.dimensions.len(), 1);
        assert_eq!(patient.dimensions[0].name, "age");
        assert!(patient.dimensions[0].required);

        // Dimension types in a schema cannot be deleted
        assert!(matches!(
            storage.delete_dimension_type(&age.id).await,
            Err(ApiError::Conflict(_))
        ));

        let listed = storage
            .list_entity_types(
                EntityTypeFilter {
                    kind: Some(EntityKind::Fact),
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn entity_type_in_use_cannot_be_deleted() {
        let (storage, _dir) = test_storage().await;
        let participant = storage
            .create_entity_type(NewEntityType {
                kind: EntityKind::Person,
                name: "participant".into(),
                description: None,
                dimensions: vec![],
            })
            .await
            .unwrap();
        let ada = storage
            .create_person(NewPerson {
                type_id: Some(participant.id.clone()),
                name: "Ada".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let err = storage.delete_entity_type(&participant.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(message) if message.contains("participant")));
        assert_eq!(
            storage.get_entity_type(&participant.id).await.unwrap().name,
            "participant"
        );

        storage.delete_person(&ada.id).await.unwrap();
        storage.delete_entity_type(&participant.id).await.unwrap();
        assert!(matches!(
            storage.get_entity_type(&participant.id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_schema_dimension_rolls_back() {
        let (storage, _dir) = test_storage().await;
        let err = storage
            .create_entity_type(NewEntityType {
                kind: EntityKind::Resource,
                name: "device".into(),
                description: None,
                dimensions: vec![FieldSpec {
                    dimension_type_id: "missing".into(),
                    required: false,
                }],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let listed = storage
            .list_entity_types(EntityTypeFilter::default(), Page::default())
            .await
            .unwrap();
        assert!(listed.is_empty());
    }
}
