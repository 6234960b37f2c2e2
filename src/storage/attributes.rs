//! Dimensions and taggings, shared by every record kind.

use libsql::Connection;
use std::collections::HashMap;

use super::{exists, query_all, query_one, tags};
use crate::domain::dimension::{check_dimensions, SchemaField};
use crate::domain::record::Dimensions;
use crate::domain::{new_id, now, DimensionType, EntityKind, TagPath};
use crate::error::{ApiError, Result};

pub(super) async fn dimension_types_by_name(
    conn: &Connection,
) -> Result<HashMap<String, DimensionType>> {
    let types = query_all(
        conn,
        "SELECT id, name, label, data_type, unit, description, created_at, updated_at FROM dimension_types",
        (),
        super::types::map_dimension_type,
    )
    .await?;
    Ok(types.into_iter().map(|d| (d.name.clone(), d)).collect())
}

/// Schema of `type_id`, which must exist and belong to `kind`.
pub(super) async fn type_schema(
    conn: &Connection,
    kind: EntityKind,
    type_id: &str,
) -> Result<Vec<SchemaField>> {
    let found_kind = query_one(
        conn,
        "SELECT kind FROM entity_types WHERE id = ?1",
        [type_id],
        |row| Ok(row.get::<String>(0)?),
    )
    .await?
    .ok_or_else(|| ApiError::Validation(vec![format!("type_id: unknown type '{type_id}'")]))?;

    if found_kind != kind.as_str() {
        return Err(ApiError::Validation(vec![format!(
            "type_id: '{type_id}' is a {found_kind} type, not a {kind} type"
        )]));
    }

    super::types::schema_fields(conn, type_id).await
}

/// Replace a record's dimensions after checking them against its type.
pub(super) async fn write_dimensions(
    conn: &Connection,
    kind: EntityKind,
    entity_id: &str,
    type_id: Option<&str>,
    values: &Dimensions,
) -> Result<()> {
    let schema = match type_id {
        Some(type_id) => Some(type_schema(conn, kind, type_id).await?),
        None => None,
    };
    let known = dimension_types_by_name(conn).await?;
    let resolved =
        check_dimensions(schema.as_deref(), &known, values).map_err(|errors| {
            ApiError::Validation(errors.into_iter().map(|e| format!("dimensions.{e}")).collect())
        })?;

    conn.execute(
        "DELETE FROM dimensions WHERE entity_kind = ?1 AND entity_id = ?2",
        [kind.as_str(), entity_id],
    )
    .await?;

    let timestamp = now();
    for (dimension, value) in resolved {
        conn.execute(
            "INSERT INTO dimensions (id, dimension_type_id, entity_kind, entity_id, value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            libsql::params![
                new_id(),
                dimension.id,
                kind.as_str(),
                entity_id,
                serde_json::to_string(&value)?,
                timestamp.clone()
            ],
        )
        .await?;
    }
    Ok(())
}

pub(super) async fn load_dimensions(
    conn: &Connection,
    kind: EntityKind,
    entity_id: &str,
) -> Result<Dimensions> {
    let pairs = query_all(
        conn,
        "SELECT dt.name, d.value FROM dimensions d
         JOIN dimension_types dt ON dt.id = d.dimension_type_id
         WHERE d.entity_kind = ?1 AND d.entity_id = ?2",
        [kind.as_str(), entity_id],
        |row| {
            let name: String = row.get(0)?;
            let raw: String = row.get(1)?;
            Ok((name, serde_json::from_str::<serde_json::Value>(&raw)?))
        },
    )
    .await?;
    Ok(pairs.into_iter().collect())
}

/// Replace a record's tags, creating any missing tag (and its ancestors).
pub(super) async fn write_tags(
    conn: &Connection,
    kind: EntityKind,
    entity_id: &str,
    raw_paths: &[String],
) -> Result<()> {
    let mut errors = Vec::new();
    let mut paths = Vec::with_capacity(raw_paths.len());
    for raw in raw_paths {
        match TagPath::parse(raw) {
            Ok(path) => paths.push(path),
            Err(e) => errors.push(format!("tags: {e}")),
        }
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    paths.sort();
    paths.dedup();

    conn.execute(
        "DELETE FROM taggings WHERE entity_kind = ?1 AND entity_id = ?2",
        [kind.as_str(), entity_id],
    )
    .await?;

    let timestamp = now();
    for path in &paths {
        let tag = tags::ensure_path(conn, path).await?;
        conn.execute(
            "INSERT INTO taggings (tag_id, entity_kind, entity_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            libsql::params![tag.id, kind.as_str(), entity_id, timestamp.clone()],
        )
        .await?;
    }
    Ok(())
}

pub(super) async fn load_tags(
    conn: &Connection,
    kind: EntityKind,
    entity_id: &str,
) -> Result<Vec<String>> {
    query_all(
        conn,
        "SELECT t.path FROM taggings tg JOIN tags t ON t.id = tg.tag_id
         WHERE tg.entity_kind = ?1 AND tg.entity_id = ?2 ORDER BY t.path",
        [kind.as_str(), entity_id],
        |row| Ok(row.get::<String>(0)?),
    )
    .await
}

pub(super) async fn delete_attributes(
    conn: &Connection,
    kind: EntityKind,
    entity_id: &str,
) -> Result<()> {
    conn.execute(
        "DELETE FROM dimensions WHERE entity_kind = ?1 AND entity_id = ?2",
        [kind.as_str(), entity_id],
    )
    .await?;
    conn.execute(
        "DELETE FROM taggings WHERE entity_kind = ?1 AND entity_id = ?2",
        [kind.as_str(), entity_id],
    )
    .await?;
    Ok(())
}

/// Report links to records that do not exist as validation errors rather
/// than letting the foreign key turn them into a conflict.
pub(super) async fn check_references(
    conn: &Connection,
    references: &[(&str, EntityKind, Option<&str>)],
) -> Result<()> {
    let mut errors = Vec::new();
    for (field, kind, id) in references {
        let Some(id) = id else { continue };
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", kind.table());
        if !exists(conn, &sql, [*id]).await? {
            errors.push(format!("{field}: unknown {kind} '{id}'"));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

/// `Filters` clause matching records of `kind` tagged with a path or below it.
/// Every `?` binds the same normalized path.
pub(super) fn tagged_within_clause(kind: EntityKind, id_column: &str) -> String {
    format!(
        "{id_column} IN (SELECT tg.entity_id FROM taggings tg JOIN tags t ON t.id = tg.tag_id \
         WHERE tg.entity_kind = '{}' AND (t.path = ? OR substr(t.path, 1, length(?) + 1) = ? || '/'))",
        kind.as_str()
    )
}
