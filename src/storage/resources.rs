use libsql::{Connection, Row};
use tracing::info;

use super::attributes::{
    delete_attributes, load_dimensions, load_tags, tagged_within_clause, write_dimensions,
    write_tags,
};
use super::{contains_pattern, exists, query_all, query_one, DatabaseStorage, Filters};
use crate::domain::record::{NewResource, ResourceFilter, ResourcePatch};
use crate::domain::{new_id, now, EntityKind, Page, Resource, TagPath};
use crate::error::{ApiError, Result};
use crate::metrics;

const RESOURCE_COLUMNS: &str = "id, type_id, name, uri, description, created_at, updated_at";

fn map_resource(row: &Row) -> Result<Resource> {
    Ok(Resource {
        id: row.get(0)?,
        type_id: row.get(1)?,
        name: row.get(2)?,
        uri: row.get(3)?,
        description: row.get(4)?,
        dimensions: Default::default(),
        tags: Vec::new(),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

async fn hydrate(conn: &Connection, mut resource: Resource) -> Result<Resource> {
    resource.dimensions = load_dimensions(conn, EntityKind::Resource, &resource.id).await?;
    resource.tags = load_tags(conn, EntityKind::Resource, &resource.id).await?;
    Ok(resource)
}

pub(super) async fn load_resource(conn: &Connection, id: &str) -> Result<Resource> {
    let resource = query_one(
        conn,
        &format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = ?1"),
        [id],
        map_resource,
    )
    .await?
    .ok_or_else(|| ApiError::not_found("resource", id))?;
    hydrate(conn, resource).await
}

pub(super) async fn insert_resource(conn: &Connection, input: &NewResource) -> Result<String> {
    let id = new_id();
    write_dimensions(
        conn,
        EntityKind::Resource,
        &id,
        input.type_id.as_deref(),
        &input.dimensions,
    )
    .await?;

    conn.execute(
        "INSERT INTO resources (id, type_id, name, uri, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        libsql::params![
            id.as_str(),
            input.type_id.clone(),
            input.name.as_str(),
            input.uri.clone(),
            input.description.clone(),
            now()
        ],
    )
    .await?;

    write_tags(conn, EntityKind::Resource, &id, &input.tags).await?;
    Ok(id)
}

impl DatabaseStorage {
    pub async fn create_resource(&self, input: NewResource) -> Result<Resource> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let id = insert_resource(&tx, &input).await?;
        let resource = load_resource(&tx, &id).await?;
        tx.commit().await?;

        metrics::record_created("resource", 1);
        info!("Created resource {} ({})", resource.name, resource.id);
        Ok(resource)
    }

    pub async fn get_resource(&self, id: &str) -> Result<Resource> {
        let conn = self.conn().await?;
        load_resource(&conn, id).await
    }

    pub async fn list_resources(
        &self,
        filter: ResourceFilter,
        page: Page,
    ) -> Result<Vec<Resource>> {
        let mut filters = Filters::default();
        if let Some(type_id) = filter.type_id {
            filters.push("type_id = ?", type_id);
        }
        if let Some(tag) = filter.tag {
            let path = TagPath::parse(&tag)
                .map_err(|e| ApiError::Validation(vec![format!("tag: {e}")]))?;
            filters.push(
                &tagged_within_clause(EntityKind::Resource, "id"),
                path.to_string(),
            );
        }
        if let Some(q) = filter.q.filter(|q| !q.trim().is_empty()) {
            filters.push(
                "(name LIKE ? ESCAPE '\\' OR uri LIKE ? ESCAPE '\\')",
                contains_pattern(q.trim()),
            );
        }

        let (clause, params) = filters.paged("name, id", page);
        let conn = self.conn().await?;
        let resources = query_all(
            &conn,
            &format!("SELECT {RESOURCE_COLUMNS} FROM resources{clause}"),
            params,
            map_resource,
        )
        .await?;

        let mut hydrated = Vec::with_capacity(resources.len());
        for resource in resources {
            hydrated.push(hydrate(&conn, resource).await?);
        }
        Ok(hydrated)
    }

    pub async fn update_resource(&self, id: &str, patch: ResourcePatch) -> Result<Resource> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let existing = load_resource(&tx, id).await?;

        if patch.type_id.is_some() || patch.dimensions.is_some() {
            let type_id = patch.type_id.as_deref().or(existing.type_id.as_deref());
            let dimensions = patch.dimensions.as_ref().unwrap_or(&existing.dimensions);
            write_dimensions(&tx, EntityKind::Resource, id, type_id, dimensions).await?;
        }

        tx.execute(
            "UPDATE resources SET
                type_id = COALESCE(?2, type_id),
                name = COALESCE(?3, name),
                uri = COALESCE(?4, uri),
                description = COALESCE(?5, description),
                updated_at = ?6
             WHERE id = ?1",
            libsql::params![
                id,
                patch.type_id,
                patch.name,
                patch.uri,
                patch.description,
                now()
            ],
        )
        .await?;

        if let Some(tags) = &patch.tags {
            write_tags(&tx, EntityKind::Resource, id, tags).await?;
        }

        let resource = load_resource(&tx, id).await?;
        tx.commit().await?;
        Ok(resource)
    }

    pub async fn set_resource_tags(&self, id: &str, tags: Vec<String>) -> Result<Resource> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        if !exists(&tx, "SELECT 1 FROM resources WHERE id = ?1", [id]).await? {
            return Err(ApiError::not_found("resource", id));
        }
        write_tags(&tx, EntityKind::Resource, id, &tags).await?;
        let resource = load_resource(&tx, id).await?;
        tx.commit().await?;
        Ok(resource)
    }

    pub async fn delete_resource(&self, id: &str) -> Result<()> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        if !exists(&tx, "SELECT 1 FROM resources WHERE id = ?1", [id]).await? {
            return Err(ApiError::not_found("resource", id));
        }
        tx.execute("DELETE FROM resources WHERE id = ?1", [id])
            .await?;
        delete_attributes(&tx, EntityKind::Resource, id).await?;
        tx.commit().await?;

        info!("Deleted resource {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::test_storage;

    fn scanner() -> NewResource {
        NewResource {
            name: "MRI scanner".into(),
            uri: Some("urn:device:mri-1".into()),
            tags: vec!["devices/imaging".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_update_and_filter() {
        let (storage, _dir) = test_storage().await;
        let created = storage.create_resource(scanner()).await.unwrap();
        storage
            .create_resource(NewResource {
                name: "Clinic room".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let devices = storage
            .list_resources(
                ResourceFilter {
                    tag: Some("devices".into()),
                    ..Default::default()
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, created.id);

        let by_uri = storage
            .list_resources(
                ResourceFilter {
                    q: Some("mri-1".into()),
                    ..Default::default()
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(by_uri.len(), 1);

        let updated = storage
            .update_resource(
                &created.id,
                ResourcePatch {
                    description: Some("3T".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("3T"));
        assert_eq!(updated.uri, created.uri);
        assert_eq!(updated.tags, created.tags);
    }

    #[tokio::test]
    async fn query_underscore_is_not_a_wildcard() {
        let (storage, _dir) = test_storage().await;
        storage.create_resource(scanner()).await.unwrap();

        let found = storage
            .list_resources(
                ResourceFilter {
                    q: Some("_".into()),
                    ..Default::default()
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn set_tags_on_missing_resource_is_not_found() {
        let (storage, _dir) = test_storage().await;
        assert!(matches!(
            storage.set_resource_tags("nope", vec!["a".into()]).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_resource_and_taggings() {
        let (storage, _dir) = test_storage().await;
        let created = storage.create_resource(scanner()).await.unwrap();
        storage.delete_resource(&created.id).await.unwrap();

        let conn = storage.conn().await.unwrap();
        assert!(!exists(
            &conn,
            "SELECT 1 FROM taggings WHERE entity_id = ?1",
            [created.id.as_str()]
        )
        .await
        .unwrap());
    }
}
