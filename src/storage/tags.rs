use libsql::{Connection, Row};
use tracing::info;

use super::cohorts::rename_rule_tags;
use super::{query_all, query_one, DatabaseStorage};
use crate::domain::tag::{NewTag, TagFilter, TagPatch};
use crate::domain::{new_id, now, Page, Tag, TagPath};
use crate::error::{ApiError, Result};

const TAG_COLUMNS: &str = "id, parent_id, basename, path, description, created_at, updated_at";

fn map_tag(row: &Row) -> Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        basename: row.get(2)?,
        path: row.get(3)?,
        description: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

async fn tag_by_path(conn: &Connection, path: &str) -> Result<Option<Tag>> {
    query_one(
        conn,
        &format!("SELECT {TAG_COLUMNS} FROM tags WHERE path = ?1"),
        [path],
        map_tag,
    )
    .await
}

async fn tag_by_id(conn: &Connection, id: &str) -> Result<Tag> {
    query_one(
        conn,
        &format!("SELECT {TAG_COLUMNS} FROM tags WHERE id = ?1"),
        [id],
        map_tag,
    )
    .await?
    .ok_or_else(|| ApiError::not_found("tag", id))
}

/// Find or create the tag at `path`, creating missing ancestors root first.
pub(super) async fn ensure_path(conn: &Connection, path: &TagPath) -> Result<Tag> {
    let mut parent: Option<Tag> = None;
    for ancestor in path.ancestors() {
        let key = ancestor.to_string();
        let tag = match tag_by_path(conn, &key).await? {
            Some(existing) => existing,
            None => {
                let id = new_id();
                let timestamp = now();
                conn.execute(
                    "INSERT INTO tags (id, parent_id, basename, path, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    libsql::params![
                        id.as_str(),
                        parent.as_ref().map(|p| p.id.clone()),
                        ancestor.basename(),
                        key.as_str(),
                        timestamp
                    ],
                )
                .await?;
                tag_by_id(conn, &id).await?
            }
        };
        parent = Some(tag);
    }
    parent.ok_or_else(|| ApiError::Internal(format!("tag path '{path}' has no segments")))
}

impl DatabaseStorage {
    pub async fn create_tag(&self, input: NewTag) -> Result<Tag> {
        let path = TagPath::parse(&input.path)
            .map_err(|e| ApiError::Validation(vec![format!("path: {e}")]))?;

        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let mut tag = ensure_path(&tx, &path).await?;
        if let Some(description) = input.description {
            tx.execute(
                "UPDATE tags SET description = ?2, updated_at = ?3 WHERE id = ?1",
                libsql::params![tag.id.as_str(), description.as_str(), now()],
            )
            .await?;
            tag.description = Some(description);
        }
        tx.commit().await?;

        info!("Created tag {}", tag.path);
        Ok(tag)
    }

    pub async fn get_tag(&self, id: &str) -> Result<Tag> {
        let conn = self.conn().await?;
        tag_by_id(&conn, id).await
    }

    pub async fn list_tags(&self, filter: TagFilter, page: Page) -> Result<Vec<Tag>> {
        let conn = self.conn().await?;
        match filter.prefix {
            Some(prefix) => {
                let prefix = TagPath::parse(&prefix)
                    .map_err(|e| ApiError::Validation(vec![format!("prefix: {e}")]))?
                    .to_string();
                query_all(
                    &conn,
                    &format!(
                        "SELECT {TAG_COLUMNS} FROM tags
                         WHERE path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || '/'
                         ORDER BY path LIMIT ?2 OFFSET ?3"
                    ),
                    libsql::params![prefix, page.limit(), page.offset()],
                    map_tag,
                )
                .await
            }
            None => {
                query_all(
                    &conn,
                    &format!("SELECT {TAG_COLUMNS} FROM tags ORDER BY path LIMIT ?1 OFFSET ?2"),
                    libsql::params![page.limit(), page.offset()],
                    map_tag,
                )
                .await
            }
        }
    }

    pub async fn tag_children(&self, id: &str) -> Result<Vec<Tag>> {
        let conn = self.conn().await?;
        tag_by_id(&conn, id).await?;
        query_all(
            &conn,
            &format!("SELECT {TAG_COLUMNS} FROM tags WHERE parent_id = ?1 ORDER BY basename"),
            [id],
            map_tag,
        )
        .await
    }

    /// Rename and/or describe a tag. Renaming rewrites every descendant path.
    pub async fn update_tag(&self, id: &str, patch: TagPatch) -> Result<Tag> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let tag = tag_by_id(&tx, id).await?;

        if let Some(basename) = patch.basename {
            let old_path = TagPath::parse(&tag.path).map_err(ApiError::Internal)?;
            let new_path = TagPath::from_parent(old_path.parent().as_ref(), &basename)
                .map_err(|e| ApiError::Validation(vec![format!("basename: {e}")]))?;
            if new_path.depth() != old_path.depth() {
                return Err(ApiError::Validation(vec![
                    "basename: must be a single path segment".to_string(),
                ]));
            }

            if new_path != old_path {
                let old = old_path.to_string();
                let new = new_path.to_string();
                if tag_by_path(&tx, &new).await?.is_some() {
                    return Err(ApiError::Conflict(format!("tag '{new}' already exists")));
                }

                tx.execute(
                    "UPDATE tags SET basename = ?2, updated_at = ?3 WHERE id = ?1",
                    libsql::params![id, new_path.basename(), now()],
                )
                .await?;
                tx.execute(
                    "UPDATE tags SET path = ?2 || substr(path, length(?1) + 1)
                     WHERE path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || '/'",
                    libsql::params![old.as_str(), new.as_str()],
                )
                .await?;
                let cohorts = rename_rule_tags(&tx, &old_path, &new_path).await?;
                info!(
                    "Renamed tag {} -> {} ({} cohort rules updated)",
                    old, new, cohorts
                );
            }
        }

        if let Some(description) = patch.description {
            tx.execute(
                "UPDATE tags SET description = ?2, updated_at = ?3 WHERE id = ?1",
                libsql::params![id, description, now()],
            )
            .await?;
        }

        tx.commit().await?;
        self.get_tag(id).await
    }

    /// Delete a tag, its descendants and all their taggings.
    pub async fn delete_tag(&self, id: &str) -> Result<()> {
        let conn = self.conn().await?;
        let tag = tag_by_id(&conn, id).await?;
        // Descendants and taggings follow through ON DELETE CASCADE
        conn.execute("DELETE FROM tags WHERE id = ?1", [id]).await?;
        info!("Deleted tag {}", tag.path);
        Ok(())
    }
}
