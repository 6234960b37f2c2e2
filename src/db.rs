use crate::config::DatabaseConfig;
use crate::error::{ApiError, Result};
use libsql::{Builder, Connection, Database};
use std::path::Path;
use tracing::info;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial_schema",
        include_str!("../migrations/001_initial_schema.sql"),
    ),
    ("002_indexes", include_str!("../migrations/002_indexes.sql")),
];

const TABLES: &[&str] = &[
    "sessions",
    "user_roles",
    "role_policies",
    "policies",
    "roles",
    "users",
    "cohort_members",
    "cohorts",
    "taggings",
    "tags",
    "dimensions",
    "facts",
    "events",
    "resources",
    "people",
    "entity_type_dimensions",
    "entity_types",
    "dimension_types",
];

pub struct DatabaseManager {
    db: Database,
}

impl DatabaseManager {
    /// Open the database described by the configuration (local file or remote Turso).
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        if config.is_remote() {
            let auth_token = config.auth_token.clone().ok_or_else(|| ApiError::Database {
                message: "database.auth_token is required for a remote database".to_string(),
            })?;

            info!("Connecting to remote database at {}", config.url);
            let db = Builder::new_remote(config.url.clone(), auth_token)
                .build()
                .await
                .map_err(|e| ApiError::Database {
                    message: format!("Failed to connect to database: {e}"),
                })?;
            Ok(Self { db })
        } else {
            Self::open_local(&config.url).await
        }
    }

    pub async fn open_local(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Opening local database at {}", path);
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ApiError::Database {
                message: format!("Failed to open database: {e}"),
            })?;

        Ok(Self { db })
    }

    /// Get a connection with foreign keys enforced.
    pub async fn get_connection(&self) -> Result<Connection> {
        let conn = self.db.connect().map_err(|e| ApiError::Database {
            message: format!("Failed to get database connection: {e}"),
        })?;

        // Per-connection in SQLite
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(|e| ApiError::Database {
                message: format!("Failed to configure connection: {e}"),
            })?;
        // busy_timeout answers with a row, which execute rejects
        let mut rows = conn
            .query("PRAGMA busy_timeout = 5000", ())
            .await
            .map_err(|e| ApiError::Database {
                message: format!("Failed to set busy timeout: {e}"),
            })?;
        rows.next().await?;

        Ok(conn)
    }

    /// Run database migrations. Every statement is idempotent.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");

        let conn = self.get_connection().await?;
        for (name, sql) in MIGRATIONS {
            conn.execute_batch(sql)
                .await
                .map_err(|e| ApiError::Database {
                    message: format!("Failed to run migration {name}: {e}"),
                })?;
            info!("Applied migration {}", name);
        }

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Round-trip a trivial query; used by the health check.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.get_connection().await?;
        let mut rows = conn.query("SELECT 1", ()).await?;
        rows.next().await?;
        Ok(())
    }

    /// Clear all data from the database (useful for development)
    pub async fn clear_all_data(&self) -> Result<()> {
        let conn = self.get_connection().await?;

        // Children before parents so foreign keys hold throughout
        for table in TABLES {
            conn.execute(&format!("DELETE FROM {table}"), ())
                .await
                .map_err(|e| ApiError::Database {
                    message: format!("Failed to clear {table}: {e}"),
                })?;
        }

        info!("Cleared all data from database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn migrations_create_every_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = DatabaseManager::open_local(path.to_str().unwrap())
            .await
            .unwrap();
        db.run_migrations().await.unwrap();
        // Second run is a no-op
        db.run_migrations().await.unwrap();

        let conn = db.get_connection().await.unwrap();
        for table in TABLES {
            let mut rows = conn
                .query(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    [*table],
                )
                .await
                .unwrap();
            assert!(
                rows.next().await.unwrap().is_some(),
                "table '{table}' should exist"
            );
        }
    }

    #[tokio::test]
    async fn connections_enforce_foreign_keys_and_wait_on_locks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = DatabaseManager::open_local(path.to_str().unwrap())
            .await
            .unwrap();

        let conn = db.get_connection().await.unwrap();
        let mut rows = conn.query("PRAGMA foreign_keys", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 1);

        let mut rows = conn.query("PRAGMA busy_timeout", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 5000);

        db.ping().await.unwrap();
    }

    #[tokio::test]
    async fn clear_all_data_empties_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = DatabaseManager::open_local(path.to_str().unwrap())
            .await
            .unwrap();
        db.run_migrations().await.unwrap();

        let conn = db.get_connection().await.unwrap();
        conn.execute(
            "INSERT INTO roles (id, name, created_at, updated_at) VALUES ('r1', 'admin', 'now', 'now')",
            (),
        )
        .await
        .unwrap();

        db.clear_all_data().await.unwrap();

        let mut rows = conn.query("SELECT COUNT(*) FROM roles", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 0);
    }
}
