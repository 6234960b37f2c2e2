//! Repositories over the libSQL schema.
//!
//! Each submodule adds an `impl DatabaseStorage` block for one aggregate.
//! Multi-table writes run inside a transaction on a single connection.

mod accounts;
mod attributes;
mod bulk;
mod cohorts;
mod events;
mod facts;
mod people;
mod resources;
mod seed;
mod tags;
mod types;

pub use bulk::{BulkInsert, BulkInsertSummary};
pub use seed::SeedSummary;

use libsql::{params::IntoParams, Connection, Row};
use std::sync::Arc;

use crate::db::DatabaseManager;
use crate::domain::Page;
use crate::error::Result;

#[derive(Clone)]
pub struct DatabaseStorage {
    db: Arc<DatabaseManager>,
}

impl DatabaseStorage {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.db
    }

    async fn conn(&self) -> Result<Connection> {
        self.db.get_connection().await
    }
}

pub(crate) async fn query_all<T>(
    conn: &Connection,
    sql: &str,
    params: impl IntoParams,
    map: impl Fn(&Row) -> Result<T>,
) -> Result<Vec<T>> {
    let mut rows = conn.query(sql, params).await?;
    let mut results = Vec::new();
    while let Some(row) = rows.next().await? {
        results.push(map(&row)?);
    }
    Ok(results)
}

pub(crate) async fn query_one<T>(
    conn: &Connection,
    sql: &str,
    params: impl IntoParams,
    map: impl Fn(&Row) -> Result<T>,
) -> Result<Option<T>> {
    let mut rows = conn.query(sql, params).await?;
    match rows.next().await? {
        Some(row) => Ok(Some(map(&row)?)),
        None => Ok(None),
    }
}

pub(crate) async fn exists(conn: &Connection, sql: &str, params: impl IntoParams) -> Result<bool> {
    Ok(query_one(conn, sql, params, |_| Ok(())).await?.is_some())
}

pub(crate) async fn count(conn: &Connection, sql: &str, params: impl IntoParams) -> Result<i64> {
    Ok(query_one(conn, sql, params, |row| Ok(row.get::<i64>(0)?))
        .await?
        .unwrap_or(0))
}

/// Positional parameters built up alongside a dynamic `WHERE` clause.
#[derive(Default)]
pub(crate) struct Filters {
    clauses: Vec<String>,
    values: Vec<libsql::Value>,
}

impl Filters {
    pub fn push(&mut self, clause: &str, value: impl Into<libsql::Value>) {
        self.values.push(value.into());
        self.clauses
            .push(clause.replace('?', &format!("?{}", self.values.len())));
    }

    pub fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    /// Finish with `ORDER BY` and `LIMIT`/`OFFSET` bound as the last two parameters.
    pub fn paged(
        mut self,
        order_by: &str,
        page: Page,
    ) -> (String, libsql::params::Params) {
        let n = self.values.len();
        let suffix = format!(" ORDER BY {order_by} LIMIT ?{} OFFSET ?{}", n + 1, n + 2);
        self.values.push(page.limit().into());
        self.values.push(page.offset().into());
        (
            format!("{}{}", self.where_clause(), suffix),
            libsql::params::Params::Positional(self.values),
        )
    }
}

/// `LIKE` pattern matching `q` anywhere, with `%`, `_` and `\` taken
/// literally. Pair with `ESCAPE '\'`.
pub(crate) fn contains_pattern(q: &str) -> String {
    let mut pattern = String::with_capacity(q.len() + 2);
    pattern.push('%');
    for c in q.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_number_parameters_in_order() {
        let mut filters = Filters::default();
        filters.push("type_id = ?", "t1");
        filters.push("name LIKE ?", "%ada%");
        assert_eq!(
            filters.where_clause(),
            " WHERE type_id = ?1 AND name LIKE ?2"
        );

        let page = Page {
            limit: Some(10),
            offset: Some(20),
        };
        let (sql, _) = filters.paged("name", page);
        assert_eq!(
            sql,
            " WHERE type_id = ?1 AND name LIKE ?2 ORDER BY name LIMIT ?3 OFFSET ?4"
        );
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(contains_pattern("ada"), "%ada%");
        assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(contains_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn empty_filters_only_page() {
        let (sql, _) = Filters::default().paged("id", Page::default());
        assert_eq!(sql, " ORDER BY id LIMIT ?1 OFFSET ?2");
    }
}
