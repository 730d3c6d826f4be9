//! SQLite replica backed by an sqlx pool.

use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use sqlx::{
    sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow},
    Column, Executor, Row, Statement, TypeInfo, ValueRef,
};
use tracing::debug;

use crate::{
    errors::QueryError,
    replica::{Replica, RowCursor},
    result::RawRow,
    scope::CancellationScope,
};

const MAX_CONNECTIONS: u32 = 4;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database replica.
#[derive(Debug, Clone)]
pub struct SqliteReplica {
    pool: SqlitePool,
}

impl SqliteReplica {
    /// Opens a pool for `url` (e.g. `sqlite://replica.db` or `sqlite::memory:`).
    pub async fn connect(url: &str) -> Result<Self, QueryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await
            .map_err(|e| QueryError::connection(e.to_string()))?;

        debug!(url, "opened sqlite pool");
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Column names of a query that returned no rows.
    async fn empty_cursor<'a>(&'a self, query: &'a str) -> Result<RowCursor<'a>, QueryError> {
        let statement = self.pool.prepare(query).await?;
        let columns = statement
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect();

        Ok(RowCursor::new(columns, stream::empty().boxed()))
    }
}

#[async_trait]
impl Replica for SqliteReplica {
    async fn open_cursor<'a>(
        &'a self,
        query: &'a str,
        _scope: &'a CancellationScope,
    ) -> Result<RowCursor<'a>, QueryError> {
        let mut rows = sqlx::query(query).fetch(&self.pool);
        let first = rows.try_next().await?;

        let columns = match &first {
            Some(row) => row.columns().iter().map(|col| col.name().to_string()).collect(),
            None => {
                // Release the pooled connection before preparing on it.
                drop(rows);
                return self.empty_cursor(query).await;
            }
        };

        let rows = stream::iter(first.map(Ok))
            .chain(rows)
            .map(|row| row.map_err(QueryError::from).and_then(|row| convert_row(&row)))
            .boxed();

        Ok(RowCursor::new(columns, rows))
    }
}

fn convert_row(row: &SqliteRow) -> Result<RawRow, QueryError> {
    (0..row.len()).map(|idx| convert_value(row, idx)).collect()
}

/// Renders one cell as text, dispatching on the value's storage class.
fn convert_value(row: &SqliteRow, index: usize) -> Result<Option<String>, QueryError> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(None);
    }
    let type_name = raw.type_info().name().to_uppercase();

    let text = match type_name.as_str() {
        "INTEGER" | "INT" | "BIGINT" | "INT8" => {
            row.try_get_unchecked::<i64, _>(index)?.to_string()
        }
        "REAL" | "FLOAT" | "DOUBLE" => row.try_get_unchecked::<f64, _>(index)?.to_string(),
        "BOOLEAN" | "BOOL" => row.try_get_unchecked::<bool, _>(index)?.to_string(),
        "BLOB" => {
            String::from_utf8_lossy(&row.try_get_unchecked::<Vec<u8>, _>(index)?).into_owned()
        }
        _ => row.try_get_unchecked::<String, _>(index)?,
    };

    Ok(Some(text))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    async fn memory_replica() -> SqliteReplica {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteReplica::from_pool(pool)
    }

    async fn collect(replica: &SqliteReplica, query: &str) -> (Vec<String>, Vec<RawRow>) {
        let scope = CancellationScope::new();
        let cursor = replica.open_cursor(query, &scope).await.unwrap();
        let rows: Vec<RawRow> = cursor
            .rows
            .map(|row| row.unwrap())
            .collect()
            .await;
        (cursor.columns, rows)
    }

    #[tokio::test]
    async fn converts_storage_classes_to_text() {
        let replica = memory_replica().await;

        let (columns, rows) = collect(
            &replica,
            "SELECT 1 AS id, 'a' AS name, 2.5 AS score, NULL AS note, x'6869' AS raw",
        )
        .await;

        assert_eq!(columns, vec!["id", "name", "score", "note", "raw"]);
        assert_eq!(
            rows,
            vec![vec![
                Some("1".to_string()),
                Some("a".to_string()),
                Some("2.5".to_string()),
                None,
                Some("hi".to_string()),
            ]]
        );
    }

    #[tokio::test]
    async fn first_row_is_kept_after_reading_columns() {
        let replica = memory_replica().await;

        let (columns, rows) = collect(
            &replica,
            "SELECT 1 AS n UNION ALL SELECT 2 UNION ALL SELECT 3",
        )
        .await;

        assert_eq!(columns, vec!["n"]);
        assert_eq!(
            rows,
            vec![
                vec![Some("1".to_string())],
                vec![Some("2".to_string())],
                vec![Some("3".to_string())],
            ]
        );
    }

    #[tokio::test]
    async fn empty_result_still_reports_columns() {
        let replica = memory_replica().await;
        sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT)")
            .execute(replica.pool())
            .await
            .unwrap();

        let (columns, rows) = collect(&replica, "SELECT id, email FROM users").await;

        assert_eq!(columns, vec!["id", "email"]);
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn syntax_error_is_a_query_error() {
        let replica = memory_replica().await;
        let scope = CancellationScope::new();

        let err = replica
            .open_cursor("SELEC nothing", &scope)
            .await
            .unwrap_err();

        assert!(matches!(err, QueryError::Query(_)));
    }
}
