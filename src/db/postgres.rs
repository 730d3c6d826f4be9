//! PostgreSQL replica backed by an sqlx pool.

use std::{fmt::Write as _, time::Duration};

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use sqlx::{
    postgres::{types::Oid, PgPool, PgPoolOptions, PgRow},
    types::{
        chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc},
        Decimal, JsonValue, Uuid,
    },
    Column, Executor, Row, Statement, TypeInfo,
};
use tracing::debug;

use crate::{
    errors::QueryError,
    replica::{Replica, RowCursor},
    result::RawRow,
    scope::CancellationScope,
};

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// PostgreSQL database replica.
#[derive(Debug, Clone)]
pub struct PgReplica {
    pool: PgPool,
}

impl PgReplica {
    /// Opens a pool for a `postgres://` URL.
    pub async fn connect(url: &str) -> Result<Self, QueryError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await
            .map_err(|e| QueryError::connection(e.to_string()))?;

        debug!("opened postgres pool");
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
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
impl Replica for PgReplica {
    async fn open_cursor<'a>(
        &'a self,
        query: &'a str,
        _scope: &'a CancellationScope,
    ) -> Result<RowCursor<'a>, QueryError> {
        // Column names come from the first row; only an empty result pays for
        // a separate prepare. Dropping the row stream returns the connection.
        let mut rows = sqlx::query(query).fetch(&self.pool);
        let first = rows.try_next().await?;

        let columns = match &first {
            Some(row) => row.columns().iter().map(|col| col.name().to_string()).collect(),
            None => {
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

fn convert_row(row: &PgRow) -> Result<RawRow, QueryError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| convert_value(row, idx, col.type_info().name()))
        .collect()
}

/// Renders one cell as text based on the column's declared type.
fn convert_value(
    row: &PgRow,
    index: usize,
    type_name: &str,
) -> Result<Option<String>, QueryError> {
    let cell = match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => text_of::<bool>(row, index)?,
        "INT2" | "SMALLINT" => text_of::<i16>(row, index)?,
        "INT4" | "INT" | "INTEGER" => text_of::<i32>(row, index)?,
        "INT8" | "BIGINT" => text_of::<i64>(row, index)?,
        "FLOAT4" | "REAL" => text_of::<f32>(row, index)?,
        "FLOAT8" | "DOUBLE PRECISION" => text_of::<f64>(row, index)?,
        "NUMERIC" | "DECIMAL" => text_of::<Decimal>(row, index)?,
        "OID" => row.try_get::<Option<Oid>, _>(index)?.map(|oid| oid.0.to_string()),
        "UUID" => text_of::<Uuid>(row, index)?,
        "DATE" => text_of::<NaiveDate>(row, index)?,
        "TIME" => text_of::<NaiveTime>(row, index)?,
        "TIMESTAMP" => text_of::<NaiveDateTime>(row, index)?,
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(|ts| ts.to_rfc3339()),
        "JSON" | "JSONB" => text_of::<JsonValue>(row, index)?,
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)?
            .map(|v| render_bytes(&v)),
        _ => fallback_text(row, index)?,
    };

    Ok(cell)
}

fn text_of<'r, T>(row: &'r PgRow, index: usize) -> Result<Option<String>, QueryError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres> + ToString,
{
    Ok(row.try_get::<Option<T>, _>(index)?.map(|v| v.to_string()))
}

/// Text-like types decode as strings; anything else is rendered from its raw bytes.
fn fallback_text(row: &PgRow, index: usize) -> Result<Option<String>, QueryError> {
    if let Ok(text) = row.try_get::<Option<String>, _>(index) {
        return Ok(text);
    }

    let raw = row.try_get_raw(index)?;
    if sqlx::ValueRef::is_null(&raw) {
        return Ok(None);
    }
    let bytes = raw
        .as_bytes()
        .map_err(|e| QueryError::decode(e.to_string()))?;
    Ok(Some(render_bytes(bytes)))
}

/// UTF-8 bytes as-is, anything else as `\x`-prefixed hex like Postgres prints bytea.
fn render_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let mut out = String::with_capacity(2 + bytes.len() * 2);
            out.push_str("\\x");
            for b in bytes {
                let _ = write!(out, "{b:02x}");
            }
            out
        }
    }
}
