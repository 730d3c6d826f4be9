//! Concrete replicas.
//!
//! SQLite and PostgreSQL over sqlx pools, plus a scriptable in-memory replica
//! for tests and demos.

mod mock;
mod postgres;
mod sqlite;

use std::sync::Arc;

pub use mock::MockReplica;
pub use postgres::PgReplica;
pub use sqlite::SqliteReplica;

use crate::{
    config::TargetConfig,
    errors::QueryError,
    replica::{Replica, Target},
};

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Postgres,
    Sqlite,
}

impl DatabaseBackend {
    /// Picks the backend from a connection URL's scheme.
    pub fn from_url(url: &str) -> Option<Self> {
        let (scheme, _) = url.split_once(':')?;
        match scheme.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Opens a replica for the configured URL and names it.
pub async fn connect(config: &TargetConfig) -> Result<Target, QueryError> {
    let backend = DatabaseBackend::from_url(&config.url).ok_or_else(|| {
        QueryError::connection(format!(
            "unsupported connection URL for {}: expected postgres:// or sqlite:",
            config.id
        ))
    })?;

    let replica: Arc<dyn Replica> = match backend {
        DatabaseBackend::Postgres => Arc::new(PgReplica::connect(&config.url).await?),
        DatabaseBackend::Sqlite => Arc::new(SqliteReplica::connect(&config.url).await?),
    };

    Ok(Target::new(config.id.clone(), replica))
}
