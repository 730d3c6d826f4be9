//! The collaborator seam: what a replica must offer to take part in a race.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::{Mutex, MutexGuard};

use crate::{config::TargetId, errors::QueryError, result::RawRow, scope::CancellationScope};

/// An open result set: column names up front, rows pulled one at a time.
///
/// Dropping the cursor releases whatever the driver holds for it, whether or
/// not the rows were read to the end.
pub struct RowCursor<'a> {
    pub columns: Vec<String>,
    pub rows: BoxStream<'a, Result<RawRow, QueryError>>,
}

impl<'a> RowCursor<'a> {
    pub fn new(columns: Vec<String>, rows: BoxStream<'a, Result<RawRow, QueryError>>) -> Self {
        Self { columns, rows }
    }
}

impl fmt::Debug for RowCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowCursor")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// A database handle able to run a read query.
///
/// Implementations own their connection or pool; the race never opens or
/// closes them, it only opens and drops cursors.
#[async_trait]
pub trait Replica: Send + Sync {
    /// Starts `query` and returns a cursor over its rows.
    ///
    /// The scope is handed over for drivers that can abort server-side work;
    /// callers additionally stop polling the returned future once it is cancelled.
    async fn open_cursor<'a>(
        &'a self,
        query: &'a str,
        scope: &'a CancellationScope,
    ) -> Result<RowCursor<'a>, QueryError>;
}

/// A named replica taking part in a race.
///
/// A target runs one attempt at a time. Clones share that slot, so overlapping
/// races on the same dispatcher queue up per target instead of stacking
/// cursors on one replica.
#[derive(Clone)]
pub struct Target {
    pub id: TargetId,
    pub replica: Arc<dyn Replica>,
    in_use: Arc<Mutex<()>>,
}

impl Target {
    pub fn new(id: impl Into<TargetId>, replica: Arc<dyn Replica>) -> Self {
        Self {
            id: id.into(),
            replica,
            in_use: Arc::new(Mutex::new(())),
        }
    }

    /// Waits until no other attempt is running on this target.
    pub(crate) async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.in_use.lock().await
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target").field("id", &self.id).finish()
    }
}
