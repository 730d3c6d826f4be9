//! Runs one query attempt against one target.

use futures::StreamExt;
use tracing::debug;

use crate::{
    errors::{ExecutionError, QueryError},
    replica::Target,
    result::{materialize, QueryResult},
    scope::CancellationScope,
};

/// Runs `query` on `target` and reads the whole result set.
///
/// Waits for the target to be free first. Gives up as soon as `scope` is
/// cancelled, including while waiting for the target or the cursor and between
/// rows. The cursor is dropped before the target is released on every path.
pub async fn run(
    target: &Target,
    query: &str,
    scope: &CancellationScope,
) -> Result<QueryResult, ExecutionError> {
    if scope.is_cancelled() {
        debug!(target_id = %target.id, "scope already cancelled, skipping query");
        return Err(ExecutionError::cancelled(target.id.clone()));
    }

    debug!(target_id = %target.id, "running query");
    read_all(target, query, scope)
        .await
        .map_err(|cause| ExecutionError::new(target.id.clone(), cause))
}

async fn read_all(
    target: &Target,
    query: &str,
    scope: &CancellationScope,
) -> Result<QueryResult, QueryError> {
    let _exclusive = tokio::select! {
        biased;
        _ = scope.cancelled() => return Err(QueryError::Cancelled),
        guard = target.exclusive() => guard,
    };

    let cursor = tokio::select! {
        biased;
        _ = scope.cancelled() => return Err(QueryError::Cancelled),
        cursor = target.replica.open_cursor(query, scope) => cursor?,
    };

    let columns = cursor.columns;
    let mut stream = cursor.rows;
    let mut rows = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(QueryError::Cancelled),
            next = stream.next() => next,
        };

        let Some(raw) = next else {
            break;
        };
        let raw = raw?;
        if raw.len() != columns.len() {
            return Err(QueryError::decode(format!(
                "row {} has {} cells, expected {}",
                rows.len(),
                raw.len(),
                columns.len()
            )));
        }
        rows.push(materialize(raw));
    }

    drop(stream);
    debug!(target_id = %target.id, rows = rows.len(), "query finished");

    Ok(QueryResult::new(target.id.clone(), columns, rows))
}
