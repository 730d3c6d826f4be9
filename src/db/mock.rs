//! Scriptable in-memory replica.
//!
//! Serves a fixed result set after an optional delay, can fail up front or
//! part-way through the rows, and keeps count of open cursors so callers can
//! check that nothing is left open after a race.

use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use futures::{stream::BoxStream, Stream, StreamExt};

use crate::{
    errors::QueryError,
    replica::{Replica, RowCursor},
    result::RawRow,
    scope::CancellationScope,
};

/// A replica that answers every query with the same scripted outcome.
#[derive(Debug, Default)]
pub struct MockReplica {
    columns: Vec<String>,
    rows: Vec<RawRow>,
    failure: Option<QueryError>,
    row_failure: Option<(usize, QueryError)>,
    panic_message: Option<String>,
    delay: Duration,
    row_delay: Duration,
    open_cursors: Arc<AtomicUsize>,
    peak_cursors: Arc<AtomicUsize>,
    rows_served: Arc<AtomicUsize>,
    queries: Mutex<Vec<String>>,
    scopes: Mutex<Vec<CancellationScope>>,
}

impl MockReplica {
    /// Creates a replica returning `rows` under the given column names.
    pub fn with_rows(columns: &[&str], rows: Vec<RawRow>) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            ..Self::default()
        }
    }

    /// Creates a replica whose query fails before any row is produced.
    pub fn failing(err: QueryError) -> Self {
        Self {
            failure: Some(err),
            ..Self::default()
        }
    }

    /// Creates a replica whose query future panics.
    pub fn panicking(message: impl Into<String>) -> Self {
        Self {
            panic_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Waits `delay` before answering (or failing).
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Waits `delay` before yielding each row.
    pub fn row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = delay;
        self
    }

    /// Yields `err` in place of the row at `index`.
    pub fn fail_at_row(mut self, index: usize, err: QueryError) -> Self {
        self.row_failure = Some((index, err));
        self
    }

    /// Number of cursors opened and not yet dropped.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// Highest number of cursors that were ever open at the same time.
    pub fn peak_cursors(&self) -> usize {
        self.peak_cursors.load(Ordering::SeqCst)
    }

    /// Number of rows handed out across all cursors.
    pub fn rows_served(&self) -> usize {
        self.rows_served.load(Ordering::SeqCst)
    }

    /// Queries received, in arrival order.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }

    /// Returns true once every scope this replica was queried under is cancelled.
    ///
    /// False if it was never queried.
    pub fn saw_cancellation(&self) -> bool {
        self.scopes
            .lock()
            .map(|scopes| !scopes.is_empty() && scopes.iter().all(CancellationScope::is_cancelled))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Replica for MockReplica {
    async fn open_cursor<'a>(
        &'a self,
        query: &'a str,
        scope: &'a CancellationScope,
    ) -> Result<RowCursor<'a>, QueryError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        if let Ok(mut scopes) = self.scopes.lock() {
            scopes.push(scope.clone());
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(message) = &self.panic_message {
            panic!("{message}");
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let row_failure = self.row_failure.clone();
        let items = self
            .rows
            .clone()
            .into_iter()
            .enumerate()
            .map(move |(idx, row)| match &row_failure {
                Some((at, err)) if *at == idx => Err(err.clone()),
                _ => Ok(row),
            });

        let served = self.rows_served.clone();
        let row_delay = self.row_delay;
        let rows = futures::stream::iter(items)
            .then(move |item| {
                let served = served.clone();
                async move {
                    if !row_delay.is_zero() {
                        tokio::time::sleep(row_delay).await;
                    }
                    served.fetch_add(1, Ordering::SeqCst);
                    item
                }
            })
            .boxed();

        let tracked = TrackedRows {
            inner: rows,
            _guard: CursorGuard::open(self.open_cursors.clone(), &self.peak_cursors),
        };

        Ok(RowCursor::new(self.columns.clone(), tracked.boxed()))
    }
}

/// Row stream that counts as an open cursor until dropped.
struct TrackedRows {
    inner: BoxStream<'static, Result<RawRow, QueryError>>,
    _guard: CursorGuard,
}

impl Stream for TrackedRows {
    type Item = Result<RawRow, QueryError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

struct CursorGuard(Arc<AtomicUsize>);

impl CursorGuard {
    fn open(counter: Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
