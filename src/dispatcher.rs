use std::{
    any::Any,
    collections::{HashMap, HashSet},
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::FutureExt;
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::{
    config::{RaceConfig, TargetId},
    errors::{ExecutionError, QueryError, RaceError},
    executor,
    replica::Target,
    result::QueryResult,
    scope::CancellationScope,
};

type Attempt = Result<QueryResult, ExecutionError>;

#[derive(Debug, Default)]
struct TargetStats {
    wins: u64,
    total_latency_ms: f64,
    errors: u64,
}

/// Snapshot of a target's race history.
///
/// Informational only: every race still goes to every target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetStatsSnapshot {
    /// Number of races this target won.
    pub wins: u64,
    /// Average time from race start to its winning answer, in milliseconds.
    pub avg_latency_ms: f64,
    /// Number of failed attempts, not counting attempts cancelled by a winner.
    pub errors: u64,
}

/// Races one query across a fixed set of equivalent replicas.
///
/// Each call to [`Dispatcher::race`] queries every target concurrently and
/// returns the first successful answer. The losers are told to stop through a
/// scope shared by that race only.
#[derive(Clone)]
pub struct Dispatcher {
    targets: Arc<[Target]>,
    cfg: RaceConfig,
    tracker: TaskTracker,
    stats: Arc<Mutex<HashMap<TargetId, TargetStats>>>,
}

impl Dispatcher {
    /// Creates a dispatcher over `targets`.
    ///
    /// Fails with [`RaceError::InvalidInput`] if `targets` is empty or two
    /// targets share an id.
    pub fn new(targets: Vec<Target>, cfg: RaceConfig) -> Result<Self, RaceError> {
        if targets.is_empty() {
            return Err(RaceError::InvalidInput("no targets configured".to_string()));
        }

        let mut stats_map = HashMap::new();
        for target in &targets {
            if stats_map
                .insert(target.id.clone(), TargetStats::default())
                .is_some()
            {
                return Err(RaceError::InvalidInput(format!(
                    "duplicate target id {}",
                    target.id
                )));
            }
        }

        Ok(Self {
            targets: targets.into(),
            cfg,
            tracker: TaskTracker::new(),
            stats: Arc::new(Mutex::new(stats_map)),
        })
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn config(&self) -> &RaceConfig {
        &self.cfg
    }

    /// Number of attempts from any race of this dispatcher that are still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Returns a snapshot of accumulated statistics for each target.
    pub fn target_stats(&self) -> HashMap<TargetId, TargetStatsSnapshot> {
        let Ok(stats) = self.stats.lock() else {
            return HashMap::new();
        };

        stats
            .iter()
            .map(|(id, s)| {
                let avg = if s.wins > 0 {
                    s.total_latency_ms / (s.wins as f64)
                } else {
                    0.0
                };

                (
                    id.clone(),
                    TargetStatsSnapshot {
                        wins: s.wins,
                        avg_latency_ms: avg,
                        errors: s.errors,
                    },
                )
            })
            .collect()
    }

    /// Waits until every attempt spawned by this dispatcher has finished.
    ///
    /// `race` never waits for losers; call this when teardown has to be
    /// deterministic, e.g. before closing the replicas' pools.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Runs `query` on every target and returns the first successful result.
    ///
    /// Once a winner is picked the race's scope is cancelled before returning.
    /// If no target succeeds, or the configured deadline elapses first, the
    /// error holds one entry per target.
    pub async fn race(&self, query: &str) -> Result<QueryResult, RaceError> {
        if query.trim().is_empty() {
            return Err(RaceError::InvalidInput("query is empty".to_string()));
        }

        let scope = CancellationScope::new();
        let _teardown = scope.teardown_guard();
        let query: Arc<str> = Arc::from(query);
        let start = Instant::now();

        // One slot per target: a late reporter never waits on a decided race.
        let (tx, mut rx) = mpsc::channel::<Attempt>(self.targets.len());

        for target in self.targets.iter().cloned() {
            let tx = tx.clone();
            let scope = scope.clone();
            let query = query.clone();

            self.tracker.spawn(async move {
                let outcome = attempt(&target, &query, &scope).await;
                if tx.try_send(outcome).is_err() {
                    debug!(target_id = %target.id, "race already decided, dropping outcome");
                }
            });
        }
        drop(tx);

        let deadline = self.cfg.deadline;
        let deadline_sleep = async move {
            match deadline {
                Some(d) => time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_sleep);

        let mut failures = Vec::with_capacity(self.targets.len());

        loop {
            tokio::select! {
                biased;

                outcome = rx.recv() => match outcome {
                    Some(Ok(result)) => {
                        scope.cancel();
                        let elapsed = start.elapsed();
                        info!(
                            winner = %result.source(),
                            rows = result.row_count(),
                            elapsed_ms = elapsed.as_millis() as u64,
                            "race won"
                        );
                        self.record_win(result.source(), elapsed);
                        return Ok(result);
                    }
                    Some(Err(err)) => {
                        warn!(target_id = %err.target, error = %err.cause, "target failed");
                        self.record_error(&err);
                        failures.push(err);
                    }
                    None => break,
                },
                _ = &mut deadline_sleep => {
                    scope.cancel();
                    let d = deadline.unwrap_or_default();
                    let missed = self.unreported(&failures, d);
                    warn!(
                        deadline_ms = d.as_millis() as u64,
                        missed = missed.len(),
                        "race deadline elapsed"
                    );
                    for err in &missed {
                        self.record_error(err);
                    }
                    failures.extend(missed);
                    break;
                }
            }
        }

        Err(RaceError::AllFailed(failures))
    }

    /// Deadline entries for targets that have not reported, in target order.
    fn unreported(&self, failures: &[ExecutionError], deadline: Duration) -> Vec<ExecutionError> {
        let reported: HashSet<&TargetId> = failures.iter().map(|f| &f.target).collect();
        self.targets
            .iter()
            .filter(|t| !reported.contains(&t.id))
            .map(|t| ExecutionError::new(t.id.clone(), QueryError::DeadlineExceeded(deadline)))
            .collect()
    }

    fn record_win(&self, id: &TargetId, elapsed: Duration) {
        if let Ok(mut stats) = self.stats.lock() {
            if let Some(entry) = stats.get_mut(id) {
                entry.wins += 1;
                entry.total_latency_ms += elapsed.as_secs_f64() * 1000.0;
            }
        }
    }

    fn record_error(&self, err: &ExecutionError) {
        if err.cause == QueryError::Cancelled {
            return;
        }
        if let Ok(mut stats) = self.stats.lock() {
            if let Some(entry) = stats.get_mut(&err.target) {
                entry.errors += 1;
            }
        }
    }
}

/// Runs one attempt, turning a panic into a failure of that target alone.
async fn attempt(target: &Target, query: &str, scope: &CancellationScope) -> Attempt {
    match AssertUnwindSafe(executor::run(target, query, scope))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => Err(ExecutionError::new(
            target.id.clone(),
            QueryError::Panicked(panic_message(&*panic)),
        )),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Races `query` across `targets` once, with an optional deadline.
///
/// Convenience for one-off races; reuse a [`Dispatcher`] to keep statistics
/// or to [`drain`](Dispatcher::drain) losers.
pub async fn race(
    targets: Vec<Target>,
    query: &str,
    deadline: Option<Duration>,
) -> Result<QueryResult, RaceError> {
    Dispatcher::new(targets, RaceConfig::unbounded().with_deadline(deadline))?
        .race(query)
        .await
}
