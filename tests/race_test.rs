//! End-to-end races over in-memory SQLite replicas and scripted replicas.

use std::{sync::Arc, time::Duration};

use hedged_query::{
    db::{MockReplica, SqliteReplica},
    race, Dispatcher, QueryError, RaceConfig, RaceError, Target, TargetId,
};
use pretty_assertions::assert_eq;
use sqlx::sqlite::SqlitePoolOptions;

/// Opens a private in-memory database seeded with a small `users` table.
async fn seeded_sqlite() -> SqliteReplica {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    for stmt in [
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, nickname TEXT)",
        "INSERT INTO users (id, name, nickname) VALUES (1, 'ada', 'countess')",
        "INSERT INTO users (id, name, nickname) VALUES (2, 'grace', NULL)",
    ] {
        sqlx::query(stmt).execute(&pool).await.unwrap();
    }

    SqliteReplica::from_pool(pool)
}

fn expected_users() -> Vec<Vec<String>> {
    vec![
        vec!["1".to_string(), "ada".to_string(), "countess".to_string()],
        vec!["2".to_string(), "grace".to_string(), String::new()],
    ]
}

#[tokio::test]
async fn equivalent_sqlite_replicas_return_one_full_answer() {
    let east = seeded_sqlite().await;
    let west = seeded_sqlite().await;
    let dispatcher = Dispatcher::new(
        vec![
            Target::new("east", Arc::new(east)),
            Target::new("west", Arc::new(west)),
        ],
        RaceConfig::default(),
    )
    .unwrap();

    let result = dispatcher
        .race("SELECT id, name, nickname FROM users ORDER BY id")
        .await
        .unwrap();

    assert!(["east", "west"].contains(&result.source().as_str()));
    assert_eq!(result.columns(), &["id", "name", "nickname"]);
    assert_eq!(result.rows(), expected_users().as_slice());

    dispatcher.drain().await;
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn sqlite_beats_a_stalled_replica() {
    let stalled = Arc::new(
        MockReplica::with_rows(&["id"], vec![vec![Some("99".into())]])
            .delay(Duration::from_secs(30)),
    );
    let dispatcher = Dispatcher::new(
        vec![
            Target::new("stalled", stalled.clone()),
            Target::new("local", Arc::new(seeded_sqlite().await)),
        ],
        RaceConfig::unbounded(),
    )
    .unwrap();

    let result = dispatcher
        .race("SELECT id, name, nickname FROM users ORDER BY id")
        .await
        .unwrap();

    assert_eq!(result.source().as_str(), "local");
    assert!(stalled.saw_cancellation());

    dispatcher.drain().await;
    assert_eq!(stalled.open_cursors(), 0);
}

#[tokio::test]
async fn scanning_loser_is_stopped_mid_stream() {
    let scanning = Arc::new(
        MockReplica::with_rows(
            &["id"],
            (0..100).map(|n| vec![Some(n.to_string())]).collect(),
        )
        .row_delay(Duration::from_millis(10)),
    );
    let dispatcher = Dispatcher::new(
        vec![
            Target::new("scanning", scanning.clone()),
            Target::new("local", Arc::new(seeded_sqlite().await)),
        ],
        RaceConfig::unbounded(),
    )
    .unwrap();

    let result = dispatcher
        .race("SELECT id, name, nickname FROM users ORDER BY id")
        .await
        .unwrap();
    assert_eq!(result.source().as_str(), "local");
    assert_eq!(scanning.peak_cursors(), 1);

    dispatcher.drain().await;
    assert!(scanning.rows_served() < 100);
    assert_eq!(scanning.open_cursors(), 0);
}

#[tokio::test]
async fn failing_sqlite_does_not_stop_a_healthy_replica() {
    let empty = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let dispatcher = Dispatcher::new(
        vec![
            Target::new("no-schema", Arc::new(SqliteReplica::from_pool(empty))),
            Target::new("healthy", Arc::new(seeded_sqlite().await)),
        ],
        RaceConfig::default(),
    )
    .unwrap();

    let result = dispatcher
        .race("SELECT id, name, nickname FROM users ORDER BY id")
        .await
        .unwrap();

    assert_eq!(result.source().as_str(), "healthy");
    assert_eq!(result.rows(), expected_users().as_slice());
    assert_eq!(dispatcher.target_stats()[&TargetId::from("no-schema")].wins, 0);
}

#[tokio::test]
async fn two_distinct_failures_are_both_reported() {
    let broken = Arc::new(MockReplica::failing(QueryError::connection(
        "connection refused",
    )));
    let dispatcher = Dispatcher::new(
        vec![
            Target::new("sqlite", Arc::new(seeded_sqlite().await)),
            Target::new("broken", broken),
        ],
        RaceConfig::default(),
    )
    .unwrap();

    let err = dispatcher.race("SELECT * FROM missing_table").await.unwrap_err();

    let RaceError::AllFailed(failures) = err else {
        panic!("expected AllFailed");
    };
    assert_eq!(failures.len(), 2);

    let mut names: Vec<_> = failures.iter().map(|f| f.target.to_string()).collect();
    names.sort();
    assert_eq!(names, vec!["broken", "sqlite"]);

    for failure in &failures {
        match failure.target.as_str() {
            "broken" => assert_eq!(failure.cause, QueryError::connection("connection refused")),
            "sqlite" => assert!(
                matches!(&failure.cause, QueryError::Query(msg) if msg.contains("missing_table"))
            ),
            other => panic!("unexpected target {other}"),
        }
    }
}

#[tokio::test]
async fn one_off_race_with_deadline() {
    let slow = Arc::new(
        MockReplica::with_rows(&["id"], vec![vec![Some("1".into())]])
            .delay(Duration::from_secs(30)),
    );

    let err = race(
        vec![Target::new("slow", slow.clone())],
        "SELECT 1",
        Some(Duration::from_millis(20)),
    )
    .await
    .unwrap_err();

    assert_eq!(
        err.failures()[0].cause,
        QueryError::DeadlineExceeded(Duration::from_millis(20))
    );
    assert!(slow.saw_cancellation());
}

#[tokio::test]
async fn empty_target_list_is_rejected() {
    let err = race(Vec::new(), "SELECT 1", None).await.unwrap_err();
    assert!(matches!(err, RaceError::InvalidInput(_)));
}
