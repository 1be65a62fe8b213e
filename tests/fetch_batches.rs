//! Batch execution against the SQLite backend, with log capture.

mod util;

use std::sync::Arc;

use evdash::analytics::{
    EventFetcher, EventQueries, Environment, QuerySource, QueryTask, SlotError, SqliteBackend,
    run_batch,
};
use evdash::session::DashboardSession;
use util::{TestTracing, sample_db};

fn fetcher(db: &util::EventsDb) -> EventFetcher {
    let backend = SqliteBackend::open(db.path()).expect("open backend");
    EventFetcher::new(
        Arc::new(backend),
        EventQueries::new(Environment::parse("testing").unwrap()),
    )
}

#[test]
fn batch_slots_follow_submission_order() {
    let db = sample_db();
    let f = fetcher(&db);
    let tasks: Vec<QueryTask<'_, Arc<QuerySource>>> = vec![
        Box::new(|| f.device_event_counts()),
        Box::new(|| f.total_events_by_name()),
        Box::new(|| f.latest_event_timestamps("tokA")),
    ];
    let results = run_batch(tasks).into_results().expect("all slots ready");

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].columns[0], "EVENT_NAME");
    assert_eq!(results[0].columns[3], "EVENT_COUNT");
    assert_eq!(results[1].columns, vec!["EVENT_NAME", "EVENT_COUNT"]);
    assert_eq!(results[2].columns[1], "LATEST_EVENT_TIMESTAMP");
}

#[test]
fn one_bad_slot_does_not_hide_the_others() {
    let db = sample_db();
    let f = fetcher(&db);
    let tasks: Vec<QueryTask<'_, Arc<QuerySource>>> = vec![
        Box::new(|| f.total_events_by_name()),
        Box::new(|| f.fetch(&evdash::analytics::Query::new("SELECT * FROM missing_table"))),
    ];
    let batch = run_batch(tasks);

    assert!(!batch.is_complete());
    assert!(batch.get(0).is_some_and(|s| s.is_ready()));
    let failures: Vec<_> = batch.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 1);
    assert!(matches!(failures[0].error, SlotError::Failed(_)));
    assert!(batch.into_results().is_err());
}

#[test]
fn batch_logs_completion() {
    let tracing = TestTracing::new();
    let _guard = tracing.install();

    let db = sample_db();
    let f = fetcher(&db);
    let tasks: Vec<QueryTask<'_, Arc<QuerySource>>> = vec![
        Box::new(|| f.total_events_by_name()),
        Box::new(|| f.session_durations()),
    ];
    run_batch(tasks).into_results().expect("batch ok");

    tracing.assert_contains("batch finished");
    tracing.assert_contains("slot completed");
}

#[test]
fn failed_overview_logs_forced_logout() {
    let tracing = TestTracing::new();
    let _guard = tracing.install();

    let db = util::EventsDb::create(&[]);
    {
        let conn = rusqlite::Connection::open(db.path()).unwrap();
        conn.execute_batch("DROP TABLE account_events;").unwrap();
    }
    let backend = SqliteBackend::open(db.path()).unwrap();
    let mut session = DashboardSession::new();
    session.login(
        Arc::new(backend),
        EventQueries::new(Environment::parse("testing").unwrap()),
    );
    assert!(session.load_overview().is_err());

    tracing.assert_contains("slot failed");
    tracing.assert_contains("batch failed, closing connection");
}
