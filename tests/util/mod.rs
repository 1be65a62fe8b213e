use chrono::{Duration, NaiveDateTime, Utc};
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const GAME: &str = "The Experience";

/// One row of `account_events`.
#[allow(dead_code)]
pub struct EventRow {
    pub event_name: &'static str,
    pub environment: &'static str,
    pub timestamp: NaiveDateTime,
    pub device_name: Option<&'static str>,
    pub device_token: Option<&'static str>,
    pub session_id: Option<&'static str>,
}

#[allow(dead_code)]
impl EventRow {
    pub fn new(event_name: &'static str, timestamp: NaiveDateTime) -> Self {
        Self {
            event_name,
            environment: "testing",
            timestamp,
            device_name: None,
            device_token: None,
            session_id: None,
        }
    }

    pub fn device(mut self, name: &'static str, token: &'static str) -> Self {
        self.device_name = Some(name);
        self.device_token = Some(token);
        self
    }

    pub fn name_only(mut self, name: &'static str) -> Self {
        self.device_name = Some(name);
        self
    }

    pub fn session(mut self, id: &'static str) -> Self {
        self.session_id = Some(id);
        self
    }

    pub fn environment(mut self, env: &'static str) -> Self {
        self.environment = env;
        self
    }

    fn event_json(&self) -> String {
        let mut payload = serde_json::Map::new();
        if let Some(name) = self.device_name {
            payload.insert("deviceName".into(), name.into());
        }
        if let Some(token) = self.device_token {
            payload.insert("deviceToken".into(), token.into());
        }
        if let Some(id) = self.session_id {
            payload.insert("sessionID".into(), id.into());
        }
        serde_json::Value::Object(payload).to_string()
    }
}

/// 10:00 UTC `days` ago, plus `minutes`.
#[allow(dead_code)]
pub fn days_ago(days: i64, minutes: i64) -> NaiveDateTime {
    let day = (Utc::now() - Duration::days(days)).date_naive();
    day.and_hms_opt(10, 0, 0).unwrap_or_default() + Duration::minutes(minutes)
}

#[allow(dead_code)]
pub struct EventsDb {
    pub dir: TempDir,
    pub path: PathBuf,
}

#[allow(dead_code)]
impl EventsDb {
    pub fn create(rows: &[EventRow]) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("events.db");
        let conn = Connection::open(&path).expect("open events db");
        conn.execute_batch(
            "CREATE TABLE account_events (
                 event_name TEXT NOT NULL,
                 game_name TEXT NOT NULL,
                 environment_name TEXT NOT NULL,
                 event_timestamp TEXT NOT NULL,
                 event_json TEXT NOT NULL
             );",
        )
        .expect("create table");
        for row in rows {
            conn.execute(
                "INSERT INTO account_events VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.event_name,
                    GAME,
                    row.environment,
                    row.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                    row.event_json(),
                ],
            )
            .expect("insert event");
        }
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Two named devices, one device without identity, one name-only row and a
/// row in another environment.
///
/// | device  | token | events                                              |
/// |---------|-------|-----------------------------------------------------|
/// | Pixel   | tokA  | gameStarted, experienceStarted (12 min session)     |
/// | iPad    | tokB  | gameStarted, perfectServingStarted, artOfBrewingStarted (20 min) |
/// | unknown | -     | gameStarted                                         |
#[allow(dead_code)]
pub fn sample_db() -> EventsDb {
    EventsDb::create(&[
        EventRow::new("gameStarted", days_ago(2, 0))
            .device("Pixel", "tokA")
            .session("s1"),
        EventRow::new("experienceStarted", days_ago(2, 12))
            .device("Pixel", "tokA")
            .session("s1"),
        EventRow::new("gameStarted", days_ago(3, 0))
            .device("iPad", "tokB")
            .session("s2"),
        EventRow::new("perfectServingStarted", days_ago(3, 5))
            .device("iPad", "tokB")
            .session("s2"),
        EventRow::new("artOfBrewingStarted", days_ago(3, 20))
            .device("iPad", "tokB")
            .session("s2"),
        EventRow::new("gameStarted", days_ago(1, 0)),
        EventRow::new("gameStarted", days_ago(1, 30)).name_only("Orphan"),
        EventRow::new("gameStarted", days_ago(1, 0))
            .device("Pixel", "tokA")
            .environment("prod"),
    ])
}

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
