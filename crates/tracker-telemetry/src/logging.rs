//! WARN+ event persistence.
//!
//! Every row carries the `entity_id` and `conn_id` of the report or
//! connection it concerns, taken from the event or, failing that, from the
//! innermost enclosing span that recorded them.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
CREATE TABLE IF NOT EXISTS tracker_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    logged_at TEXT NOT NULL,
    level TEXT NOT NULL,
    target TEXT NOT NULL,
    message TEXT NOT NULL,
    entity_id TEXT,
    conn_id TEXT,
    fields TEXT
);
CREATE INDEX IF NOT EXISTS idx_tracker_logs_entity ON tracker_logs(entity_id, id);
";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogRecord {
    pub id: i64,
    pub logged_at: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub entity_id: Option<String>,
    pub conn_id: Option<String>,
    /// Remaining event fields as a JSON object.
    pub fields: Option<String>,
}

/// Correlation ids attached to a row.
#[derive(Clone, Debug, Default, PartialEq)]
struct Correlation {
    entity_id: Option<String>,
    conn_id: Option<String>,
}

impl Correlation {
    fn is_complete(&self) -> bool {
        self.entity_id.is_some() && self.conn_id.is_some()
    }

    fn fill_from(&mut self, other: &Correlation) {
        if self.entity_id.is_none() {
            self.entity_id.clone_from(&other.entity_id);
        }
        if self.conn_id.is_none() {
            self.conn_id.clone_from(&other.conn_id);
        }
    }
}

pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn write(&self, level: Level, target: &str, message: &str, ids: &Correlation, fields: Option<String>) {
        let conn = self.conn.lock();
        // a failed log write has nowhere to be reported
        let _ = conn.execute(
            "INSERT INTO tracker_logs (logged_at, level, target, message, entity_id, conn_id, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Utc::now().to_rfc3339(),
                level.as_str(),
                target,
                message,
                ids.entity_id,
                ids.conn_id,
                fields
            ],
        );
    }

    /// Newest rows first, optionally restricted to one entity.
    pub fn recent(&self, entity_id: Option<&str>, limit: u32) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, logged_at, level, target, message, entity_id, conn_id, fields
             FROM tracker_logs
             WHERE ?1 IS NULL OR entity_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![entity_id, limit], from_row)?;
        rows.collect()
    }

    /// The most recent row for `entity_id`, if any.
    pub fn last_for_entity(&self, entity_id: &str) -> Result<Option<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, logged_at, level, target, message, entity_id, conn_id, fields
             FROM tracker_logs WHERE entity_id = ?1 ORDER BY id DESC LIMIT 1",
            params![entity_id],
            from_row,
        )
        .optional()
    }
}

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogRecord> {
    Ok(LogRecord {
        id: row.get(0)?,
        logged_at: row.get(1)?,
        level: row.get(2)?,
        target: row.get(3)?,
        message: row.get(4)?,
        entity_id: row.get(5)?,
        conn_id: row.get(6)?,
        fields: row.get(7)?,
    })
}

/// Persists WARN and ERROR events to a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct Collected {
    message: String,
    ids: Correlation,
    rest: Map<String, Value>,
}

impl Collected {
    fn put(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => self.message = as_text(value),
            "entity_id" => self.ids.entity_id = Some(as_text(value)),
            "conn_id" => self.ids.conn_id = Some(as_text(value)),
            name => {
                let _ = self.rest.insert(name.to_string(), value);
            }
        }
    }
}

fn as_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl Visit for Collected {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // Display-formatted ids arrive here already unquoted
        self.put(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut collected = Collected::default();
        attrs.record(&mut collected);
        if collected.ids == Correlation::default() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(collected.ids);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::WARN {
            return;
        }

        let mut collected = Collected::default();
        event.record(&mut collected);

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if collected.ids.is_complete() {
                    break;
                }
                if let Some(ids) = span.extensions().get::<Correlation>() {
                    collected.ids.fill_from(ids);
                }
            }
        }

        let fields = (!collected.rest.is_empty()).then(|| Value::Object(collected.rest).to_string());
        self.sink
            .write(*meta.level(), meta.target(), &collected.message, &collected.ids, fields);
    }
}
