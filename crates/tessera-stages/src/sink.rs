//! Record sinks for the load stage.
//!
//! A sink persists one document's chunk records and reports how many were
//! written and how many failed. A sink-level error (the file cannot be opened,
//! the database is gone) is returned as `Err`; per-record problems are
//! counted instead.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use tessera_core::{CoreResult, Payload, Record, StorageConfig, SinkKind, TesseraError};

/// Outcome of writing a batch of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkReport {
    pub loaded: u64,
    pub failed: u64,
    /// One message per failed record.
    pub errors: Vec<String>,
}

impl SinkReport {
    fn fail(&mut self, message: String) {
        self.failed += 1;
        self.errors.push(message);
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Destination for bundled records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Sink name reported in the load summary.
    fn name(&self) -> &str;

    /// Persist a document's records.
    async fn write(&self, document_id: &str, payload: &Payload) -> CoreResult<SinkReport>;
}

/// Build the configured sink.
pub fn sink_from_config(config: &StorageConfig) -> CoreResult<Arc<dyn RecordSink>> {
    Ok(match config.sink {
        SinkKind::Jsonl => Arc::new(JsonlSink::new(&config.path)),
        SinkKind::Sqlite => Arc::new(SqliteSink::open(&config.path, &config.table)?),
    })
}

fn record_id(record: &Record) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

/// One JSON object per line.
///
/// Writing a document replaces any lines already stored for it, so a retried
/// load leaves each record in the file once. The new file is staged next to
/// the target and renamed into place.
pub struct JsonlSink {
    path: PathBuf,
    // Serializes read-modify-write cycles from concurrent documents.
    lock: tokio::sync::Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Existing lines that belong to other documents. A trailing fragment
    /// without a newline is left over from an interrupted write and dropped.
    async fn retained_lines(&self, document_id: &str) -> CoreResult<String> {
        let existing = match tokio::fs::read_to_string(&self.path).await {
            Ok(existing) => existing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => {
                return Err(TesseraError::storage_with_source(
                    format!("cannot read {}", self.path.display()),
                    e,
                ))
            }
        };
        let complete = match existing.rfind('\n') {
            Some(end) => &existing[..=end],
            None => "",
        };
        let mut kept = String::with_capacity(complete.len());
        for line in complete.lines() {
            let owner = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|v| v.get("document_id").and_then(Value::as_str).map(String::from));
            if owner.as_deref() != Some(document_id) {
                kept.push_str(line);
                kept.push('\n');
            }
        }
        Ok(kept)
    }
}

#[async_trait]
impl RecordSink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn write(&self, document_id: &str, payload: &Payload) -> CoreResult<SinkReport> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut content = self.retained_lines(document_id).await?;
        let mut report = SinkReport::default();
        for (index, record) in payload.records.iter().enumerate() {
            if record_id(record).is_none() {
                report.fail(format!("record {} has no id", index));
                continue;
            }
            let mut line: Map<String, Value> = record.clone();
            line.insert("document_id".into(), Value::from(document_id));
            match serde_json::to_string(&line) {
                Ok(json) => {
                    content.push_str(&json);
                    content.push('\n');
                    report.loaded += 1;
                }
                Err(e) => report.fail(format!("record {}: {}", index, e)),
            }
        }

        let staging = self.staging_path();
        let mut file = tokio::fs::File::create(&staging)
            .await
            .map_err(|e| TesseraError::storage_with_source(format!("cannot create {}", staging.display()), e))?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| TesseraError::storage_with_source(format!("cannot replace {}", self.path.display()), e))?;

        debug!(path = %self.path.display(), loaded = report.loaded, failed = report.failed, "jsonl write complete");
        Ok(report)
    }
}

/// One row per record in a SQLite table, keyed by document and record id.
///
/// Relationship-graph edges go to `<table>_edges`.
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
    table: String,
}

impl SqliteSink {
    /// Open (or create) the database. `:memory:` opens an in-memory database.
    pub fn open(path: impl AsRef<Path>, table: &str) -> CoreResult<Self> {
        if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') || table.is_empty() {
            return Err(TesseraError::configuration(format!("invalid table name '{}'", table)));
        }
        let path = path.as_ref();
        let conn = if path.to_str() == Some(":memory:") {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(path)
        }
        .map_err(|e| TesseraError::storage_with_source("cannot open sqlite database", e))?;

        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                document_id  TEXT NOT NULL,
                id           TEXT NOT NULL,
                page         INTEGER,
                text         TEXT,
                record       TEXT NOT NULL,
                PRIMARY KEY (document_id, id)
            );
            CREATE TABLE IF NOT EXISTS {table}_edges (
                document_id  TEXT NOT NULL,
                source       TEXT NOT NULL,
                target       TEXT NOT NULL,
                type         TEXT NOT NULL,
                mentions     INTEGER NOT NULL,
                PRIMARY KEY (document_id, source, target, type)
            );
            "#,
            table = table
        ))
        .map_err(|e| TesseraError::storage_with_source("cannot create sqlite tables", e))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: table.to_string(),
        })
    }

    /// Number of stored records for a document.
    pub fn count(&self, document_id: &str) -> CoreResult<u64> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| TesseraError::storage("sqlite connection lock poisoned"))?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE document_id = ?1", self.table),
                params![document_id],
                |row| row.get(0),
            )
            .map_err(|e| TesseraError::storage_with_source("count query failed", e))?;
        Ok(count as u64)
    }

    fn write_blocking(
        conn: &Mutex<Connection>,
        table: &str,
        document_id: &str,
        payload: &Payload,
    ) -> CoreResult<SinkReport> {
        let mut conn = conn
            .lock()
            .map_err(|_| TesseraError::storage("sqlite connection lock poisoned"))?;
        let tx = conn
            .transaction()
            .map_err(|e| TesseraError::storage_with_source("cannot start transaction", e))?;
        let mut report = SinkReport::default();

        for (index, record) in payload.records.iter().enumerate() {
            let Some(id) = record_id(record) else {
                report.fail(format!("record {} has no id", index));
                continue;
            };
            let json = match serde_json::to_string(record) {
                Ok(json) => json,
                Err(e) => {
                    report.fail(format!("record {}: {}", index, e));
                    continue;
                }
            };
            let result = tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (document_id, id, page, text, record) VALUES (?1, ?2, ?3, ?4, ?5)",
                    table
                ),
                params![
                    document_id,
                    id,
                    record.get("page").and_then(Value::as_i64),
                    record.get("text").and_then(Value::as_str),
                    json
                ],
            );
            match result {
                Ok(_) => report.loaded += 1,
                Err(e) => report.fail(format!("record {}: {}", index, e)),
            }
        }

        let edges = payload
            .artifact(tessera_core::RELATIONSHIP_GRAPH)
            .and_then(|g| g.get("edges"))
            .and_then(Value::as_array);
        for edge in edges.into_iter().flatten() {
            let field = |key: &str| edge.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO {}_edges (document_id, source, target, type, mentions) VALUES (?1, ?2, ?3, ?4, ?5)",
                    table
                ),
                params![
                    document_id,
                    field("source"),
                    field("target"),
                    field("type"),
                    edge.get("mentions").and_then(Value::as_i64).unwrap_or(1)
                ],
            )
            .map_err(|e| TesseraError::storage_with_source("cannot store graph edge", e))?;
        }

        tx.commit()
            .map_err(|e| TesseraError::storage_with_source("cannot commit transaction", e))?;
        Ok(report)
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn write(&self, document_id: &str, payload: &Payload) -> CoreResult<SinkReport> {
        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();
        let document_id = document_id.to_string();
        let payload = payload.clone();
        tokio::task::spawn_blocking(move || Self::write_blocking(&conn, &table, &document_id, &payload))
            .await
            .map_err(|e| TesseraError::Internal(format!("sqlite writer task failed: {}", e)))?
    }
}

/// Keeps records in memory.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(String, Record)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record written so far, with its document id.
    pub fn records(&self) -> Vec<(String, Record)> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, document_id: &str, payload: &Payload) -> CoreResult<SinkReport> {
        let mut stored = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut report = SinkReport::default();
        for (index, record) in payload.records.iter().enumerate() {
            if record_id(record).is_none() {
                report.fail(format!("record {} has no id", index));
                continue;
            }
            stored.push((document_id.to_string(), record.clone()));
            report.loaded += 1;
        }
        Ok(report)
    }
}
