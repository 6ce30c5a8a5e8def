//! SQLite-backed record storage.
//!
//! This module provides:
//! - [`LogDatabase`] - Connection pool wrapper with insert, sweep and read operations
//! - [`HistoryQuery`] - Filters for the history view
//! - [`TrafficStats`] - Page-view / unique-visitor counts

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sonic_logs::LogRecord;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::schema::init_schema;

/// Default maximum connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of rows returned by [`LogDatabase::history`].
pub const DEFAULT_HISTORY_LIMIT: u32 = 200;

const INSERT_SQL: &str = "INSERT INTO logs (ip, time, method, path, status, bytes, referer, ua, browser, os, device, device_id, level, tag, query, body, raw, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const SELECT_COLUMNS: &str = "SELECT id, ip, time, method, path, status, bytes, referer, ua, browser, os, device, device_id, level, tag, query, body, raw, created_at FROM logs";

/// Keeps the newest `?` rows by identifier.
const SWEEP_SQL: &str = "DELETE FROM logs WHERE id < (SELECT MIN(id) FROM (SELECT id FROM logs ORDER BY id DESC LIMIT ?))";

/// Filters for [`LogDatabase::history`]. Empty values do not filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Exact device identifier.
    #[serde(default)]
    pub device: Option<String>,
    /// Exact level.
    #[serde(default)]
    pub level: Option<String>,
    /// Substring of the tag.
    #[serde(default)]
    pub tag: Option<String>,
    /// Maximum rows returned.
    #[serde(default = "default_history_limit")]
    pub limit: u32,
}

const fn default_history_limit() -> u32 {
    DEFAULT_HISTORY_LIMIT
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            device: None,
            level: None,
            tag: None,
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl HistoryQuery {
    /// Restricts to one device.
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Restricts to one level.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    /// Restricts to tags containing `tag`.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// Page-view and unique-visitor counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficStats {
    /// Stored rows.
    pub pv: i64,
    /// Distinct source addresses.
    pub uv: i64,
}

/// Persistent record store.
///
/// Cloning is cheap and shares the underlying pool.
#[derive(Clone)]
pub struct LogDatabase {
    pool: SqlitePool,
}

impl std::fmt::Debug for LogDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogDatabase").finish_non_exhaustive()
    }
}

impl LogDatabase {
    /// Opens (creating if needed) the database at `location`.
    ///
    /// `location` is either a plain file path or a `sqlite:` URL. The
    /// connection uses WAL journaling with `synchronous=NORMAL`, and the
    /// schema is created on first use.
    pub async fn connect(location: &str) -> StoreResult<Self> {
        let options = if location.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(location)
                .map_err(|e| StoreError::InvalidLocation(format!("{location}: {e}")))?
        } else {
            if let Some(parent) = std::path::Path::new(location).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            SqliteConnectOptions::new().filename(location)
        };
        let options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(DEFAULT_CONNECT_TIMEOUT)
            .connect_with(options)
            .await?;
        init_schema(&pool).await?;

        info!(location = %location, "database ready");
        Ok(Self { pool })
    }

    /// Wraps an existing pool, creating the schema if needed.
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts one record and writes the assigned identifier back into it.
    pub async fn persist(&self, record: &mut LogRecord) -> StoreResult<i64> {
        let id = bind_record(sqlx::query(INSERT_SQL), record)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        record.id = id;
        Ok(id)
    }

    /// Inserts `records` in one transaction.
    ///
    /// Identifiers are written back only once the transaction has committed;
    /// on any error every record keeps an identifier of 0.
    pub async fn persist_batch(&self, records: &mut [LogRecord]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records.iter() {
            let id = bind_record(sqlx::query(INSERT_SQL), record)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid();
            ids.push(id);
        }
        tx.commit().await?;

        for (record, id) in records.iter_mut().zip(ids) {
            record.id = id;
        }
        debug!(count = records.len(), "batch committed");
        Ok(())
    }

    /// Deletes everything but the newest `max_rows` rows, returning the
    /// number of rows removed.
    pub async fn sweep(&self, max_rows: u64) -> StoreResult<u64> {
        let result = if max_rows == 0 {
            // `LIMIT 0` leaves the subquery empty and `id < NULL` matches nothing.
            sqlx::query("DELETE FROM logs").execute(&self.pool).await?
        } else {
            let limit = i64::try_from(max_rows).unwrap_or(i64::MAX);
            sqlx::query(SWEEP_SQL).bind(limit).execute(&self.pool).await?
        };
        Ok(result.rows_affected())
    }

    /// Newest-first records matching `query`.
    pub async fn history(&self, query: &HistoryQuery) -> StoreResult<Vec<LogRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        builder.push(" WHERE 1=1");

        if let Some(device) = non_empty(query.device.as_deref()) {
            builder.push(" AND device_id = ").push_bind(device.to_string());
        }
        if let Some(level) = non_empty(query.level.as_deref()) {
            builder.push(" AND level = ").push_bind(level.to_string());
        }
        if let Some(tag) = non_empty(query.tag.as_deref()) {
            builder.push(" AND tag LIKE ").push_bind(format!("%{tag}%"));
        }
        builder
            .push(" ORDER BY id DESC LIMIT ")
            .push_bind(i64::from(query.limit));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Row count and distinct source addresses.
    pub async fn stats(&self) -> StoreResult<TrafficStats> {
        let (pv, uv): (i64, i64) = sqlx::query_as("SELECT COUNT(*), COUNT(DISTINCT ip) FROM logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(TrafficStats { pv, uv })
    }

    /// Distinct non-empty device identifiers.
    pub async fn devices(&self) -> StoreResult<Vec<String>> {
        self.distinct("device_id").await
    }

    /// Distinct non-empty tags.
    pub async fn tags(&self) -> StoreResult<Vec<String>> {
        self.distinct("tag").await
    }

    /// Number of stored rows.
    pub async fn count(&self) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Closes the pool. Later operations fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    async fn distinct(&self, column: &'static str) -> StoreResult<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT {column} FROM logs WHERE {column} != '' ORDER BY {column}"
        );
        let rows: Vec<(String,)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(value,)| value).collect())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn bind_record<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    record: &'q LogRecord,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(record.ip.as_str())
        .bind(record.time.as_str())
        .bind(record.method.as_str())
        .bind(record.path.as_str())
        .bind(record.status)
        .bind(record.bytes)
        .bind(record.referer.as_str())
        .bind(record.ua.as_str())
        .bind(record.browser.as_str())
        .bind(record.os.as_str())
        .bind(record.device.as_str())
        .bind(record.device_id.as_str())
        .bind(record.level.as_str())
        .bind(record.tag.as_str())
        .bind(record.query.as_str())
        .bind(record.body.as_str())
        .bind(record.raw.as_str())
        .bind(record.created_at)
}

fn record_from_row(row: &SqliteRow) -> StoreResult<LogRecord> {
    let device: String = row.try_get("device")?;
    Ok(LogRecord {
        id: row.try_get("id")?,
        ip: row.try_get("ip")?,
        time: row.try_get("time")?,
        method: row.try_get("method")?,
        path: row.try_get("path")?,
        status: row.try_get("status")?,
        bytes: row.try_get("bytes")?,
        referer: row.try_get("referer")?,
        ua: row.try_get("ua")?,
        browser: row.try_get("browser")?,
        os: row.try_get("os")?,
        device: device.parse().unwrap_or_default(),
        device_id: row.try_get("device_id")?,
        level: row.try_get("level")?,
        tag: row.try_get("tag")?,
        query: row.try_get("query")?,
        body: row.try_get("body")?,
        raw: row.try_get("raw")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonic_logs::DeviceClass;
    use tempfile::TempDir;
    use test_case::test_case;

    async fn open() -> (LogDatabase, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.db");
        let db = LogDatabase::connect(path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn record(ip: &str, device_id: &str, level: &str, tag: &str) -> LogRecord {
        let mut record = LogRecord::new(format!("{ip} {device_id}"));
        record.ip = ip.to_string();
        record.device_id = device_id.to_string();
        record.level = level.to_string();
        record.tag = tag.to_string();
        record
    }

    #[tokio::test]
    async fn persist_assigns_increasing_ids() {
        let (db, _dir) = open().await;
        let mut first = record("1.1.1.1", "a", "info", "");
        let mut second = record("1.1.1.1", "a", "info", "");

        let id1 = db.persist(&mut first).await.unwrap();
        let id2 = db.persist(&mut second).await.unwrap();

        assert_eq!(first.id, id1);
        assert_eq!(second.id, id2);
        assert!(id2 > id1);
    }

    #[tokio::test]
    async fn stored_record_reads_back_intact() {
        let (db, _dir) = open().await;
        let mut original = record("2.2.2.2", "dev-1", "warn", "gps");
        original.method = "GET".to_string();
        original.path = "/log/dev-1".to_string();
        original.status = 404;
        original.bytes = 1234;
        original.device = DeviceClass::Mobile;
        original.body = r#"{"k":1}"#.to_string();
        db.persist(&mut original).await.unwrap();

        let rows = db.history(&HistoryQuery::default()).await.unwrap();
        assert_eq!(rows, vec![original]);
    }

    #[tokio::test]
    async fn batch_assigns_ids_in_order() {
        let (db, _dir) = open().await;
        let mut batch: Vec<_> = (0..5).map(|i| record("3.3.3.3", "b", "info", &format!("t{i}"))).collect();

        db.persist_batch(&mut batch).await.unwrap();

        assert!(batch.iter().all(LogRecord::is_persisted));
        assert!(batch.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(db.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn failed_batch_assigns_nothing() {
        let (db, _dir) = open().await;
        db.close().await;

        let mut batch = vec![record("4.4.4.4", "c", "info", ""), record("4.4.4.4", "c", "info", "")];
        assert!(db.persist_batch(&mut batch).await.is_err());
        assert!(batch.iter().all(|r| r.id == 0));
    }

    #[tokio::test]
    async fn aborted_transaction_leaves_no_rows() {
        let (db, _dir) = open().await;
        // Reject the second insert of the batch.
        sqlx::query("CREATE TRIGGER fail_second BEFORE INSERT ON logs WHEN NEW.tag = 'boom' BEGIN SELECT RAISE(ABORT, 'boom'); END;")
            .execute(db.pool())
            .await
            .unwrap();

        let mut batch = vec![record("5.5.5.5", "d", "info", "ok"), record("5.5.5.5", "d", "info", "boom")];
        assert!(db.persist_batch(&mut batch).await.is_err());

        assert!(batch.iter().all(|r| r.id == 0));
        assert_eq!(db.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_keeps_most_recent_rows() {
        let (db, _dir) = open().await;
        let mut batch: Vec<_> = (0..10).map(|i| record("6.6.6.6", "e", "info", &i.to_string())).collect();
        db.persist_batch(&mut batch).await.unwrap();

        let deleted = db.sweep(4).await.unwrap();
        assert_eq!(deleted, 6);

        let kept = db.history(&HistoryQuery::default()).await.unwrap();
        let kept_ids: Vec<_> = kept.iter().map(|r| r.id).collect();
        let newest: Vec<_> = batch.iter().rev().take(4).map(|r| r.id).collect();
        assert_eq!(kept_ids, newest);
    }

    #[tokio::test]
    async fn sweep_below_limit_deletes_nothing() {
        let (db, _dir) = open().await;
        let mut batch: Vec<_> = (0..3).map(|_| record("7.7.7.7", "f", "info", "")).collect();
        db.persist_batch(&mut batch).await.unwrap();

        assert_eq!(db.sweep(3).await.unwrap(), 0);
        assert_eq!(db.sweep(100).await.unwrap(), 0);
        assert_eq!(db.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn sweep_to_zero_empties_table() {
        let (db, _dir) = open().await;
        let mut batch: Vec<_> = (0..5).map(|_| record("8.8.8.8", "g", "info", "")).collect();
        db.persist_batch(&mut batch).await.unwrap();

        assert_eq!(db.sweep(0).await.unwrap(), 5);
        assert_eq!(db.count().await.unwrap(), 0);
        assert_eq!(db.sweep(0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn from_pool_creates_schema() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let db = LogDatabase::from_pool(pool).await.unwrap();

        let mut one = record("9.9.9.9", "h", "info", "");
        assert!(db.persist(&mut one).await.unwrap() > 0);
        assert_eq!(db.count().await.unwrap(), 1);
    }

    #[test_case(HistoryQuery::default(), 4 ; "no filter")]
    #[test_case(HistoryQuery::default().with_device("dev-a"), 2 ; "by device")]
    #[test_case(HistoryQuery::default().with_level("error"), 1 ; "by level")]
    #[test_case(HistoryQuery::default().with_tag("net"), 2 ; "tag substring")]
    #[test_case(HistoryQuery::default().with_device(""), 4 ; "empty filter ignored")]
    #[test_case(HistoryQuery::default().with_limit(1), 1 ; "limit")]
    #[tokio::test]
    async fn history_filters(query: HistoryQuery, expected: usize) {
        let (db, _dir) = open().await;
        let mut batch = vec![
            record("1.0.0.1", "dev-a", "info", "network"),
            record("1.0.0.2", "dev-a", "error", "disk"),
            record("1.0.0.3", "dev-b", "info", "net"),
            record("1.0.0.3", "dev-b", "debug", ""),
        ];
        db.persist_batch(&mut batch).await.unwrap();

        let rows = db.history(&query).await.unwrap();
        assert_eq!(rows.len(), expected);
        assert!(rows.windows(2).all(|w| w[0].id > w[1].id));
    }

    #[tokio::test]
    async fn stats_devices_and_tags() {
        let (db, _dir) = open().await;
        let mut batch = vec![
            record("1.0.0.1", "dev-a", "info", "boot"),
            record("1.0.0.1", "dev-b", "info", ""),
            record("1.0.0.2", "", "info", "boot"),
        ];
        db.persist_batch(&mut batch).await.unwrap();

        assert_eq!(db.stats().await.unwrap(), TrafficStats { pv: 3, uv: 2 });
        assert_eq!(db.devices().await.unwrap(), vec!["dev-a", "dev-b"]);
        assert_eq!(db.tags().await.unwrap(), vec!["boot"]);
    }

    #[tokio::test]
    async fn persist_after_close_fails() {
        let (db, _dir) = open().await;
        db.close().await;
        assert!(db.is_closed());

        let mut record = record("8.8.8.8", "", "", "");
        assert!(db.persist(&mut record).await.is_err());
        assert_eq!(record.id, 0);
    }

    #[test]
    fn history_query_deserializes_with_default_limit() {
        let query: HistoryQuery = serde_json::from_str(r#"{"device":"x"}"#).unwrap();
        assert_eq!(query.device.as_deref(), Some("x"));
        assert_eq!(query.limit, DEFAULT_HISTORY_LIMIT);
    }
}
