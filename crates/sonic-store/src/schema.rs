//! Database schema definitions.

use sqlx::SqlitePool;

use crate::error::StoreResult;

/// SQL statement for creating the `logs` table.
///
/// `id` is `AUTOINCREMENT` so identifiers are never reused after a sweep and
/// insertion order can be recovered from them.
pub const LOGS_TABLE_DDL: &str = r"
CREATE TABLE IF NOT EXISTS logs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ip          TEXT NOT NULL DEFAULT '',
    time        TEXT NOT NULL DEFAULT '',
    method      TEXT NOT NULL DEFAULT '',
    path        TEXT NOT NULL DEFAULT '',
    status      INTEGER NOT NULL DEFAULT 0,
    bytes       INTEGER NOT NULL DEFAULT 0,
    referer     TEXT NOT NULL DEFAULT '',
    ua          TEXT NOT NULL DEFAULT '',
    browser     TEXT NOT NULL DEFAULT '',
    os          TEXT NOT NULL DEFAULT '',
    device      TEXT NOT NULL DEFAULT '',
    device_id   TEXT NOT NULL DEFAULT '',
    level       TEXT NOT NULL DEFAULT '',
    tag         TEXT NOT NULL DEFAULT '',
    query       TEXT NOT NULL DEFAULT '',
    body        TEXT NOT NULL DEFAULT '',
    raw         TEXT NOT NULL DEFAULT '',
    created_at  INTEGER NOT NULL
);
";

/// Index supporting time-ordered scans.
pub const CREATED_AT_INDEX_DDL: &str =
    "CREATE INDEX IF NOT EXISTS idx_created_at ON logs(created_at);";

/// Index supporting per-device history.
pub const DEVICE_ID_INDEX_DDL: &str =
    "CREATE INDEX IF NOT EXISTS idx_device_id ON logs(device_id);";

/// Creates the table and indexes if they don't exist.
pub async fn init_schema(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query(LOGS_TABLE_DDL).execute(pool).await?;
    sqlx::query(CREATED_AT_INDEX_DDL).execute(pool).await?;
    sqlx::query(DEVICE_ID_INDEX_DDL).execute(pool).await?;
    Ok(())
}
