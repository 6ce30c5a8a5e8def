//! # sonic-store
//!
//! Persistence for Sonic log records.
//!
//! This crate provides:
//!
//! - [`LogDatabase`] - SQLite-backed gateway: single and transactional batch
//!   inserts, plus the read queries behind the history/stats/devices/tags views
//! - [`RetentionPolicy`] / [`spawn_retention`] - Periodic sweep keeping only the
//!   most recent rows
//! - [`init_schema`] - Table and index creation
//!
//! ## Example
//!
//! ```rust,no_run
//! use sonic_logs::LogRecord;
//! use sonic_store::{LogDatabase, StoreResult};
//!
//! # async fn example() -> StoreResult<()> {
//! let db = LogDatabase::connect("./logs.db").await?;
//!
//! let mut record = LogRecord::new("boot ok");
//! db.persist(&mut record).await?;
//! assert!(record.id > 0);
//!
//! let deleted = db.sweep(100_000).await?;
//! # let _ = deleted;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod retention;
pub mod schema;
pub mod store;

// Re-export main types
pub use error::{StoreError, StoreResult};
pub use retention::{RetentionPolicy, spawn_retention};
pub use schema::init_schema;
pub use store::{DEFAULT_HISTORY_LIMIT, HistoryQuery, LogDatabase, TrafficStats};
