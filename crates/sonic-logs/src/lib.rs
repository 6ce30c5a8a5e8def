//! # sonic-logs
//!
//! Record model and parsing pipeline for the Sonic live log viewer.
//!
//! This crate provides:
//!
//! - [`LogRecord`] - The structured unit that flows from ingestion to viewers
//! - [`DeviceClass`] - Mobile/desktop classification derived from the user agent
//! - [`CompiledMatcher`] - Field extractor compiled from an nginx `log_format`
//! - [`LineParser`] - Tiered parser (active format, combined fallback, bare line)
//! - [`UaClassifier`] - User-agent classification capability
//! - [`derive_routing_fields`] - Device/level/tag extraction from paths and queries
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sonic_logs::{CompiledMatcher, LineParser, WootheeClassifier};
//!
//! let matcher = CompiledMatcher::compile(
//!     r#"$remote_addr - $remote_user [$time_local] "$request" $status"#,
//! );
//! let parser = LineParser::new(Arc::new(matcher), Arc::new(WootheeClassifier::new()));
//!
//! let record = parser.parse(
//!     r#"10.0.0.1 - - [10/Oct/2025:10:00:00 +0000] "GET /health HTTP/1.1" 204"#,
//! );
//! assert_eq!(record.ip, "10.0.0.1");
//! assert_eq!(record.method, "GET");
//! assert_eq!(record.path, "/health");
//! assert_eq!(record.status, 204);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod enrich;
pub mod error;
pub mod format;
pub mod parser;
pub mod routing;
pub mod types;

// Re-export main types
pub use enrich::{UaClassifier, UaInfo, WootheeClassifier, enrich_user_agent};
pub use error::{LogError, Result};
pub use format::{CompiledMatcher, Field};
pub use parser::{LineParser, MatchTier};
pub use routing::{DEFAULT_ROUTING_MARKER, apply_query_pairs, derive_routing_fields};
pub use types::{DeviceClass, LogRecord, time_local};
