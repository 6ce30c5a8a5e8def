//! # sonic-server
//!
//! Live nginx access-log viewer: ingestion adapters, the broadcast hub and
//! the HTTP/WebSocket surface, built on axum.
//!
//! ## Features
//!
//! - **Tail adapter**: follows an access log across truncation and rotation
//! - **HTTP ingestion**: single-event, batch (optionally gzip) and push receivers
//! - **Live feed**: every stored record is fanned out to WebSocket viewers;
//!   viewers that cannot keep up are evicted
//! - **Read API**: history, stats, devices and tags over SQLite
//!
//! ## Example
//!
//! ```rust,no_run
//! use sonic_server::{ServerConfig, SonicServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default().with_db_path("./logs.db");
//!     let server = SonicServer::start(config).await.unwrap();
//!     server.serve_with_shutdown(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await.unwrap();
//! }
//! ```
//!
//! ## API Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/ws` | GET | WebSocket live feed |
//! | `/log/{device_id}` | any | Record the request itself as an event |
//! | `/api/log/batch[/{device_id}]` | POST | Batch of JSON events |
//! | `/api/log/push/{device_id}` | any | One JSON or raw text event |
//! | `/api/history` | GET | Newest records, filterable by device, level and tag |
//! | `/api/stats` | GET | Page views and unique addresses |
//! | `/api/devices` | GET | Known device identifiers |
//! | `/api/tags` | GET | Known tags |
//! | `/api/health` | GET | Liveness and viewer count |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod ingest;
pub mod routes;
pub mod server;
pub mod tail;
pub mod viewer;

// Re-export main types
pub use cli::Cli;
pub use config::ServerConfig;
pub use context::PipelineContext;
pub use error::{ServerError, ServerResult};
pub use hub::{BroadcastHub, HubConfig, HubHandle, ViewerId};
pub use routes::create_router;
pub use server::SonicServer;
