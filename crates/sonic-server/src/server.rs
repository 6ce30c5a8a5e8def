//! Server lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use sonic_logs::{CompiledMatcher, LineParser, WootheeClassifier};
use sonic_store::{LogDatabase, spawn_retention};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::context::PipelineContext;
use crate::error::{ServerError, ServerResult};
use crate::hub::{BroadcastHub, HubConfig};
use crate::routes::create_router;
use crate::tail::spawn_tail;

/// The log viewer: storage, hub, background tasks and HTTP surface.
///
/// [`start`](Self::start) brings up everything except the listener; one of
/// the `serve_*` methods then runs HTTP until shutdown and stops the
/// background tasks afterwards.
#[derive(Debug)]
pub struct SonicServer {
    ctx: Arc<PipelineContext>,
    tasks: Vec<JoinHandle<()>>,
}

impl SonicServer {
    /// Opens the database and starts the hub, retention sweep and (when a
    /// log file is configured) the tail adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub async fn start(config: ServerConfig) -> ServerResult<Self> {
        let store = LogDatabase::connect(&config.db_path).await?;
        info!(db = %config.db_path, "database ready");

        let (hub, hub_task) = BroadcastHub::spawn(
            HubConfig::default()
                .with_queue_capacity(config.viewer_queue_capacity)
                .with_max_viewers(config.max_viewers),
        );

        let matcher = CompiledMatcher::compile(&config.log_format);
        if !matcher.is_usable() {
            warn!(format = %config.log_format, "configured log format is unusable, using fallback parsing only");
        }
        let parser = LineParser::new(Arc::new(matcher), Arc::new(WootheeClassifier::new()))
            .with_routing_marker(config.routing_marker.clone());

        let retention = spawn_retention(store.clone(), config.retention_policy());
        let tail_enabled = !config.log_file.as_os_str().is_empty();

        let ctx = Arc::new(PipelineContext::new(config, store, hub, Arc::new(parser)));
        let mut tasks = vec![hub_task, retention];
        if tail_enabled {
            tasks.push(spawn_tail(ctx.clone()));
        }

        Ok(Self { ctx, tasks })
    }

    /// Shared pipeline state.
    #[must_use]
    pub fn context(&self) -> Arc<PipelineContext> {
        self.ctx.clone()
    }

    /// Create the router without starting the server.
    pub fn router(&self) -> axum::Router {
        create_router(self.ctx.clone())
    }

    /// Binds the configured address and serves until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.ctx.config().addr;
        match TcpListener::bind(addr).await {
            Ok(listener) => self.serve_listener(listener, shutdown).await,
            Err(e) => {
                self.stop().await;
                Err(ServerError::BindFailed(addr, e))
            }
        }
    }

    /// Serves on an already bound listener until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails.
    pub async fn serve_listener<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "log viewer listening");

        let router = create_router(self.ctx.clone());
        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        self.stop().await;
        result?;
        info!("log viewer shut down");
        Ok(())
    }

    /// Aborts background tasks and closes the database.
    pub async fn stop(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.ctx.store().close().await;
    }
}
