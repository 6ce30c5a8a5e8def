//! Shared pipeline state handed to every adapter and handler.

use std::sync::Arc;

use sonic_logs::{LineParser, LogRecord, enrich_user_agent};
use sonic_store::LogDatabase;
use tracing::{error, warn};

use crate::config::ServerConfig;
use crate::hub::HubHandle;

/// Storage, hub and parser shared by all ingestion paths.
///
/// Every record goes through [`ingest`](Self::ingest) or
/// [`ingest_batch`](Self::ingest_batch): it is persisted first so viewers see
/// its identifier, then published. A storage failure is logged and the
/// record is still published with identifier 0.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    config: Arc<ServerConfig>,
    store: LogDatabase,
    hub: HubHandle,
    parser: Arc<LineParser>,
}

impl PipelineContext {
    /// Create a context from its parts.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        store: LogDatabase,
        hub: HubHandle,
        parser: Arc<LineParser>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            hub,
            parser,
        }
    }

    /// The effective configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The record store.
    #[must_use]
    pub fn store(&self) -> &LogDatabase {
        &self.store
    }

    /// The broadcast hub.
    #[must_use]
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// The line parser for the configured format.
    #[must_use]
    pub fn parser(&self) -> &LineParser {
        &self.parser
    }

    /// Fills browser/OS/device on a request-derived record.
    pub fn enrich(&self, record: &mut LogRecord) {
        enrich_user_agent(record, self.parser.classifier().as_ref());
    }

    /// Persists then publishes one record. Returns the assigned identifier,
    /// or 0 if persistence failed.
    pub async fn ingest(&self, mut record: LogRecord) -> i64 {
        if let Err(e) = self.store.persist(&mut record).await {
            warn!(error = %e, raw = %record.raw, "failed to persist record, publishing anyway");
        }
        let id = record.id;
        self.hub.publish(record).await;
        id
    }

    /// Persists `records` in one transaction, then publishes each in order.
    ///
    /// Returns whether the batch was stored. Every record is published either
    /// way.
    pub async fn ingest_batch(&self, mut records: Vec<LogRecord>) -> bool {
        let stored = match self.store.persist_batch(&mut records).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, count = records.len(), "failed to persist batch, publishing anyway");
                false
            }
        };
        for record in records {
            self.hub.publish(record).await;
        }
        stored
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use sonic_logs::{CompiledMatcher, LineParser, WootheeClassifier};
    use sonic_store::LogDatabase;
    use tempfile::TempDir;

    use super::PipelineContext;
    use crate::config::ServerConfig;
    use crate::hub::{BroadcastHub, HubConfig};

    /// Context over a fresh database in a temporary directory.
    pub(crate) async fn context_with(config: ServerConfig) -> (Arc<PipelineContext>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = LogDatabase::connect(dir.path().join("test.db").to_str().unwrap())
            .await
            .unwrap();
        let (hub, _task) = BroadcastHub::spawn(
            HubConfig::default()
                .with_queue_capacity(config.viewer_queue_capacity)
                .with_max_viewers(config.max_viewers),
        );
        let parser = LineParser::new(
            Arc::new(CompiledMatcher::compile(&config.log_format)),
            Arc::new(WootheeClassifier::new()),
        )
        .with_routing_marker(config.routing_marker.clone());
        let ctx = PipelineContext::new(config, db, hub, Arc::new(parser));
        (Arc::new(ctx), dir)
    }

    pub(crate) async fn context() -> (Arc<PipelineContext>, TempDir) {
        context_with(ServerConfig::default()).await
    }
}
