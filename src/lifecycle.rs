//! The public façade: wires a journal and an object store to an [`Engine`] and carries it through
//! its open/create/shutdown lifecycle.
//!
//! The design's `init`/`open`/`create`/`shutdown` are each expressed here as a plain `async fn`
//! rather than a callback-taking method — the same translation used throughout this crate for the
//! design's callback-style contracts (see `journal.rs` and `DESIGN.md`).

use std::sync::Arc;

use tracing::instrument;

use crate::config::EngineConfig;
use crate::engine::{Engine, PushHandle};
use crate::error::EngineError;
use crate::item::PurgeItem;
use crate::journal::{JournalAdapter, JournalFormat};
use crate::object_store::ObjectStoreAdapter;

/// Owns an [`Engine`] and drives it through recovery/bootstrap and eventual shutdown.
///
/// This is the type a metadata server embeds: one per data pool that needs a purge queue.
pub struct PurgeQueue {
    engine: Arc<Engine>,
}

impl PurgeQueue {
    pub fn new(
        journal: Arc<dyn JournalAdapter>,
        object_store: Arc<dyn ObjectStoreAdapter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine: Engine::new(journal, object_store, config),
        }
    }

    /// Starts the callback executor and timer the design calls for.
    ///
    /// A no-op here: the design's `init()` starts a dedicated callback executor and timer
    /// thread, but this crate's continuations already run on the ambient `tokio` runtime the
    /// embedding metadata server provides, so there is nothing separate to spin up. Kept as an
    /// explicit call so callers written against the design's lifecycle still have an `init`
    /// step to call before `open`/`create`.
    pub fn init(&self) {}

    /// Replays an existing journal and marks it writeable. Call this on every startup where a
    /// purge queue is already known to exist for this data pool.
    #[instrument(skip(self))]
    pub async fn open(&self) -> Result<(), EngineError> {
        self.engine.journal().recover().await?;
        self.engine.journal().set_writeable();
        self.engine.consume();
        Ok(())
    }

    /// Bootstraps a brand-new, empty journal using this queue's configured default layout, then
    /// marks it writeable. Call this only when no journal yet exists for this data pool — e.g. the
    /// legacy-filesystem upgrade path where a purge queue is being introduced for the first time.
    #[instrument(skip(self))]
    pub async fn create(&self) -> Result<(), EngineError> {
        let format = JournalFormat {
            pool_id: self.engine.config().default_data_pool_layout().primary_pool,
            format_version: 1,
        };
        self.engine.journal().create(format).await?;
        self.engine.journal().set_writeable();
        Ok(())
    }

    /// Enqueues a deletion intent. See [`Engine::push`].
    pub fn push(&self, item: PurgeItem) -> Result<PushHandle, EngineError> {
        self.engine.push(item)
    }

    /// Stops admitting new items. Existing in-flight work continues to completion; callers that
    /// want a graceful drain should poll [`Engine::is_drained`] before calling [`PurgeQueue::shutdown`].
    pub fn begin_drain(&self) {
        self.engine.begin_drain();
    }

    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.engine.begin_drain();
        self.engine.journal().shutdown().await?;
        Ok(())
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}
