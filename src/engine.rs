//! The purge engine: the state machine at the heart of this crate.
//!
//! This is a single-threaded cooperative state machine guarded by one synchronous
//! [`parking_lot::Mutex`] rather than an async one — the critical sections here never await.
//! Every entry point —
//! [`Engine::push`], [`Engine::consume`], and the completion callbacks spawned by dispatch — takes
//! the lock, mutates state synchronously, and releases it before doing anything that suspends.
//! Suspension is always expressed as a `tokio::spawn`ed task that re-enters the engine by calling
//! back into one of these methods once its future resolves.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::oneshot;
use tracing::{debug, error, instrument, trace, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, ObjectStoreError};
use crate::item::PurgeItem;
use crate::journal::JournalAdapter;
use crate::object_store::{ObjectLocator, ObjectStoreAdapter, STORE_FLAGS_NONE};
use crate::striping::{backtrace_object_name, stripe_num_objects};

type ObjectOpFuture = Pin<Box<dyn Future<Output = Result<(), ObjectStoreError>> + Send>>;

struct Inner {
    /// Ordered mapping from post-read journal offset to the item currently executing there.
    in_flight: BTreeMap<u64, PurgeItem>,
    /// Offsets that completed out of order, i.e. before every lower in-flight offset had also
    /// completed. Held here until the gap closes so a later completion of the true minimum can
    /// fold them into the expire frontier in one jump, rather than losing track of them the
    /// moment they leave `in_flight`.
    finished_out_of_order: BTreeSet<u64>,
    /// The largest offset known to be safely trimmable; mirrors the last value handed to
    /// `JournalAdapter::set_expire_pos`, kept here too since the trait has no getter for it.
    expire_pos: u64,
    /// Set once a producer has called [`Engine::begin_drain`]; blocks further `push` calls only.
    draining: bool,
    /// Set once a [`crate::error::EngineError::MalformedEntry`] halts consumption for good.
    fatal: Option<Arc<EngineError>>,
}

/// The purge queue's state machine.
///
/// Holds no reference back to the journal or object-store adapters other than the `Arc`s it was
/// constructed with, so spawned continuations simply clone `Arc<Engine>` to re-enter it — there is
/// no ownership cycle to break with a `Weak` back-reference, since the engine never retains the
/// join handles of the tasks it spawns (see `DESIGN.md`).
pub struct Engine {
    journal: Arc<dyn JournalAdapter>,
    object_store: Arc<dyn ObjectStoreAdapter>,
    config: EngineConfig,
    inner: parking_lot::Mutex<Inner>,
}

/// A handle to the durability of a single [`Engine::push`] call.
///
/// Awaiting it resolves once the item's append has been durably flushed — the translation of the
/// design's `on_appended` callback into something a caller can `.await`.
pub struct PushHandle {
    rx: oneshot::Receiver<Result<(), EngineError>>,
}

impl PushHandle {
    pub async fn wait(self) -> Result<(), EngineError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Journal {
                source: crate::error::JournalError::WriteFailed {
                    reason: "flush task was dropped before completing".to_string(),
                },
            }),
        }
    }
}

impl Engine {
    pub fn new(
        journal: Arc<dyn JournalAdapter>,
        object_store: Arc<dyn ObjectStoreAdapter>,
        config: EngineConfig,
    ) -> Arc<Engine> {
        Arc::new(Engine {
            journal,
            object_store,
            config,
            inner: parking_lot::Mutex::new(Inner {
                in_flight: BTreeMap::new(),
                finished_out_of_order: BTreeSet::new(),
                expire_pos: 0,
                draining: false,
                fatal: None,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn journal(&self) -> &Arc<dyn JournalAdapter> {
        &self.journal
    }

    /// The number of items currently consumed from the journal and being executed against the
    /// object store.
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    /// The current expire frontier, i.e. the largest offset known to be safely trimmable.
    pub fn expire_pos(&self) -> u64 {
        self.inner.lock().expire_pos
    }

    /// Marks the engine as draining: no further [`Engine::push`] calls are accepted. Does not
    /// otherwise alter admission or consumption — see `DESIGN.md` for why the admission bound
    /// itself is not lifted during drain.
    pub fn begin_drain(&self) {
        self.inner.lock().draining = true;
    }

    pub fn is_draining(&self) -> bool {
        self.inner.lock().draining
    }

    /// Whether the engine has finished draining: nothing in flight, and the journal has nothing
    /// left to read. Callers that need a drain-before-shutdown guarantee should poll this before
    /// calling shutdown.
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock();
        inner.in_flight.is_empty() && !self.journal.is_readable()
    }

    /// The fatal error that halted consumption, if any.
    pub fn fatal_error(&self) -> Option<Arc<EngineError>> {
        self.inner.lock().fatal.clone()
    }

    /// Encodes and appends `item`, schedules a flush, and opportunistically tries to consume.
    ///
    /// Returns as soon as the append has been buffered; the returned [`PushHandle`] resolves once
    /// that append is durable. Requires the journal to already be writeable (i.e. `open`/`create`
    /// has already succeeded) and the engine to not be draining.
    #[instrument(skip(self, item), fields(inode_id = item.inode_id))]
    pub fn push(self: &Arc<Self>, item: PurgeItem) -> Result<PushHandle, EngineError> {
        if !self.journal.is_writeable() {
            return Err(EngineError::NotWriteable);
        }
        if self.inner.lock().draining {
            return Err(EngineError::Draining);
        }

        let bytes = item.encode();
        self.journal.append_entry(bytes);
        trace!("appended purge item, scheduling flush");

        let (tx, rx) = oneshot::channel();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let result = engine.journal.flush().await.map_err(EngineError::from);
            let _ = tx.send(result);
        });

        // Opportunistic: a previous push may already have left the journal readable with room
        // under the admission bound, so try to make progress before returning.
        self.consume();

        Ok(PushHandle { rx })
    }

    /// The internal driver. Admits, decodes, and dispatches at most one item per call; re-entered
    /// by completion callbacks (flush is not one of them — only readability and gather finishers
    /// re-enter `consume`).
    #[instrument(skip(self))]
    pub(crate) fn consume(self: &Arc<Self>) {
        let (item, expire_to) = {
            let mut inner = self.inner.lock();

            if inner.fatal.is_some() {
                return;
            }

            if inner.in_flight.len() >= self.config.max_in_flight().get() {
                trace!(
                    in_flight = inner.in_flight.len(),
                    max_in_flight = self.config.max_in_flight().get(),
                    "admission bound reached, deferring consumption"
                );
                return;
            }

            if !self.journal.is_readable() {
                if !self.journal.has_waiter() {
                    trace!("journal not readable, registering waiter");
                    let engine = Arc::clone(self);
                    tokio::spawn(async move {
                        match engine.journal.wait_for_readable().await {
                            Ok(()) => engine.consume(),
                            Err(source) => {
                                warn!(
                                    error = %source,
                                    "journal read failed while waiting for readability; will wait for the next event"
                                );
                            }
                        }
                    });
                }
                return;
            }

            let bytes = self
                .journal
                .try_read_entry()
                .expect("journal reported readable but try_read_entry returned None");

            let item = match PurgeItem::decode(&bytes) {
                Ok(item) => item,
                Err(source) => {
                    let read_pos = self.journal.get_read_pos();
                    let err = EngineError::MalformedEntry { read_pos, source };
                    error!(error = %err, "fatal: malformed journal entry, halting consumption");
                    inner.fatal = Some(Arc::new(err));
                    return;
                }
            };

            let expire_to = self.journal.get_read_pos();
            let previous = inner.in_flight.insert(expire_to, item.clone());
            assert!(
                previous.is_none(),
                "in-flight key {expire_to} was not unique; the journal's read position must strictly increase"
            );

            (item, expire_to)
        };

        self.dispatch(item, expire_to);
    }

    /// Builds the gather of object-store sub-operations for `item` and spawns it, attaching a
    /// finisher that calls [`Engine::complete`] once every sub-operation has resolved.
    fn dispatch(self: &Arc<Self>, item: PurgeItem, expire_to: u64) {
        let mut ops: Vec<ObjectOpFuture> = Vec::new();
        let mut issued_ranged_purge = false;

        if item.size > 0 {
            let num_objects = stripe_num_objects(&item.layout, item.size);
            if num_objects > 0 {
                issued_ranged_purge = true;
                let store = Arc::clone(&self.object_store);
                let layout = item.layout.clone();
                let snap_context = item.snap_context.clone();
                let inode_id = item.inode_id;
                ops.push(Box::pin(async move {
                    store
                        .purge_range(
                            inode_id,
                            &layout,
                            &snap_context,
                            0,
                            num_objects,
                            SystemTime::now(),
                            STORE_FLAGS_NONE,
                        )
                        .await
                }));
            }
        }

        // The ranged purge in the default namespace already subsumes the backtrace object. A
        // namespaced layout keeps the backtrace in a different namespace, so it must still be
        // removed separately even when a ranged purge was issued.
        if !issued_ranged_purge || item.layout.has_pool_namespace() {
            let store = Arc::clone(&self.object_store);
            let name = backtrace_object_name(item.inode_id);
            let locator = ObjectLocator {
                pool_id: item.layout.primary_pool,
                namespace: item.layout.pool_ns.clone(),
            };
            let snap_context = item.snap_context.clone();
            ops.push(Box::pin(async move {
                store
                    .remove(&name, locator, &snap_context, SystemTime::now(), STORE_FLAGS_NONE)
                    .await
            }));
        }

        for &pool_id in &item.old_pools {
            let store = Arc::clone(&self.object_store);
            let name = backtrace_object_name(item.inode_id);
            let snap_context = item.snap_context.clone();
            ops.push(Box::pin(async move {
                store
                    .remove(
                        &name,
                        ObjectLocator::in_pool(pool_id),
                        &snap_context,
                        SystemTime::now(),
                        STORE_FLAGS_NONE,
                    )
                    .await
            }));
        }

        assert!(
            !ops.is_empty(),
            "executed item for inode {} issued no object-store sub-operations",
            item.inode_id
        );

        debug!(
            inode_id = item.inode_id,
            expire_to,
            sub_operations = ops.len(),
            "dispatched purge item"
        );

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let results = futures::future::join_all(ops).await;
            for result in results {
                if let Err(source) = result {
                    // Per the design's open question: a permanent object-store failure is still
                    // treated as "purged" here. There is no quarantine path in the base design.
                    warn!(
                        error = %source,
                        expire_to,
                        "object-store sub-operation failed; item will still be marked complete"
                    );
                }
            }
            engine.complete(expire_to);
        });
    }

    /// Marks the item at `expire_to` complete. If it is the oldest still-outstanding offset (the
    /// minimum of `in_flight`), advances the expire frontier through it and through every
    /// contiguous already-finished offset that follows — folding in any out-of-order completions
    /// that were waiting on exactly this gap to close. Otherwise the completion is recorded in
    /// `finished_out_of_order` and the frontier is left untouched until the true minimum catches
    /// up. Retriggers consumption either way.
    #[instrument(skip(self))]
    fn complete(self: &Arc<Self>, expire_to: u64) {
        {
            let mut inner = self.inner.lock();

            let existed = inner.in_flight.remove(&expire_to).is_some();
            assert!(
                existed,
                "completed offset {expire_to} was not present in the in-flight map"
            );
            inner.finished_out_of_order.insert(expire_to);

            let mut advanced_to = None;
            loop {
                let next_in_flight = inner.in_flight.keys().next().copied();
                let next_finished = inner.finished_out_of_order.iter().next().copied();

                let oldest_is_finished = match (next_finished, next_in_flight) {
                    (Some(finished), Some(pending)) => finished < pending,
                    (Some(_), None) => true,
                    (None, _) => false,
                };

                if !oldest_is_finished {
                    break;
                }

                let offset = inner
                    .finished_out_of_order
                    .pop_first()
                    .expect("checked non-empty above");
                inner.expire_pos = offset;
                advanced_to = Some(offset);
            }

            if let Some(new_expire_pos) = advanced_to {
                self.journal.set_expire_pos(new_expire_pos);
                self.journal.trim();
                debug!(expire_to, expire_pos = new_expire_pos, "advanced expire frontier");
            } else {
                trace!(
                    expire_to,
                    "completed out of order; expire frontier unchanged"
                );
            }
        }

        self.consume();
    }
}
