//! An in-memory [`ObjectStoreAdapter`] for unit and integration tests.
//!
//! Records every call it receives in submission order, can be told in advance to fail a
//! specific object name or inode's ranged purge exactly once — enough to exercise the engine's
//! "a failed sub-operation still completes the item" behavior without a real backend — and can
//! gate a specific call so a test controls exactly when it resolves, which is what lets a test
//! force a deterministic completion order across two concurrently-dispatched items.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::ObjectStoreError;
use crate::item::{Layout, SnapContext};
use crate::object_store::{ObjectLocator, ObjectStoreAdapter, StoreFlags};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    PurgeRange {
        inode_id: u64,
        first_obj: u64,
        count: u64,
    },
    Remove {
        object_name: String,
        pool_id: i64,
        namespace: Option<String>,
    },
}

/// A one-shot gate installed by [`MockObjectStore::gate_next_remove_of`] or
/// [`MockObjectStore::gate_next_purge_of`]. The gated call is recorded as usual but then waits
/// here until [`DelayGate::release`] is called. Built on a zero-permit [`Semaphore`] rather than
/// a [`tokio::sync::Notify`] so that a test calling `release()` before the gated call starts
/// waiting does not lose the wakeup.
pub struct DelayGate {
    semaphore: Arc<Semaphore>,
}

impl DelayGate {
    /// Lets the gated call proceed. Safe to call before or after the call starts waiting.
    pub fn release(&self) {
        self.semaphore.add_permits(1);
    }
}

#[derive(Default)]
pub struct MockObjectStore {
    calls: Mutex<Vec<RecordedCall>>,
    fail_removes_named: Mutex<HashSet<String>>,
    fail_purges_for_inode: Mutex<HashSet<u64>>,
    remove_gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    purge_gates: Mutex<HashMap<u64, Arc<Semaphore>>>,
}

impl MockObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("mock object store lock poisoned").clone()
    }

    /// The next `remove` of `object_name` will fail; afterwards it is forgotten and subsequent
    /// removes of the same name succeed.
    pub fn fail_next_remove_of(&self, object_name: impl Into<String>) {
        self.fail_removes_named
            .lock()
            .expect("mock object store lock poisoned")
            .insert(object_name.into());
    }

    pub fn fail_next_purge_of(&self, inode_id: u64) {
        self.fail_purges_for_inode
            .lock()
            .expect("mock object store lock poisoned")
            .insert(inode_id);
    }

    /// The next `remove` of `object_name` records its call as usual but does not resolve until
    /// the returned [`DelayGate`] is released.
    pub fn gate_next_remove_of(&self, object_name: impl Into<String>) -> DelayGate {
        let semaphore = Arc::new(Semaphore::new(0));
        self.remove_gates
            .lock()
            .expect("mock object store lock poisoned")
            .insert(object_name.into(), Arc::clone(&semaphore));
        DelayGate { semaphore }
    }

    /// The next `purge_range` of `inode_id` records its call as usual but does not resolve until
    /// the returned [`DelayGate`] is released.
    pub fn gate_next_purge_of(&self, inode_id: u64) -> DelayGate {
        let semaphore = Arc::new(Semaphore::new(0));
        self.purge_gates
            .lock()
            .expect("mock object store lock poisoned")
            .insert(inode_id, Arc::clone(&semaphore));
        DelayGate { semaphore }
    }
}

#[async_trait]
impl ObjectStoreAdapter for MockObjectStore {
    async fn purge_range(
        &self,
        inode_id: u64,
        _layout: &Layout,
        _snap_context: &SnapContext,
        first_obj: u64,
        count: u64,
        _mtime: SystemTime,
        _flags: StoreFlags,
    ) -> Result<(), ObjectStoreError> {
        self.calls
            .lock()
            .expect("mock object store lock poisoned")
            .push(RecordedCall::PurgeRange {
                inode_id,
                first_obj,
                count,
            });

        let gate = self
            .purge_gates
            .lock()
            .expect("mock object store lock poisoned")
            .remove(&inode_id);
        if let Some(semaphore) = gate {
            let _ = semaphore.acquire().await;
        }

        let should_fail = self
            .fail_purges_for_inode
            .lock()
            .expect("mock object store lock poisoned")
            .remove(&inode_id);
        if should_fail {
            return Err(ObjectStoreError::RangedPurgeFailed {
                inode_id,
                reason: "injected test failure".to_string(),
            });
        }
        Ok(())
    }

    async fn remove(
        &self,
        object_name: &str,
        locator: ObjectLocator,
        _snap_context: &SnapContext,
        _mtime: SystemTime,
        _flags: StoreFlags,
    ) -> Result<(), ObjectStoreError> {
        self.calls
            .lock()
            .expect("mock object store lock poisoned")
            .push(RecordedCall::Remove {
                object_name: object_name.to_string(),
                pool_id: locator.pool_id,
                namespace: locator.namespace,
            });

        let gate = self
            .remove_gates
            .lock()
            .expect("mock object store lock poisoned")
            .remove(object_name);
        if let Some(semaphore) = gate {
            let _ = semaphore.acquire().await;
        }

        let should_fail = self
            .fail_removes_named
            .lock()
            .expect("mock object store lock poisoned")
            .remove(object_name);
        if should_fail {
            return Err(ObjectStoreError::RemoveFailed {
                object_name: object_name.to_string(),
                reason: "injected test failure".to_string(),
            });
        }
        Ok(())
    }
}
