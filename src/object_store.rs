//! The object-store adapter boundary.
//!
//! This is the other external collaborator: a thin, asynchronous contract over whatever client
//! library actually talks to the backing object store. Both operations are idempotent — removing
//! an object that is already absent is success, not an error — which is what lets the engine
//! treat "gather completed" as "purged" without tracking per-object existence itself.

use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::ObjectStoreError;
use crate::item::{Layout, SnapContext};

/// Opaque flags forwarded to the object-store client, e.g. to request best-effort deletion
/// semantics. The engine never interprets these; it only passes through whatever the caller
/// attached to the [`crate::item::PurgeItem`] it is executing.
pub type StoreFlags = u32;

pub const STORE_FLAGS_NONE: StoreFlags = 0;

/// Where a single named object lives: its pool, and an optional namespace within that pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocator {
    pub pool_id: i64,
    pub namespace: Option<String>,
}

impl ObjectLocator {
    pub fn in_pool(pool_id: i64) -> Self {
        Self {
            pool_id,
            namespace: None,
        }
    }

    pub fn in_pool_namespace(pool_id: i64, namespace: impl Into<String>) -> Self {
        Self {
            pool_id,
            namespace: Some(namespace.into()),
        }
    }
}

/// The object-store client as seen by the purge engine.
///
/// Implementations are expected to be cheap to clone (or already wrapped in an `Arc`) and safe to
/// share across concurrently-dispatched sub-operations; the engine calls these methods without
/// any synchronization of its own beyond not issuing two operations for the same object name
/// concurrently within a single [`crate::item::PurgeItem`].
#[async_trait]
pub trait ObjectStoreAdapter: Send + Sync + 'static {
    /// Removes the `count` striped data objects of `inode_id` starting at index `first_obj`,
    /// under the given layout and snapshot context.
    async fn purge_range(
        &self,
        inode_id: u64,
        layout: &Layout,
        snap_context: &SnapContext,
        first_obj: u64,
        count: u64,
        mtime: SystemTime,
        flags: StoreFlags,
    ) -> Result<(), ObjectStoreError>;

    /// Removes a single named object (typically a backtrace object).
    async fn remove(
        &self,
        object_name: &str,
        locator: ObjectLocator,
        snap_context: &SnapContext,
        mtime: SystemTime,
        flags: StoreFlags,
    ) -> Result<(), ObjectStoreError>;
}
