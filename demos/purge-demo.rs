//! Exercises a purge queue end-to-end against a pair of minimal in-memory adapters.
//!
//! Not a benchmark or a load test — just enough to show the lifecycle a metadata server would
//! actually drive: `create`, a handful of `push`es, waiting for them to drain, `shutdown`.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use mds_purge_queue::{
    EngineConfigBuilder, JournalAdapter, JournalFormat, Layout, ObjectLocator, ObjectStoreAdapter,
    PurgeItem, PurgeQueue, SnapContext, StoreFlags,
};
use mds_purge_queue::error::{JournalError, ObjectStoreError};
use tokio::sync::Notify;

struct DemoJournal {
    inner: parking_lot::Mutex<DemoJournalState>,
    notify: Notify,
}

struct DemoJournalState {
    entries: VecDeque<Bytes>,
    read_pos: u64,
    writeable: bool,
}

impl DemoJournal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: parking_lot::Mutex::new(DemoJournalState {
                entries: VecDeque::new(),
                read_pos: 0,
                writeable: false,
            }),
            notify: Notify::new(),
        })
    }
}

#[async_trait]
impl JournalAdapter for DemoJournal {
    async fn recover(&self) -> Result<(), JournalError> {
        Ok(())
    }

    async fn create(&self, _format: JournalFormat) -> Result<(), JournalError> {
        Ok(())
    }

    fn set_writeable(&self) {
        self.inner.lock().writeable = true;
    }

    fn is_writeable(&self) -> bool {
        self.inner.lock().writeable
    }

    fn is_readable(&self) -> bool {
        let state = self.inner.lock();
        state.read_pos < state.entries.len() as u64
    }

    fn append_entry(&self, bytes: Bytes) {
        self.inner.lock().entries.push_back(bytes);
        self.notify.notify_one();
    }

    async fn flush(&self) -> Result<(), JournalError> {
        Ok(())
    }

    fn has_waiter(&self) -> bool {
        false
    }

    async fn wait_for_readable(&self) -> Result<(), JournalError> {
        self.notify.notified().await;
        Ok(())
    }

    fn try_read_entry(&self) -> Option<Bytes> {
        let mut state = self.inner.lock();
        let idx = state.read_pos;
        if idx >= state.entries.len() as u64 {
            return None;
        }
        state.read_pos += 1;
        Some(state.entries[idx as usize].clone())
    }

    fn get_read_pos(&self) -> u64 {
        self.inner.lock().read_pos
    }

    fn set_expire_pos(&self, _pos: u64) {}

    fn trim(&self) {}

    async fn shutdown(&self) -> Result<(), JournalError> {
        Ok(())
    }
}

struct DemoObjectStore;

#[async_trait]
impl ObjectStoreAdapter for DemoObjectStore {
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
        println!("purging inode {inode_id:x}: objects [{first_obj}, {})", first_obj + count);
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
        println!("removing object {object_name} from pool {}", locator.pool_id);
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let layout = Layout {
        stripe_unit: 4 << 20,
        stripe_count: 1,
        object_size: 4 << 20,
        primary_pool: 2,
        pool_ns: None,
    };
    let config = EngineConfigBuilder::new(layout.clone())
        .max_in_flight(std::num::NonZeroUsize::new(4).unwrap())
        .build()
        .expect("valid config");

    let queue = PurgeQueue::new(DemoJournal::new(), Arc::new(DemoObjectStore), config);
    queue.create().await.expect("create a fresh journal");

    for inode_id in 1..=3u64 {
        let item = PurgeItem {
            inode_id,
            size: 16 << 20,
            layout: layout.clone(),
            old_pools: BTreeSet::new(),
            snap_context: SnapContext { seq: 0, snaps: vec![] },
        };
        queue.push(item).expect("push").wait().await.expect("durable");
    }

    while queue.engine().in_flight_count() > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    queue.shutdown().await.expect("shutdown");
}
