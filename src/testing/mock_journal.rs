//! An in-memory [`JournalAdapter`] for unit and integration tests.
//!
//! Durable only for the lifetime of the process — there is no actual disk behind it — which is
//! the point: tests exercise the engine's admission, dispatch, and completion logic without
//! needing a real append-only log underneath.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::error::JournalError;
use crate::journal::{JournalAdapter, JournalFormat};

struct State {
    entries: VecDeque<Bytes>,
    read_pos: u64,
    expire_pos: u64,
    trimmed_to: u64,
    writeable: bool,
    format: Option<JournalFormat>,
}

pub struct MockJournal {
    state: parking_lot::Mutex<State>,
    notify: Notify,
    has_waiter: AtomicBool,
    fail_next_flush: AtomicBool,
}

impl MockJournal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: parking_lot::Mutex::new(State {
                entries: VecDeque::new(),
                read_pos: 0,
                expire_pos: 0,
                trimmed_to: 0,
                writeable: false,
                format: None,
            }),
            notify: Notify::new(),
            has_waiter: AtomicBool::new(false),
            fail_next_flush: AtomicBool::new(false),
        })
    }

    /// Builds a journal as if recovered after a restart: `entries` are already durable and
    /// `read_pos` marks how many of them were already consumed before the crash.
    pub fn with_recovered_entries(entries: Vec<Bytes>, read_pos: u64) -> Arc<Self> {
        let journal = Self::new();
        {
            let mut state = journal.state.lock();
            state.entries = entries.into();
            state.read_pos = read_pos;
            state.expire_pos = read_pos;
        }
        journal
    }

    /// Causes the next call to `flush` to fail, then succeed as normal afterwards.
    pub fn make_next_flush_fail(&self) {
        self.fail_next_flush.store(true, Ordering::SeqCst);
    }

    pub fn trimmed_to(&self) -> u64 {
        self.state.lock().trimmed_to
    }

    pub fn expire_pos(&self) -> u64 {
        self.state.lock().expire_pos
    }

    pub fn format(&self) -> Option<JournalFormat> {
        self.state.lock().format.clone()
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }
}

#[async_trait]
impl JournalAdapter for MockJournal {
    async fn recover(&self) -> Result<(), JournalError> {
        Ok(())
    }

    async fn create(&self, format: JournalFormat) -> Result<(), JournalError> {
        let mut state = self.state.lock();
        state.format = Some(format);
        state.entries.clear();
        state.read_pos = 0;
        state.expire_pos = 0;
        state.trimmed_to = 0;
        Ok(())
    }

    fn set_writeable(&self) {
        self.state.lock().writeable = true;
    }

    fn is_writeable(&self) -> bool {
        self.state.lock().writeable
    }

    fn is_readable(&self) -> bool {
        let state = self.state.lock();
        state.read_pos < state.entries.len() as u64
    }

    fn append_entry(&self, bytes: Bytes) {
        self.state.lock().entries.push_back(bytes);
        self.notify.notify_one();
    }

    async fn flush(&self) -> Result<(), JournalError> {
        if self.fail_next_flush.swap(false, Ordering::SeqCst) {
            return Err(JournalError::WriteFailed {
                reason: "injected test failure".to_string(),
            });
        }
        Ok(())
    }

    fn has_waiter(&self) -> bool {
        self.has_waiter.load(Ordering::SeqCst)
    }

    async fn wait_for_readable(&self) -> Result<(), JournalError> {
        self.has_waiter.store(true, Ordering::SeqCst);
        self.notify.notified().await;
        self.has_waiter.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn try_read_entry(&self) -> Option<Bytes> {
        let mut state = self.state.lock();
        let idx = state.read_pos;
        if idx >= state.entries.len() as u64 {
            return None;
        }
        let bytes = state.entries[idx as usize].clone();
        state.read_pos += 1;
        Some(bytes)
    }

    fn get_read_pos(&self) -> u64 {
        self.state.lock().read_pos
    }

    fn set_expire_pos(&self, pos: u64) {
        self.state.lock().expire_pos = pos;
    }

    fn trim(&self) {
        let mut state = self.state.lock();
        state.trimmed_to = state.expire_pos;
    }

    async fn shutdown(&self) -> Result<(), JournalError> {
        self.state.lock().writeable = false;
        Ok(())
    }
}
