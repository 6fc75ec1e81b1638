//! The journal adapter boundary.
//!
//! The engine never talks to the host's journaled log directly; it talks to whatever implements
//! [`JournalAdapter`]. Every operation here is an `async fn` rather than a callback-taking method:
//! each callback collapses into the future that method returns, and "at most one waiter" becomes a
//! precondition the engine checks with [`JournalAdapter::has_waiter`] before calling
//! [`JournalAdapter::wait_for_readable`] — see `DESIGN.md` for why this translation is faithful to
//! a callback-style contract.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::JournalError;

/// The layout/format a fresh journal is created with. Opaque to the engine beyond being passed
/// through to [`JournalAdapter::create`]; a real implementation interprets it as a data-pool
/// layout and an on-disk format version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalFormat {
    pub pool_id: i64,
    pub format_version: u32,
}

/// The external contract the purge engine drives.
///
/// Every method here corresponds 1:1 to an operation in the design's journal adapter section.
/// Implementations must uphold:
/// - `try_read_entry` is only ever called when `is_readable()` is true.
/// - At most one [`JournalAdapter::wait_for_readable`] future is ever outstanding at a time; the
///   engine checks [`JournalAdapter::has_waiter`] first, but a correct implementation should
///   treat a second concurrent call as a logic error in its own right.
#[async_trait]
pub trait JournalAdapter: Send + Sync + 'static {
    /// Replays the journal's head so that the read position lands on the first unexecuted entry.
    async fn recover(&self) -> Result<(), JournalError>;

    /// Creates a fresh, empty journal using the given format.
    async fn create(&self, format: JournalFormat) -> Result<(), JournalError>;

    /// Marks the journal writeable. Called after a successful `recover` or `create`.
    fn set_writeable(&self);

    fn is_writeable(&self) -> bool;

    /// Whether `try_read_entry` would currently return `Some`.
    fn is_readable(&self) -> bool;

    /// Buffers an entry for durable write. Returns immediately; durability is only guaranteed
    /// once a subsequent [`JournalAdapter::flush`] completes.
    fn append_entry(&self, bytes: Bytes);

    /// Ensures all prior appends are durable.
    async fn flush(&self) -> Result<(), JournalError>;

    /// Whether a [`JournalAdapter::wait_for_readable`] future is already outstanding.
    fn has_waiter(&self) -> bool;

    /// Resolves the next time [`JournalAdapter::is_readable`] becomes true.
    async fn wait_for_readable(&self) -> Result<(), JournalError>;

    /// Non-blocking; must only be called when [`JournalAdapter::is_readable`] is true.
    fn try_read_entry(&self) -> Option<Bytes>;

    /// The offset of the next entry after the last successful `try_read_entry`.
    fn get_read_pos(&self) -> u64;

    /// Advances the position up to (and including) which the log may be physically reclaimed.
    fn set_expire_pos(&self, pos: u64);

    /// Physically reclaims everything up to the current expire position.
    fn trim(&self);

    /// Tears the journal down. Safe to call with operations still pending; they are dropped.
    async fn shutdown(&self) -> Result<(), JournalError>;
}
