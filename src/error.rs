//! Error types for every module boundary in the purge queue.
//!
//! Each external-facing error kind lines up with the error table in the design's error handling
//! section: a malformed journal entry is fatal, a journal write failure is reported back through
//! the caller's `push` completion, a journal read failure just waits for the next readability
//! event, and an object-store failure is retried by the adapter before ever reaching us.

use snafu::Snafu;

use crate::item::ItemCodecError;

/// Errors surfaced by a [`crate::journal::JournalAdapter`] implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum JournalError {
    /// The underlying log rejected an append or could not durably flush it.
    #[snafu(display("journal write failed: {}", reason))]
    WriteFailed { reason: String },

    /// A `wait_for_readable` registration, or the read it unblocked, failed.
    #[snafu(display("journal read failed: {}", reason))]
    ReadFailed { reason: String },

    /// `recover`/`create` failed to bring the journal to a usable state.
    #[snafu(display("journal could not be opened: {}", reason))]
    OpenFailed { reason: String },

    /// `shutdown` failed to tear down the journal cleanly.
    #[snafu(display("journal shutdown failed: {}", reason))]
    ShutdownFailed { reason: String },
}

/// Errors surfaced by a [`crate::object_store::ObjectStoreAdapter`] implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ObjectStoreError {
    /// A ranged purge of striped data objects failed.
    #[snafu(display("ranged purge of inode {} failed: {}", inode_id, reason))]
    RangedPurgeFailed { inode_id: u64, reason: String },

    /// A single-object removal failed.
    #[snafu(display("removal of object '{}' failed: {}", object_name, reason))]
    RemoveFailed {
        object_name: String,
        reason: String,
    },
}

/// Top-level error type returned by the purge engine and lifecycle façade.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EngineError {
    /// A journal entry could not be decoded during consumption.
    ///
    /// Fatal: per the design, consumption halts and an operator must intervene. There is no
    /// poison-entry quarantine in the base design.
    #[snafu(display("malformed journal entry at read position {}: {}", read_pos, source))]
    MalformedEntry {
        read_pos: u64,
        source: ItemCodecError,
    },

    /// `push` was called before the journal finished `open`/`create`.
    #[snafu(display("journal is not writeable yet"))]
    NotWriteable,

    /// `push` was called after [`crate::engine::Engine::begin_drain`].
    #[snafu(display("engine is draining and no longer accepts new items"))]
    Draining,

    /// The journal adapter reported an error.
    #[snafu(display("journal error: {}", source))]
    Journal { source: JournalError },

    /// The object-store adapter reported an error for a sub-operation that the engine still
    /// expects to eventually resolve, used only for telemetry; per the design's open question,
    /// the gather still completes and the engine advances the expire frontier regardless.
    #[snafu(display("object store error: {}", source))]
    ObjectStore { source: ObjectStoreError },
}

impl From<JournalError> for EngineError {
    fn from(source: JournalError) -> Self {
        EngineError::Journal { source }
    }
}

impl From<ObjectStoreError> for EngineError {
    fn from(source: ObjectStoreError) -> Self {
        EngineError::ObjectStore { source }
    }
}
