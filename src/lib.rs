//! A durable, crash-safe purge queue for deferred removal of a deleted file's backing objects.
//!
//! A metadata server that deletes a file cannot afford to remove every backing object
//! synchronously with the operation that deleted it — there may be millions of objects, the
//! object store may be slow or momentarily unavailable, and the server must not lose track of the
//! work if it crashes partway through. This crate journals each deletion as a [`item::PurgeItem`]
//! before admitting it, then drives a bounded number of them concurrently against an
//! [`object_store::ObjectStoreAdapter`], only trimming the journal once an item's object-store
//! work is known to be done.
//!
//! The three pieces a caller wires together:
//! - [`journal::JournalAdapter`] — the durable log backing the queue.
//! - [`object_store::ObjectStoreAdapter`] — the backend the queue deletes objects from.
//! - [`lifecycle::PurgeQueue`] — the façade that owns an [`engine::Engine`] and carries it
//!   through `open`/`create`/`push`/`shutdown`.

#[macro_use]
extern crate tracing;

pub mod config;
pub mod engine;
pub mod error;
pub mod item;
pub mod journal;
pub mod lifecycle;
pub mod object_store;
pub mod striping;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::{Engine, PushHandle};
pub use error::EngineError;
pub use item::{Layout, PurgeItem, SnapContext};
pub use journal::{JournalAdapter, JournalFormat};
pub use lifecycle::PurgeQueue;
pub use object_store::{ObjectLocator, ObjectStoreAdapter, StoreFlags};
