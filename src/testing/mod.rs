//! In-memory test doubles for the journal and object-store adapters.
//!
//! Gated behind the `test-util` feature (and always available to this crate's own `#[cfg(test)]`
//! modules) so integration tests under `tests/` can depend on it without pulling mock code into
//! release builds of downstream consumers.

mod mock_journal;
mod mock_object_store;

pub use mock_journal::MockJournal;
pub use mock_object_store::{DelayGate, MockObjectStore, RecordedCall};
