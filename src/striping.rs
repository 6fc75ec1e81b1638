//! The striping calculator and backtrace object naming.
//!
//! Both are, strictly, external collaborators per the design (the metadata server's inode layer
//! owns object naming, and a shared striping module maps `(layout, size)` to an object count).
//! They are small, pure, and have no state worth mocking, so they are kept as plain functions
//! here rather than behind a trait — unlike the journal and object-store adapters, there is
//! nothing here a test double would ever need to override.

use crate::item::Layout;

/// Computes how many striped data objects a file of `size` bytes occupies under `layout`.
///
/// A `size` of zero always yields zero objects (the "no striped data" case from the data model).
/// Otherwise this mirrors the standard stripe/period arithmetic: a "period" is one pass over all
/// `stripe_count` objects at `stripe_unit` bytes each, and the file occupies some whole number of
/// full periods plus a partial period at the tail.
pub fn stripe_num_objects(layout: &Layout, size: u64) -> u64 {
    if size == 0 || layout.stripe_unit == 0 || layout.stripe_count == 0 {
        return 0;
    }

    let stripe_count = u64::from(layout.stripe_count);
    let period = layout.stripe_unit * stripe_count;
    let num_periods = (size + period - 1) / period;
    let remainder = size - (num_periods - 1) * period;
    let stripes_in_last_period =
        ((remainder + layout.stripe_unit - 1) / layout.stripe_unit).min(stripe_count);

    (num_periods - 1) * stripe_count + stripes_in_last_period
}

/// The canonical name of an inode's primary backtrace object.
///
/// This is object index 0 of the inode, named the way every other data object is named, so that
/// scrub and recovery tooling can always find it deterministically from the inode ID alone.
pub fn backtrace_object_name(inode_id: u64) -> String {
    format!("{:x}.00000000", inode_id)
}
