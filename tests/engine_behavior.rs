//! End-to-end behavior of the purge engine against the in-memory mock adapters.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::time::Duration;

use mds_purge_queue::testing::{MockJournal, MockObjectStore, RecordedCall};
use mds_purge_queue::{EngineConfigBuilder, EngineError, Layout, PurgeItem, PurgeQueue, SnapContext};

fn layout(primary_pool: i64, pool_ns: Option<&str>) -> Layout {
    Layout {
        stripe_unit: 4 << 20,
        stripe_count: 1,
        object_size: 4 << 20,
        primary_pool,
        pool_ns: pool_ns.map(str::to_string),
    }
}

fn item(inode_id: u64, size: u64, layout: Layout, old_pools: &[i64]) -> PurgeItem {
    PurgeItem {
        inode_id,
        size,
        layout,
        old_pools: old_pools.iter().copied().collect::<BTreeSet<_>>(),
        snap_context: SnapContext {
            seq: 10,
            snaps: vec![1, 2],
        },
    }
}

/// Polls `condition` until it returns `true`, panicking if it never does. Used instead of a fixed
/// sleep anywhere a state change is driven by a spawned task rather than something directly
/// awaitable.
async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true: {what}");
}

async fn wait_until_idle(queue: &PurgeQueue) {
    wait_until(|| queue.engine().in_flight_count() == 0, "engine drained in-flight work").await;
}

#[tokio::test]
async fn zero_size_item_issues_a_single_backtrace_removal() {
    let journal = MockJournal::new();
    let store = MockObjectStore::new();
    let config = EngineConfigBuilder::new(layout(2, None)).build().unwrap();
    let queue = PurgeQueue::new(journal, store.clone(), config);
    queue.create().await.unwrap();

    queue
        .push(item(0x42, 0, layout(2, None), &[]))
        .unwrap()
        .wait()
        .await
        .unwrap();
    wait_until_idle(&queue).await;

    let calls = store.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(
        &calls[0],
        RecordedCall::Remove { object_name, pool_id, namespace }
            if object_name == "42.00000000" && *pool_id == 2 && namespace.is_none()
    ));
}

#[tokio::test]
async fn nonzero_size_item_with_default_namespace_issues_only_a_ranged_purge() {
    let journal = MockJournal::new();
    let store = MockObjectStore::new();
    let config = EngineConfigBuilder::new(layout(2, None)).build().unwrap();
    let queue = PurgeQueue::new(journal, store.clone(), config);
    queue.create().await.unwrap();

    queue
        .push(item(0x7, 16 << 20, layout(2, None), &[]))
        .unwrap()
        .wait()
        .await
        .unwrap();
    wait_until_idle(&queue).await;

    let calls = store.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(
        &calls[0],
        RecordedCall::PurgeRange { inode_id, first_obj, count }
            if *inode_id == 0x7 && *first_obj == 0 && *count == 4
    ));
}

#[tokio::test]
async fn namespaced_layout_also_removes_the_backtrace_object() {
    let journal = MockJournal::new();
    let store = MockObjectStore::new();
    let ns_layout = layout(2, Some("ns-a"));
    let config = EngineConfigBuilder::new(ns_layout.clone()).build().unwrap();
    let queue = PurgeQueue::new(journal, store.clone(), config);
    queue.create().await.unwrap();

    queue
        .push(item(0x9, 16 << 20, ns_layout, &[]))
        .unwrap()
        .wait()
        .await
        .unwrap();
    wait_until_idle(&queue).await;

    let calls = store.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls
        .iter()
        .any(|call| matches!(call, RecordedCall::PurgeRange { count: 4, .. })));
    assert!(calls.iter().any(|call| matches!(
        call,
        RecordedCall::Remove { object_name, namespace: Some(ns), .. }
            if object_name == "9.00000000" && ns == "ns-a"
    )));
}

#[tokio::test]
async fn old_pools_get_their_own_backtrace_removal() {
    let journal = MockJournal::new();
    let store = MockObjectStore::new();
    let config = EngineConfigBuilder::new(layout(2, None)).build().unwrap();
    let queue = PurgeQueue::new(journal, store.clone(), config);
    queue.create().await.unwrap();

    queue
        .push(item(0x11, 0, layout(2, None), &[7, 9]))
        .unwrap()
        .wait()
        .await
        .unwrap();
    wait_until_idle(&queue).await;

    let calls = store.calls();
    assert_eq!(calls.len(), 3);
    let pools: BTreeSet<i64> = calls
        .iter()
        .filter_map(|call| match call {
            RecordedCall::Remove { pool_id, .. } => Some(*pool_id),
            _ => None,
        })
        .collect();
    assert_eq!(pools, BTreeSet::from([2, 7, 9]));
}

#[tokio::test]
async fn a_bound_of_one_serializes_two_items() {
    let journal = MockJournal::new();
    let store = MockObjectStore::new();
    let config = EngineConfigBuilder::new(layout(2, None))
        .max_in_flight(NonZeroUsize::new(1).unwrap())
        .build()
        .unwrap();
    let queue = PurgeQueue::new(journal, store.clone(), config);
    queue.create().await.unwrap();

    queue.push(item(1, 0, layout(2, None), &[])).unwrap();
    queue.push(item(2, 0, layout(2, None), &[])).unwrap();
    wait_until_idle(&queue).await;

    assert_eq!(store.calls().len(), 2);
    assert_eq!(queue.engine().in_flight_count(), 0);
}

#[tokio::test]
async fn out_of_order_completion_does_not_advance_past_the_oldest_in_flight_item() {
    let journal = MockJournal::new();
    let store = MockObjectStore::new();
    let config = EngineConfigBuilder::new(layout(2, None))
        .max_in_flight(NonZeroUsize::new(2).unwrap())
        .build()
        .unwrap();
    let queue = PurgeQueue::new(journal, store.clone(), config);
    queue.create().await.unwrap();

    // Item at offset 1 (inode 1) is gated so it cannot complete until released; item at offset 2
    // (inode 2) is free to complete immediately, forcing the out-of-order ordering deterministically
    // rather than leaving it to tokio's scheduler.
    let gate = store.gate_next_remove_of("1.00000000");
    queue.push(item(1, 0, layout(2, None), &[])).unwrap();
    queue.push(item(2, 0, layout(2, None), &[])).unwrap();

    // Offset 2 finishes first; offset 1 is still outstanding, so the frontier must not move.
    wait_until(|| queue.engine().in_flight_count() == 1, "offset 2 completed").await;
    assert_eq!(queue.engine().expire_pos(), 0);
    assert_eq!(queue.engine().in_flight_count(), 1);

    // Releasing offset 1 must fold both completions in at once: the frontier jumps straight to
    // offset 2, the later of the two, not to offset 1.
    gate.release();
    wait_until_idle(&queue).await;
    assert_eq!(queue.engine().expire_pos(), 2);
    assert_eq!(store.calls().len(), 2);
}

#[tokio::test]
async fn a_failed_sub_operation_still_completes_the_item() {
    let journal = MockJournal::new();
    let store = MockObjectStore::new();
    store.fail_next_remove_of("42.00000000");
    let config = EngineConfigBuilder::new(layout(2, None)).build().unwrap();
    let queue = PurgeQueue::new(journal, store.clone(), config);
    queue.create().await.unwrap();

    queue
        .push(item(0x42, 0, layout(2, None), &[]))
        .unwrap()
        .wait()
        .await
        .unwrap();
    wait_until_idle(&queue).await;

    assert_eq!(queue.engine().in_flight_count(), 0);
    assert_eq!(store.calls().len(), 1);
}

#[tokio::test]
async fn recovery_resumes_from_entries_left_unread_before_a_crash() {
    let pending = item(0x99, 0, layout(2, None), &[]);
    let journal = MockJournal::with_recovered_entries(vec![pending.encode()], 0);
    let store = MockObjectStore::new();
    let config = EngineConfigBuilder::new(layout(2, None)).build().unwrap();
    let queue = PurgeQueue::new(journal, store.clone(), config);

    queue.open().await.unwrap();
    wait_until_idle(&queue).await;

    let calls = store.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(
        &calls[0],
        RecordedCall::Remove { object_name, .. } if object_name == "99.00000000"
    ));
}

#[tokio::test]
async fn a_malformed_entry_halts_consumption_for_good() {
    let mut corrupt = item(0x1234, 0, layout(2, None), &[]).encode().to_vec();
    // Bump current_version past what this decoder understands, same as item.rs's own
    // `rejects_an_unsupported_future_version` case, to get a deterministic decode failure.
    corrupt[1] += 1;

    let journal = MockJournal::with_recovered_entries(vec![corrupt.into()], 0);
    let store = MockObjectStore::new();
    let config = EngineConfigBuilder::new(layout(2, None)).build().unwrap();
    let queue = PurgeQueue::new(journal, store.clone(), config);

    queue.open().await.unwrap();

    wait_until(|| queue.engine().fatal_error().is_some(), "consumption halted").await;

    assert!(matches!(
        queue.engine().fatal_error().unwrap().as_ref(),
        EngineError::MalformedEntry { .. }
    ));
    assert_eq!(queue.engine().in_flight_count(), 0);
    assert!(store.calls().is_empty());

    // Consumption stays halted: further triggers are no-ops rather than retrying the bad entry.
    queue.engine().consume();
    assert_eq!(queue.engine().in_flight_count(), 0);
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn push_is_rejected_once_the_engine_is_draining() {
    let journal = MockJournal::new();
    let store = MockObjectStore::new();
    let config = EngineConfigBuilder::new(layout(2, None)).build().unwrap();
    let queue = PurgeQueue::new(journal, store.clone(), config);
    queue.create().await.unwrap();

    queue.begin_drain();
    assert!(queue.engine().is_draining());

    let err = queue
        .push(item(0x1, 0, layout(2, None), &[]))
        .unwrap_err();
    assert!(matches!(err, EngineError::Draining));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn is_drained_reports_true_once_in_flight_work_finishes_and_the_journal_is_exhausted() {
    let journal = MockJournal::new();
    let store = MockObjectStore::new();
    let config = EngineConfigBuilder::new(layout(2, None)).build().unwrap();
    let queue = PurgeQueue::new(journal, store.clone(), config);
    queue.create().await.unwrap();

    queue
        .push(item(0x1, 0, layout(2, None), &[]))
        .unwrap()
        .wait()
        .await
        .unwrap();
    wait_until_idle(&queue).await;

    queue.begin_drain();
    assert!(queue.engine().is_drained());
}
