//! Durable queue properties against the in-memory store

mod common;

use proptest::prelude::*;
use recrawl::queue::{Take, TOMBSTONE};
use recrawl::store::KvStore;

use common::{memory_queue, numbered, numbers};

// ============================================================================
// Conservation and ordering
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every pushed item comes out exactly once, in FIFO order
    #[test]
    fn prop_pop_conserves_items(
        count in 0usize..200,
        batches in proptest::collection::vec(1usize..40, 1..10),
    ) {
        tokio_test::block_on(async {
            let (_, queue) = memory_queue();
            let items: Vec<_> = (0..count as i64).map(numbered).collect();
            let pushed = queue.push_many("q", &items, false).await.unwrap();
            prop_assert_eq!(pushed, count);

            let mut popped = Vec::new();
            for batch in &batches {
                popped.extend(queue.pop_batch("q", Take::Count(*batch)).await.unwrap());
            }
            popped.extend(queue.pop_batch("q", Take::All).await.unwrap());

            prop_assert_eq!(numbers(&popped), (0..count as i64).collect::<Vec<_>>());
            prop_assert_eq!(queue.length("q").await.unwrap(), 0);
            Ok(())
        })?;
    }

    /// A priority push pops before everything already queued
    #[test]
    fn prop_priority_pops_first(backlog in 0usize..50, urgent in -1000i64..0) {
        tokio_test::block_on(async {
            let (_, queue) = memory_queue();
            let items: Vec<_> = (0..backlog as i64).map(numbered).collect();
            queue.push_many("q", &items, false).await.unwrap();
            queue.push("q", &numbered(urgent), true).await.unwrap();

            let first = queue.pop_batch("q", Take::Count(1)).await.unwrap();
            prop_assert_eq!(numbers(&first), vec![urgent]);
            prop_assert_eq!(queue.length("q").await.unwrap(), backlog);
            Ok(())
        })?;
    }
}

// ============================================================================
// Tombstones and malformed entries
// ============================================================================

#[tokio::test]
async fn test_tombstones_never_block_reads() {
    let (store, queue) = memory_queue();
    store
        .rpush(
            "q",
            &[
                TOMBSTONE.to_string(),
                r#"{"n":1}"#.to_string(),
                TOMBSTONE.to_string(),
                r#"{"n":2}"#.to_string(),
            ],
        )
        .await
        .unwrap();

    let peeked = queue.peek("q", 1).await.unwrap();
    assert_eq!(numbers(&peeked), vec![1]);

    let popped = queue.pop_batch("q", Take::All).await.unwrap();
    assert_eq!(numbers(&popped), vec![1, 2]);
}

#[tokio::test]
async fn test_non_object_entries_are_dropped() {
    let (store, queue) = memory_queue();
    store
        .rpush(
            "q",
            &["[1,2]".to_string(), "not json".to_string(), r#"{"n":7}"#.to_string()],
        )
        .await
        .unwrap();

    let popped = queue.pop_batch("q", Take::All).await.unwrap();
    assert_eq!(numbers(&popped), vec![7]);
    assert_eq!(queue.length("q").await.unwrap(), 0);
}

#[tokio::test]
async fn test_clear_reports_existence() {
    let (_, queue) = memory_queue();
    assert!(!queue.clear("q").await.unwrap());

    queue.push("q", &numbered(1), false).await.unwrap();
    assert!(queue.clear("q").await.unwrap());
    assert_eq!(queue.length("q").await.unwrap(), 0);
}
