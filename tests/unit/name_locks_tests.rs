//! Unit tests for per-name lock isolation.

use std::sync::Arc;
use std::time::Duration;

use agent_supervisor::orchestrator::locks::NameLocks;

#[tokio::test]
async fn same_name_is_exclusive() {
    let locks = Arc::new(NameLocks::new());
    let guard = locks.lock("a").await;

    let contender = {
        let locks = Arc::clone(&locks);
        tokio::spawn(async move {
            let _guard = locks.lock("a").await;
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!contender.is_finished(), "second lock on the same name must wait");

    drop(guard);
    tokio::time::timeout(Duration::from_secs(5), contender)
        .await
        .expect("contender acquires after release")
        .expect("join");
}

#[tokio::test]
async fn different_names_do_not_block() {
    let locks = NameLocks::new();
    let _a = locks.lock("a").await;

    tokio::time::timeout(Duration::from_secs(1), locks.lock("b"))
        .await
        .expect("independent name is not blocked");
}

#[tokio::test]
async fn opposite_pair_orders_do_not_deadlock() {
    let locks = Arc::new(NameLocks::new());

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let (x, y) = if i % 2 == 0 { ("a", "b") } else { ("b", "a") };
                let _guard = locks.lock_pair(x, y).await;
                tokio::task::yield_now().await;
            })
        })
        .collect();

    for task in tasks {
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("no deadlock")
            .expect("join");
    }
}

#[tokio::test]
async fn released_names_are_dropped_from_the_table() {
    let locks = NameLocks::new();
    for name in ["a", "b", "c", "d"] {
        let _guard = locks.lock(name).await;
    }
    assert_eq!(locks.len(), 1, "only the most recent name may linger");

    let held = locks.lock("held").await;
    let _other = locks.lock("other").await;
    assert_eq!(locks.len(), 2, "held names survive pruning");
    drop(held);
    assert!(!locks.is_empty());
}
