use std::sync::Arc;
use std::time::Duration;

use procpool::store::{
    Expected, JobFilter, JobRecord, JobStatus, JobStore, MemoryStore, Transition,
};
use procpool::task::TaskCall;
use procpool::PoolError;

fn job(n: i64) -> JobRecord {
    JobRecord::queued(TaskCall::single("square", &n).unwrap())
}

#[tokio::test]
async fn test_insert_and_find_in_insertion_order() {
    let store = MemoryStore::new();
    let mut ids = Vec::new();
    for n in 0..10 {
        ids.push(store.insert(job(n)).await.unwrap());
    }

    let found: Vec<_> = store
        .find(JobFilter::all())
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(found, ids);
    assert_eq!(store.len().await, 10);
    assert_eq!(
        store.count(JobFilter::status(JobStatus::Queued)).await.unwrap(),
        10
    );
}

#[tokio::test]
async fn test_duplicate_insert_rejected() {
    let store = MemoryStore::new();
    let record = job(1);
    store.insert(record.clone()).await.unwrap();

    let err = store.insert(record.clone()).await.unwrap_err();
    assert!(matches!(err, PoolError::DuplicateJob(id) if id == record.id));
}

#[tokio::test]
async fn test_find_one_returns_oldest_match() {
    let store = MemoryStore::new();
    let first = store.insert(job(1)).await.unwrap();
    let second = store.insert(job(2)).await.unwrap();

    let oldest = store
        .find_one(JobFilter::status(JobStatus::Queued))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(oldest.id, first);

    store
        .conditional_update(first, JobStatus::Queued.into(), Transition::Claim { worker: 1 })
        .await
        .unwrap();
    let next = store
        .find_one(JobFilter::status(JobStatus::Queued))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.id, second);
}

#[tokio::test]
async fn test_remove() {
    let store = MemoryStore::new();
    let id = store.insert(job(1)).await.unwrap();
    assert!(store.remove(id).await.unwrap());
    assert!(!store.remove(id).await.unwrap());
    assert!(store.is_empty().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert(job(7)).await.unwrap();

    let mut handles = Vec::new();
    for worker in 1..=32u64 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .conditional_update(id, JobStatus::Queued.into(), Transition::Claim { worker })
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let claimed = store.get(&id).await.unwrap();
    assert_eq!(claimed.status, JobStatus::Started);
    assert_eq!(claimed.attempts, 1);
}

#[tokio::test]
async fn test_completion_requires_owner() {
    let store = MemoryStore::new();
    let id = store.insert(job(3)).await.unwrap();
    store
        .conditional_update(id, JobStatus::Queued.into(), Transition::Claim { worker: 1 })
        .await
        .unwrap();

    let stolen = store
        .conditional_update(
            id,
            Expected::owned(JobStatus::Started, 2),
            Transition::Complete {
                result: "9".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(!stolen);

    let owned = store
        .conditional_update(
            id,
            Expected::owned(JobStatus::Started, 1),
            Transition::Complete {
                result: "9".to_string(),
            },
        )
        .await
        .unwrap();
    assert!(owned);
    assert_eq!(store.get(&id).await.unwrap().result.as_deref(), Some("9"));
}

#[tokio::test]
async fn test_illegal_transition_is_an_error() {
    let store = MemoryStore::new();
    let id = store.insert(job(3)).await.unwrap();

    let err = store
        .conditional_update(
            id,
            JobStatus::Queued.into(),
            Transition::Complete {
                result: "9".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::InvalidTransition { .. }));
    assert_eq!(store.get(&id).await.unwrap().status, JobStatus::Queued);
}

#[tokio::test]
async fn test_update_of_missing_record_is_false() {
    let store = MemoryStore::new();
    let updated = store
        .conditional_update(
            uuid::Uuid::new_v4(),
            JobStatus::Queued.into(),
            Transition::Claim { worker: 1 },
        )
        .await
        .unwrap();
    assert!(!updated);
}

#[tokio::test]
async fn test_watch_delivers_existing_then_new_matches() {
    let store = MemoryStore::new();
    let early = store.insert(job(1)).await.unwrap();
    store
        .conditional_update(early, JobStatus::Queued.into(), Transition::Claim { worker: 1 })
        .await
        .unwrap();
    store
        .conditional_update(
            early,
            Expected::owned(JobStatus::Started, 1),
            Transition::Complete {
                result: "1".to_string(),
            },
        )
        .await
        .unwrap();

    let mut rx = store
        .watch(JobFilter::status(JobStatus::Completed))
        .await
        .unwrap();
    assert_eq!(rx.recv().await.unwrap().id, early);

    let late = store.insert(job(2)).await.unwrap();
    // Not completed yet
    assert!(rx.try_recv().is_err());

    store
        .conditional_update(late, JobStatus::Queued.into(), Transition::Claim { worker: 2 })
        .await
        .unwrap();
    store
        .conditional_update(
            late,
            Expected::owned(JobStatus::Started, 2),
            Transition::Complete {
                result: "4".to_string(),
            },
        )
        .await
        .unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.id, late);
    assert_eq!(delivered.result.as_deref(), Some("4"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_watch_fires_again_after_requeue() {
    let store = MemoryStore::new();
    let mut rx = store
        .watch(JobFilter::status(JobStatus::Queued))
        .await
        .unwrap();

    let id = store.insert(job(5)).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().id, id);

    store
        .conditional_update(id, JobStatus::Queued.into(), Transition::Claim { worker: 1 })
        .await
        .unwrap();
    store
        .conditional_update(id, Expected::owned(JobStatus::Started, 1), Transition::Requeue)
        .await
        .unwrap();

    let requeued = rx.recv().await.unwrap();
    assert_eq!(requeued.id, id);
    assert_eq!(requeued.attempts, 1);
    assert!(requeued.worker.is_none());
}
