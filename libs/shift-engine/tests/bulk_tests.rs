mod common;

use std::sync::Arc;
use std::time::Duration;

use shift_api::{KeyedStore, RecordKey, Value};
use shift_engine::{
    CompactCodec, DeliveryGuarantee, EngineError, JobCoordinator, JobOutcome, JobStatus, Pipeline, RecordErrorPolicy,
    RestartPolicy,
};
use storage_memory::MemoryStore;

use common::*;

fn fast_restarts(max_restarts: u32) -> RestartPolicy {
    RestartPolicy {
        max_restarts,
        backoff: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn bulk_migrates_every_record() {
    let registry = registry();
    let old = Arc::new(MemoryStore::new("orders"));
    let new = Arc::new(MemoryStore::new("orders_v3"));

    put_order(old.as_ref(), &registry, 1, 123, "pending").await;
    put_order(old.as_ref(), &registry, 2, 456, "shipped").await;
    // Written before the currency field existed.
    let v1 = registry.codec_version(ORDER, 1).unwrap();
    old.put(RecordKey::Int(3), v1.encode(&order(3, 789, "pending")).unwrap())
        .await
        .unwrap();

    let coordinator = JobCoordinator::default();
    let pipeline = Pipeline::bulk(old.clone(), migration(&registry), new.clone()).with_options(options(2));
    let job = coordinator.submit(pipeline, "orders-bulk", DeliveryGuarantee::AtLeastOnce);

    let outcome = tokio::time::timeout(WAIT, coordinator.join(&job)).await.unwrap().unwrap();
    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(coordinator.status(&job), JobStatus::Completed);

    let first = read_v3(new.as_ref(), &registry, 1).await.unwrap();
    assert_eq!(first.get("accountId"), Some(&Value::Int64(123)));
    assert!(!first.contains("customerId"));
    assert_eq!(first.get("currency"), Some(&Value::from("GBP")));

    let third = read_v3(new.as_ref(), &registry, 3).await.unwrap();
    assert_eq!(third.get("accountId"), Some(&Value::Int64(789)));
    assert_eq!(third.get("currency"), Some(&Value::from("GBP")));

    // Keys are carried over untouched and the new binaries carry the new identity.
    let migrated = sorted_scan(new.as_ref()).await;
    let keys: Vec<_> = migrated.iter().map(|r| r.key.clone()).collect();
    assert_eq!(keys, vec![RecordKey::Int(1), RecordKey::Int(2), RecordKey::Int(3)]);
    for entry in &migrated {
        assert_eq!(CompactCodec::inspect(&entry.value).unwrap().type_name, ORDER_V3);
    }

    let metrics = job.metrics();
    assert_eq!((metrics.read, metrics.written, metrics.skipped), (3, 3, 0));
    assert_eq!(old.len().await, 3);
}

#[tokio::test]
async fn rerunning_bulk_is_idempotent() {
    let registry = registry();
    let old = Arc::new(MemoryStore::new("orders"));
    let new = Arc::new(MemoryStore::new("orders_v3"));
    for id in 1..=20 {
        put_order(old.as_ref(), &registry, id, 100 + id, "pending").await;
    }

    let coordinator = JobCoordinator::default();
    let run = |name: &'static str| {
        let pipeline = Pipeline::bulk(old.clone(), migration(&registry), new.clone()).with_options(options(4));
        coordinator.submit(pipeline, name, DeliveryGuarantee::AtLeastOnce)
    };

    let first = run("bulk-1");
    assert_eq!(first.join().await.unwrap(), JobOutcome::Completed);
    let after_first = sorted_scan(new.as_ref()).await;

    let second = run("bulk-2");
    assert_eq!(second.join().await.unwrap(), JobOutcome::Completed);
    let after_second = sorted_scan(new.as_ref()).await;

    assert_eq!(after_first.len(), 20);
    assert_eq!(after_first, after_second);
    assert_ne!(first.id(), second.id());
}

#[tokio::test]
async fn undecodable_record_fails_job() {
    let registry = registry();
    let old = Arc::new(MemoryStore::new("orders"));
    let new = Arc::new(MemoryStore::new("orders_v3"));
    put_order(old.as_ref(), &registry, 1, 123, "pending").await;
    old.put(RecordKey::Int(2), vec![1, 2, 3]).await.unwrap();

    let coordinator = JobCoordinator::default();
    let pipeline = Pipeline::bulk(old.clone(), migration(&registry), new.clone()).with_options(options(1));
    let job = coordinator.submit(pipeline, "orders-bulk", DeliveryGuarantee::AtLeastOnce);

    let err = tokio::time::timeout(WAIT, job.join()).await.unwrap().unwrap_err();
    match err {
        EngineError::JobExecution { job: name, cause } => {
            assert_eq!(name, "orders-bulk");
            assert!(cause.is_record_error(), "{cause}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job.error().is_some());
    // Record errors are never retried.
    assert_eq!(job.metrics().restarts, 0);
}

#[tokio::test]
async fn skip_policy_leaves_bad_records_behind() {
    let registry = registry();
    let old = Arc::new(MemoryStore::new("orders"));
    let new = Arc::new(MemoryStore::new("orders_v3"));
    put_order(old.as_ref(), &registry, 1, 123, "pending").await;
    put_order(old.as_ref(), &registry, 3, 789, "pending").await;
    old.put(RecordKey::Int(2), vec![0xC7]).await.unwrap();

    let mut opts = options(2);
    opts.on_record_error = RecordErrorPolicy::Skip;
    let coordinator = JobCoordinator::default();
    let pipeline = Pipeline::bulk(old.clone(), migration(&registry), new.clone()).with_options(opts);
    let job = coordinator.submit(pipeline, "orders-bulk", DeliveryGuarantee::None);

    assert_eq!(job.join().await.unwrap(), JobOutcome::Completed);
    let metrics = job.metrics();
    assert_eq!((metrics.read, metrics.written, metrics.skipped), (3, 2, 1));
    assert!(read_v3(new.as_ref(), &registry, 2).await.is_none());
}

#[tokio::test]
async fn transient_sink_outage_restarts_bulk() {
    let registry = registry();
    let old = Arc::new(MemoryStore::new("orders"));
    let new = Arc::new(MemoryStore::new("orders_v3"));
    for id in 1..=10 {
        put_order(old.as_ref(), &registry, id, id * 10, "pending").await;
    }
    new.set_available(false);

    let coordinator = JobCoordinator::new(fast_restarts(100));
    let pipeline = Pipeline::bulk(old.clone(), migration(&registry), new.clone()).with_options(options(2));
    let job = coordinator.submit(pipeline, "orders-bulk", DeliveryGuarantee::AtLeastOnce);

    let sink = new.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        sink.set_available(true);
    });

    assert_eq!(tokio::time::timeout(WAIT, job.join()).await.unwrap().unwrap(), JobOutcome::Completed);
    assert!(job.metrics().restarts >= 1);
    assert_eq!(new.len().await, 10);
}

#[tokio::test]
async fn no_guarantee_fails_on_first_outage() {
    let registry = registry();
    let old = Arc::new(MemoryStore::new("orders"));
    let new = Arc::new(MemoryStore::new("orders_v3"));
    put_order(old.as_ref(), &registry, 1, 123, "pending").await;
    new.set_available(false);

    let coordinator = JobCoordinator::new(fast_restarts(100));
    let pipeline = Pipeline::bulk(old.clone(), migration(&registry), new.clone());
    let job = coordinator.submit(pipeline, "orders-bulk", DeliveryGuarantee::None);

    let err = tokio::time::timeout(WAIT, job.join()).await.unwrap().unwrap_err();
    let EngineError::JobExecution { cause, .. } = err else {
        panic!("expected job failure");
    };
    assert!(cause.is_transient());
    assert_eq!(job.metrics().restarts, 0);
}

#[tokio::test]
async fn restarts_are_bounded() {
    let registry = registry();
    let old = Arc::new(MemoryStore::new("orders"));
    let new = Arc::new(MemoryStore::new("orders_v3"));
    put_order(old.as_ref(), &registry, 1, 123, "pending").await;
    new.set_available(false);

    let coordinator = JobCoordinator::new(fast_restarts(2));
    let pipeline = Pipeline::bulk(old.clone(), migration(&registry), new.clone());
    let job = coordinator.submit(pipeline, "orders-bulk", DeliveryGuarantee::AtLeastOnce);

    assert!(tokio::time::timeout(WAIT, job.join()).await.unwrap().is_err());
    assert_eq!(job.metrics().restarts, 2);
    assert_eq!(job.status(), JobStatus::Failed);
}

#[tokio::test]
async fn empty_snapshot_completes() {
    let registry = registry();
    let old: Arc<dyn KeyedStore> = Arc::new(MemoryStore::new("orders"));
    let new: Arc<dyn KeyedStore> = Arc::new(MemoryStore::new("orders_v3"));

    let coordinator = JobCoordinator::default();
    let job = coordinator.submit(
        Pipeline::bulk(old, migration(&registry), new),
        "orders-bulk",
        DeliveryGuarantee::AtLeastOnce,
    );
    assert_eq!(job.join().await.unwrap(), JobOutcome::Completed);
    assert_eq!(job.metrics().read, 0);
}
