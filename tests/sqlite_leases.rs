use chrono::{Duration, TimeZone, Utc};
use sqlease::{
    test_utils::{now_micros, sqlite_lessor, sqlite_store, stored_leases},
    Context, ContextError, Error, LeaseRecord, LeaseTable, Lessor, ManualClock, Queryer,
    SystemClock, Value,
};
use std::sync::Arc;

#[tokio::test]
async fn renew_before_and_after_expiration() {
    let store = sqlite_store(&LeaseTable::default()).await;
    let t0 = now_micros();
    let clock = Arc::new(ManualClock::new(t0));
    let lessor = sqlite_lessor(&store, clock.clone());
    let ctx = Context::background();

    let mut lease = lessor
        .acquire(&ctx, "job-1", t0 + Duration::seconds(10))
        .await
        .unwrap();
    assert_eq!(lease.exp(), t0 + Duration::seconds(10));
    assert_eq!(lease.key().len(), 32);
    assert!(lease.key().bytes().all(|b| b.is_ascii_hexdigit()));

    clock.set(t0 + Duration::seconds(9));
    lease.renew(&ctx, t0 + Duration::seconds(20)).await.unwrap();

    clock.set(t0 + Duration::seconds(21));
    let err = lease
        .renew(&ctx, t0 + Duration::seconds(25))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RenewRefused { .. }));

    let rows = stored_leases(&store).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].exp, t0 + Duration::seconds(20));
}

#[tokio::test]
async fn second_acquire_of_held_name_fails() {
    let store = sqlite_store(&LeaseTable::default()).await;
    let t0 = now_micros();
    let lessor = sqlite_lessor(&store, Arc::new(ManualClock::new(t0)));
    let ctx = Context::background();

    let first = lessor
        .acquire(&ctx, "job-1", t0 + Duration::seconds(10))
        .await
        .unwrap();

    let err = lessor
        .acquire(&ctx, "job-1", t0 + Duration::seconds(60))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Insert(_)));
    assert!(err.exec_error().unwrap().is_constraint_violation());

    assert_eq!(stored_leases(&store).await, vec![first.record().clone()]);
}

#[tokio::test]
async fn any_acquire_reclaims_every_expired_name() {
    let store = sqlite_store(&LeaseTable::default()).await;
    let t0 = now_micros();
    let lessor = sqlite_lessor(&store, Arc::new(ManualClock::new(t0)));
    let ctx = Context::background();

    let mut stale = lessor
        .acquire(&ctx, "job-1", t0 - Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(stored_leases(&store).await.len(), 1);

    lessor
        .acquire(&ctx, "job-2", t0 + Duration::seconds(30))
        .await
        .unwrap();
    let names: Vec<_> = stored_leases(&store).await.into_iter().map(|r| r.name).collect();
    assert_eq!(names, ["job-2"]);

    let fresh = lessor
        .acquire(&ctx, "job-1", t0 + Duration::seconds(45))
        .await
        .unwrap();
    assert_ne!(fresh.key(), stale.key());

    let err = stale.renew(&ctx, t0 + Duration::seconds(90)).await.unwrap_err();
    assert!(matches!(err, Error::RenewRefused { .. }));
}

#[tokio::test]
async fn failed_acquire_still_sweeps() {
    let store = sqlite_store(&LeaseTable::default()).await;
    let t0 = now_micros();
    let lessor = sqlite_lessor(&store, Arc::new(ManualClock::new(t0)));
    let ctx = Context::background();

    lessor.acquire(&ctx, "held", t0 + Duration::seconds(30)).await.unwrap();
    lessor.acquire(&ctx, "stale", t0 - Duration::seconds(5)).await.unwrap();

    assert!(lessor.acquire(&ctx, "held", t0 + Duration::seconds(30)).await.is_err());

    let names: Vec<_> = stored_leases(&store).await.into_iter().map(|r| r.name).collect();
    assert_eq!(names, ["held"]);
}

#[tokio::test]
async fn lease_at_exactly_its_expiration_is_kept_but_not_renewable() {
    let store = sqlite_store(&LeaseTable::default()).await;
    let t0 = now_micros();
    let clock = Arc::new(ManualClock::new(t0));
    let lessor = sqlite_lessor(&store, clock.clone());
    let ctx = Context::background();

    let exp = t0 + Duration::seconds(10);
    let mut lease = lessor.acquire(&ctx, "job-1", exp).await.unwrap();

    clock.set(exp);
    lessor
        .acquire(&ctx, "job-2", exp + Duration::seconds(30))
        .await
        .unwrap();
    let rows = stored_leases(&store).await;
    assert_eq!(rows[0], lease.record().clone());
    assert_eq!(rows.len(), 2);

    let err = lease.renew(&ctx, exp + Duration::seconds(20)).await.unwrap_err();
    assert!(matches!(err, Error::RenewRefused { .. }));
    assert_eq!(stored_leases(&store).await[0].exp, exp);

    clock.advance(Duration::microseconds(1));
    lessor
        .acquire(&ctx, "job-3", exp + Duration::seconds(30))
        .await
        .unwrap();
    let names: Vec<_> = stored_leases(&store).await.into_iter().map(|r| r.name).collect();
    assert_eq!(names, ["job-2", "job-3"]);
}

#[tokio::test]
async fn far_future_lease_is_not_swept() {
    let store = sqlite_store(&LeaseTable::default()).await;
    let t0 = now_micros();
    let lessor = sqlite_lessor(&store, Arc::new(ManualClock::new(t0)));
    let ctx = Context::background();
    let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();

    let mut held = lessor.acquire(&ctx, "job-1", far).await.unwrap();
    lessor
        .acquire(&ctx, "job-2", t0 + Duration::seconds(30))
        .await
        .unwrap();
    let names: Vec<_> = stored_leases(&store).await.into_iter().map(|r| r.name).collect();
    assert_eq!(names, ["job-1", "job-2"]);

    let err = lessor
        .acquire(&ctx, "job-1", t0 + Duration::seconds(60))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Insert(_)));

    held.renew(&ctx, far + Duration::days(1)).await.unwrap();
    assert_eq!(stored_leases(&store).await[0].exp, far + Duration::days(1));
}

#[tokio::test]
async fn concurrent_acquirers_get_one_winner() {
    let store = sqlite_store(&LeaseTable::default()).await;
    let lessor = sqlite_lessor(&store, Arc::new(SystemClock));
    let exp = now_micros() + Duration::seconds(30);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let lessor = Arc::clone(&lessor);
            tokio::spawn(async move { lessor.acquire(&Context::background(), "job-1", exp).await })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in handles {
        if let Ok(lease) = handle.await.unwrap() {
            winners.push(lease);
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(stored_leases(&store).await, vec![winners[0].record().clone()]);
}

#[tokio::test]
async fn renew_requires_the_current_key() {
    let store = sqlite_store(&LeaseTable::default()).await;
    let t0 = now_micros();
    let clock = Arc::new(ManualClock::new(t0));
    let lessor = sqlite_lessor(&store, clock.clone());
    let ctx = Context::background();

    let mut original = lessor
        .acquire(&ctx, "job-1", t0 + Duration::seconds(10))
        .await
        .unwrap();

    clock.set(t0 + Duration::seconds(11));
    let successor = lessor
        .acquire(&ctx, "job-1", t0 + Duration::seconds(40))
        .await
        .unwrap();

    let err = original.renew(&ctx, t0 + Duration::seconds(60)).await.unwrap_err();
    assert!(matches!(err, Error::RenewRefused { .. }));

    original.release(&ctx).await.unwrap();
    assert_eq!(stored_leases(&store).await, vec![successor.record().clone()]);

    let mut forged = lessor.attach(LeaseRecord {
        key: "0".repeat(32),
        ..successor.record().clone()
    });
    let err = forged.renew(&ctx, t0 + Duration::seconds(60)).await.unwrap_err();
    assert!(matches!(err, Error::RenewRefused { .. }));
    assert_eq!(stored_leases(&store).await, vec![successor.record().clone()]);
}

#[tokio::test]
async fn release_is_idempotent() {
    let store = sqlite_store(&LeaseTable::default()).await;
    let t0 = now_micros();
    let lessor = sqlite_lessor(&store, Arc::new(ManualClock::new(t0)));
    let ctx = Context::background();

    let lease = lessor
        .acquire(&ctx, "job-1", t0 + Duration::seconds(10))
        .await
        .unwrap();
    lease.release(&ctx).await.unwrap();
    lease.release(&ctx).await.unwrap();
    assert!(stored_leases(&store).await.is_empty());

    let reaped = lessor
        .acquire(&ctx, "job-2", t0 - Duration::seconds(1))
        .await
        .unwrap();
    lessor.acquire(&ctx, "job-3", t0 + Duration::seconds(10)).await.unwrap();
    reaped.release(&ctx).await.unwrap();

    let released = lessor
        .acquire(&ctx, "job-1", t0 + Duration::seconds(10))
        .await
        .unwrap();
    assert_ne!(released.key(), lease.key());
}

#[tokio::test]
async fn lease_survives_a_trip_between_processes() {
    let store = sqlite_store(&LeaseTable::default()).await;
    let t0 = now_micros();
    let clock = Arc::new(ManualClock::new(t0));
    let sender = sqlite_lessor(&store, clock.clone());
    let ctx = Context::background();

    let lease = sender
        .acquire(&ctx, "job-1", t0 + Duration::seconds(10))
        .await
        .unwrap();
    let wire = serde_json::to_string(lease.record()).unwrap();
    drop(lease);

    let receiver = Arc::new(Lessor::new(Arc::new(store.clone())).with_clock(clock.clone()));
    let record: LeaseRecord = serde_json::from_str(&wire).unwrap();
    let mut lease = receiver.attach(record);

    clock.advance(Duration::seconds(5));
    lease.renew(&ctx, t0 + Duration::seconds(30)).await.unwrap();
    assert_eq!(stored_leases(&store).await[0].exp, t0 + Duration::seconds(30));

    lease.release(&ctx).await.unwrap();
    assert!(stored_leases(&store).await.is_empty());
}

#[tokio::test]
async fn custom_table_layout() {
    let table = LeaseTable {
        table: "locks".into(),
        name: "resource".into(),
        exp: "expires_at".into(),
        key: "token".into(),
    };
    let store = sqlite_store(&table).await;
    let t0 = now_micros();
    let lessor = Arc::new(
        Lessor::with_table(Arc::new(store.clone()), table)
            .with_clock(Arc::new(ManualClock::new(t0))),
    );
    let ctx = Context::background();

    let mut lease = lessor
        .acquire_for(&ctx, "job-1", Duration::seconds(10))
        .await
        .unwrap();
    lease.renew_for(&ctx, Duration::seconds(20)).await.unwrap();

    let rows = store
        .query(&ctx, "SELECT resource, token FROM locks", &[])
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![vec![
            Value::Text("job-1".into()),
            Value::Text(lease.key().to_owned()),
        ]]
    );

    lease.release(&ctx).await.unwrap();
    let rows = store.query(&ctx, "SELECT resource FROM locks", &[]).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn work_scoped_to_a_lease_stops_at_expiration() {
    let store = sqlite_store(&LeaseTable::default()).await;
    let lessor = sqlite_lessor(&store, Arc::new(SystemClock));
    let root = Context::background();

    let lease = lessor
        .acquire_for(&root, "job-1", Duration::milliseconds(100))
        .await
        .unwrap();

    let (scope, _guard) = lease.context(&root);
    let res = scope
        .run(tokio::time::sleep(std::time::Duration::from_secs(30)))
        .await;
    assert_eq!(res, Err(ContextError::DeadlineExceeded));

    let err = lessor
        .acquire(&scope, "job-2", Utc::now() + Duration::seconds(10))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Sweep(_)));
}
