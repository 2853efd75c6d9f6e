//! Closer behaviour under concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use service_scaffold::lifecycle::{BoxError, Closer, TeardownError};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_run_each_action_once() {
    let closer = Closer::new("concurrent");
    let runs = Arc::new(AtomicUsize::new(0));

    for _ in 0..8 {
        let runs = Arc::clone(&runs);
        closer.add(move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        });
    }

    let mut triggers = Vec::new();
    for _ in 0..16 {
        let closer = closer.clone();
        triggers.push(tokio::spawn(async move { closer.trigger() }));
    }

    let mut started = 0;
    for trigger in triggers {
        if trigger.await.unwrap() {
            started += 1;
        }
    }
    assert_eq!(started, 1);

    let report = closer.wait().await;
    assert_eq!(report.launched, 8);
    assert_eq!(runs.load(Ordering::SeqCst), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_waiter_is_released() {
    let closer = Closer::new("waiters");
    closer.add(|| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<(), BoxError>(())
    });

    // Before the trigger.
    let mut waiters = Vec::new();
    for _ in 0..4 {
        let closer = closer.clone();
        waiters.push(tokio::spawn(async move { closer.wait().await }));
    }

    closer.trigger();

    // While firing.
    for _ in 0..4 {
        let closer = closer.clone();
        waiters.push(tokio::spawn(async move { closer.wait().await }));
    }

    for waiter in waiters {
        let report = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter was not released")
            .unwrap();
        assert!(report.is_clean());
    }

    // After completion.
    let late = tokio::time::timeout(Duration::from_millis(100), closer.wait())
        .await
        .expect("late waiter was not released immediately");
    assert_eq!(late.launched, 1);
}

#[tokio::test]
async fn one_failure_does_not_hide_the_others() {
    let closer = Closer::new("mixed");
    let ran = Arc::new(AtomicUsize::new(0));

    for index in 0..3 {
        let ran = Arc::clone(&ran);
        closer.add_named(format!("action-{index}"), move || async move {
            ran.fetch_add(1, Ordering::SeqCst);
            if index == 1 {
                return Err::<(), BoxError>("pool already closed".into());
            }
            Ok(())
        });
    }

    let report = closer.close_all().await;
    assert_eq!(ran.load(Ordering::SeqCst), 3);
    assert_eq!(report.launched, 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failures.len(), 1);

    let failure = &report.failures[0];
    assert_eq!(failure.name.as_deref(), Some("action-1"));
    assert!(matches!(&failure.error, TeardownError::Failed(msg) if msg == "pool already closed"));
}

#[tokio::test]
async fn registration_after_trigger_never_runs() {
    let closer = Closer::new("late");
    let ran = Arc::new(AtomicUsize::new(0));

    closer.trigger();
    let late = Arc::clone(&ran);
    closer.add(move || async move {
        late.fetch_add(1, Ordering::SeqCst);
        Ok::<(), BoxError>(())
    });

    let report = closer.wait().await;
    assert_eq!(report.launched, 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn trigger_with_no_actions_completes() {
    let closer = Closer::new("empty");
    let report = tokio::time::timeout(Duration::from_secs(1), closer.close_all())
        .await
        .unwrap();
    assert_eq!(report.launched, 0);
    assert!(report.is_clean());
    assert!(closer.report().is_some());
}
