//! Signal delivery. Each test raises a different signal: a second delivery
//! of the same one exits the process while its closer is still held.

#![cfg(unix)]

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use common::{test_config, wait_for_state};
use service_scaffold::lifecycle::{BoxError, Closer, ShutdownSignal};
use service_scaffold::{LifecycleState, Server};

fn raise(signal: libc::c_int) {
    // SAFETY: raising a signal that Tokio has a handler installed for.
    let rc = unsafe { libc::raise(signal) };
    assert_eq!(rc, 0);
}

#[tokio::test]
async fn signal_triggers_bound_closer() {
    let closer = Closer::with_signals("usr1", &[ShutdownSignal::User1]).unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    closer.add(move || async move {
        flag.store(true, Ordering::SeqCst);
        Ok::<(), BoxError>(())
    });

    raise(libc::SIGUSR1);

    let report = tokio::time::timeout(Duration::from_secs(2), closer.wait())
        .await
        .expect("signal did not fire the closer");
    assert_eq!(report.launched, 1);
    assert!(ran.load(Ordering::SeqCst));
    assert!(closer.is_fired());
}

#[tokio::test]
async fn signal_stops_server_like_stop_handle() {
    let server = Server::bind_with_signals(test_config(), Router::new(), &[ShutdownSignal::User2])
        .await
        .unwrap();
    let mut state = server.state();
    let run = tokio::spawn(server.run());

    tokio::time::sleep(Duration::from_millis(20)).await;
    raise(libc::SIGUSR2);

    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("signal did not stop the server")
        .unwrap();
    assert!(summary.is_clean());
    assert_eq!(summary.public.launched, 1);
    wait_for_state(&mut state, LifecycleState::Stopped, Duration::from_millis(100)).await;
}

#[tokio::test]
async fn dropped_closer_leaves_signal_to_the_next_binding() {
    let first = Closer::with_signals("first", &[ShutdownSignal::Hangup]).unwrap();
    raise(libc::SIGHUP);
    tokio::time::timeout(Duration::from_secs(2), first.wait())
        .await
        .expect("signal did not fire the first closer");
    drop(first);

    // The first binding would exit the process here if it were still armed.
    let second = Closer::with_signals("second", &[ShutdownSignal::Hangup]).unwrap();
    raise(libc::SIGHUP);
    let report = tokio::time::timeout(Duration::from_secs(2), second.wait())
        .await
        .expect("signal did not fire the second closer");
    assert_eq!(report.closer, "second");
    assert!(second.is_fired());
}
