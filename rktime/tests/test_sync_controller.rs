use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{TIME_STATUS_ID, TimeStatusSpec};
use rktime::config::Mode;
use rktime::runtime::MemoryStore;
use tokio::time::sleep;

use crate::harness::{Harness, delete_servers, set_servers, set_time_config, settle, status};


fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_time_servers() {
    let store = MemoryStore::new();
    set_time_config(&store, false, Duration::ZERO).await;
    let h = Harness::start(Mode::Metal, store);
    settle().await;

    assert_eq!(h.status().await, None, "nothing published without servers");
    assert_eq!(h.workers.count(), 0);
    assert!(!h.is_finished(), "missing input is not an error");

    set_servers(&h.store, &["pool.ntp.org"]).await;
    settle().await;

    assert_eq!(h.status().await, Some(status(0, false, false)));
    assert_eq!(h.workers.count(), 1);
    let worker = h.workers.last();
    assert!(worker.is_running());
    assert_eq!(worker.servers(), vec!["pool.ntp.org"]);

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_time_servers_removed_and_restored() {
    let store = MemoryStore::new();
    set_servers(&store, &["a"]).await;
    let h = Harness::start(Mode::Metal, store);
    settle().await;
    let worker = h.workers.last();
    let writes = h.writes();
    let updates = worker.updates.load(Ordering::SeqCst);

    delete_servers(&h.store).await;
    settle().await;

    assert_eq!(h.writes(), writes, "no write without a server list");
    assert_eq!(worker.updates.load(Ordering::SeqCst), updates);
    assert!(worker.is_running(), "worker untouched while servers are gone");
    assert_eq!(h.workers.count(), 1);
    assert!(!h.is_finished());

    set_servers(&h.store, &["b"]).await;
    settle().await;

    assert_eq!(h.writes(), writes + 1);
    assert_eq!(worker.servers(), vec!["b"]);
    assert_eq!(h.workers.count(), 1);
    assert_eq!(h.status().await, Some(status(0, false, false)));

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_missing_config_means_enabled_without_deadline() {
    let store = MemoryStore::new();
    set_servers(&store, &["a"]).await;
    let h = Harness::start(Mode::Metal, store);
    settle().await;

    assert_eq!(h.status().await, Some(status(0, false, false)));
    assert_eq!(h.workers.count(), 1);

    sleep(secs(3600)).await;
    assert_eq!(h.status().await, Some(status(0, false, false)));

    h.workers.last().fire_synced();
    settle().await;
    assert_eq!(h.status().await, Some(status(0, true, false)));

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_disable_and_reenable() {
    let store = MemoryStore::new();
    set_servers(&store, &["a"]).await;
    set_time_config(&store, false, Duration::ZERO).await;
    let h = Harness::start(Mode::Metal, store);
    settle().await;
    let first = h.workers.get(0);
    assert!(first.is_running());

    set_time_config(&h.store, true, Duration::ZERO).await;
    settle().await;
    assert!(first.is_finished(), "disabling stops the worker");
    assert_eq!(h.status().await, Some(status(0, true, true)));

    set_time_config(&h.store, false, Duration::ZERO).await;
    settle().await;
    assert_eq!(h.workers.count(), 2, "re-enabling starts a fresh worker");
    assert!(h.workers.get(1).is_running());
    assert_eq!(
        h.status().await,
        Some(status(0, false, false)),
        "a fresh worker has not synced yet"
    );

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_epoch_survives_worker_restarts() {
    let store = MemoryStore::new();
    set_servers(&store, &["a"]).await;
    let h = Harness::start(Mode::Metal, store);
    settle().await;

    let first = h.workers.get(0);
    first.fire_epoch();
    first.fire_epoch();
    settle().await;
    assert_eq!(h.status().await.map(|s| s.epoch), Some(2));

    set_time_config(&h.store, true, Duration::ZERO).await;
    settle().await;
    set_time_config(&h.store, false, Duration::ZERO).await;
    settle().await;
    assert_eq!(h.status().await, Some(status(2, false, false)));

    h.workers.get(1).fire_epoch();
    settle().await;
    assert_eq!(h.status().await.map(|s| s.epoch), Some(3));

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_boot_timeout_forces_synced() {
    let store = MemoryStore::new();
    set_servers(&store, &["a"]).await;
    set_time_config(&store, false, secs(30)).await;
    let h = Harness::start(Mode::Metal, store);
    settle().await;

    sleep(secs(10)).await;
    assert_eq!(h.status().await, Some(status(0, false, false)));

    sleep(secs(25)).await;
    assert_eq!(h.status().await, Some(status(0, true, false)));
    let worker = h.workers.last();
    assert!(worker.is_running(), "worker keeps running after the deadline");
    assert_eq!(h.workers.count(), 1);

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_boot_timeout_passed_before_worker_start() {
    let store = MemoryStore::new();
    set_time_config(&store, false, secs(5)).await;
    let h = Harness::start(Mode::Metal, store);
    settle().await;

    sleep(secs(10)).await;
    set_servers(&h.store, &["a"]).await;
    settle().await;

    // a worker started past the deadline is synced right away
    assert_eq!(h.status().await, Some(status(0, true, false)));
    assert_eq!(h.workers.count(), 1);
    assert!(h.workers.last().is_running());

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_boot_timeout_survives_reenable() {
    let store = MemoryStore::new();
    set_servers(&store, &["a"]).await;
    set_time_config(&store, true, secs(30)).await;
    let h = Harness::start(Mode::Metal, store);
    settle().await;
    assert_eq!(h.status().await, Some(status(0, true, true)));

    sleep(secs(5)).await;
    set_time_config(&h.store, false, secs(30)).await;
    settle().await;
    assert_eq!(h.status().await, Some(status(0, false, false)));

    sleep(secs(20)).await;
    assert_eq!(h.status().await, Some(status(0, false, false)));

    // boot + 30s, no signal from the worker
    sleep(secs(10)).await;
    assert_eq!(h.status().await, Some(status(0, true, false)));
    assert_eq!(h.workers.count(), 1);
    assert!(h.workers.last().is_running());

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_zero_boot_timeout_disarms_deadline() {
    let store = MemoryStore::new();
    set_servers(&store, &["a"]).await;
    set_time_config(&store, false, secs(30)).await;
    let h = Harness::start(Mode::Metal, store);
    settle().await;

    sleep(secs(10)).await;
    set_time_config(&h.store, false, Duration::ZERO).await;
    settle().await;

    sleep(secs(60)).await;
    assert_eq!(h.status().await, Some(status(0, false, false)));

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_boot_timeout_extended_before_deadline() {
    let store = MemoryStore::new();
    set_servers(&store, &["a"]).await;
    set_time_config(&store, false, secs(30)).await;
    let h = Harness::start(Mode::Metal, store);
    settle().await;

    sleep(secs(10)).await;
    set_time_config(&h.store, false, secs(60)).await;
    settle().await;

    // old deadline at 30s no longer applies
    sleep(secs(30)).await;
    assert_eq!(h.status().await, Some(status(0, false, false)));

    sleep(secs(25)).await;
    assert_eq!(h.status().await, Some(status(0, true, false)));

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_synced_stays_synced_on_config_change() {
    let store = MemoryStore::new();
    set_servers(&store, &["a"]).await;
    set_time_config(&store, false, secs(30)).await;
    let h = Harness::start(Mode::Metal, store);
    settle().await;

    h.workers.last().fire_synced();
    settle().await;
    assert_eq!(h.status().await, Some(status(0, true, false)));

    set_time_config(&h.store, false, secs(600)).await;
    settle().await;
    sleep(secs(700)).await;
    assert_eq!(h.status().await, Some(status(0, true, false)));

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_server_list_updates_running_worker() {
    let store = MemoryStore::new();
    set_servers(&store, &["a"]).await;
    let h = Harness::start(Mode::Metal, store);
    settle().await;
    let worker = h.workers.last();
    assert_eq!(worker.servers(), vec!["a"]);
    let updates = worker.updates.load(Ordering::SeqCst);

    set_servers(&h.store, &["b", "c"]).await;
    settle().await;

    assert_eq!(worker.updates.load(Ordering::SeqCst), updates + 1);
    assert_eq!(h.workers.count(), 1, "no restart on server change");
    assert!(worker.is_running());
    assert!(!worker.is_finished());
    assert_eq!(worker.servers(), vec!["b", "c"]);

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_container_mode_is_always_synced() {
    let store = MemoryStore::new();
    set_servers(&store, &["a"]).await;
    set_time_config(&store, false, secs(30)).await;
    let h = Harness::start(Mode::Container, store);
    settle().await;

    assert_eq!(h.status().await, Some(status(0, true, true)));
    assert_eq!(h.workers.count(), 0);

    sleep(secs(60)).await;
    assert_eq!(h.status().await, Some(status(0, true, true)));

    h.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_tears_everything_down() {
    let store = MemoryStore::new();
    set_servers(&store, &["a"]).await;
    set_time_config(&store, false, secs(30)).await;
    let h = Harness::start(Mode::Metal, store);
    settle().await;

    let worker = h.workers.last();
    let writes = h.writes.clone();
    let store = h.store.clone();
    let version = store
        .get_spec::<TimeStatusSpec>(TIME_STATUS_ID)
        .await
        .unwrap()
        .metadata
        .version;

    h.stop().await.unwrap();
    assert!(worker.is_finished(), "worker is stopped before run returns");

    let before = writes.load(Ordering::SeqCst);
    set_servers(&store, &["b"]).await;
    worker.fire_epoch();
    sleep(secs(60)).await;

    assert_eq!(writes.load(Ordering::SeqCst), before);
    let after = store
        .get_spec::<TimeStatusSpec>(TIME_STATUS_ID)
        .await
        .unwrap()
        .metadata
        .version;
    assert_eq!(after, version, "no status writes after cancellation");
}

#[tokio::test(start_paused = true)]
async fn test_status_write_failure_is_fatal() {
    let store = MemoryStore::new();
    set_servers(&store, &["a"]).await;
    // someone else owns the status already
    store
        .put(TIME_STATUS_ID, &TimeStatusSpec::default())
        .await
        .unwrap();
    let h = Harness::start(Mode::Metal, store);
    settle().await;

    assert!(h.is_finished());
    let worker = h.workers.last();
    let err = h.join().await.unwrap_err();
    assert!(format!("{err:#}").contains("error updating objects"), "got {err:#}");
    assert!(worker.is_finished(), "worker is stopped on error");
}
