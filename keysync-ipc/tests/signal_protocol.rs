//! Signal-file protocol: producer primitives, event translation and convergence.

use std::collections::BTreeSet;
use std::fs;
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime};

use filetime::{set_file_mtime, FileTime};
use keysync_core::PackageIdentifier;
use keysync_ipc::{ChangeKind, SignalChannel, SignalEvent, SignalSubscriber};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT: Duration = Duration::from_secs(5);

fn id(name: &str) -> PackageIdentifier {
    PackageIdentifier::from(name)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10));
    }
    condition()
}

async fn next_event(events: &mut UnboundedReceiver<SignalEvent>) -> SignalEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("signal event within timeout")
        .expect("channel open")
}

// ---------------------------------------------------------------------------
// 1. Producer primitives
// ---------------------------------------------------------------------------

#[test]
fn start_then_finish_leaves_no_file() {
    let dir = TempDir::new().expect("dir");
    let channel = SignalChannel::new(dir.path().join("ipc"));
    let speller = id("se-speller");

    channel.signal_start(&speller).expect("start");
    assert!(channel.signal_path(&speller).exists());
    channel.signal_finish(&speller).expect("finish");
    assert!(!channel.signal_path(&speller).exists());
}

#[test]
fn start_twice_keeps_a_single_file() {
    let dir = TempDir::new().expect("dir");
    let channel = SignalChannel::new(dir.path().join("ipc"));
    let speller = id("se-speller");

    channel.signal_start(&speller).expect("start");
    channel.signal_start(&speller).expect("start again");
    assert_eq!(fs::read_dir(channel.dir()).expect("list").count(), 1);
    assert_eq!(channel.in_flight().expect("in flight").len(), 1);
}

#[test]
fn finish_without_start_is_not_an_error() {
    let dir = TempDir::new().expect("dir");
    let channel = SignalChannel::new(dir.path().join("never-created"));
    channel.signal_finish(&id("se-speller")).expect("finish absent");
}

#[test]
fn stale_signal_files_are_ignored() {
    let dir = TempDir::new().expect("dir");
    let channel =
        SignalChannel::new(dir.path()).with_stale_after(Some(Duration::from_secs(60)));
    let speller = id("se-speller");
    channel.signal_start(&speller).expect("start");
    assert!(channel.is_in_flight(&speller));

    let old = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(3600));
    set_file_mtime(channel.signal_path(&speller), old).expect("age signal file");
    assert!(!channel.is_in_flight(&speller));
    assert!(channel.in_flight().expect("list").is_empty());

    channel.signal_start(&speller).expect("restart refreshes mtime");
    assert!(channel.is_in_flight(&speller));
}

// ---------------------------------------------------------------------------
// 2. Consumer translation (synthetic events)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn begin_and_finish_follow_file_existence() {
    let dir = TempDir::new().expect("dir");
    let channel = SignalChannel::new(dir.path().join("ipc"));
    let (subscriber, mut events) = SignalSubscriber::channel();
    let (subscription, trigger) = channel.subscribe_manual(subscriber).expect("subscribe");
    let speller = id("https://repo.example/packages/speller-se");
    let path = subscription.dir().join(keysync_ipc::signal_file_name(&speller));

    channel.signal_start(&speller).expect("start");
    trigger.fire(ChangeKind::Write, &path);
    assert_eq!(
        next_event(&mut events).await,
        SignalEvent::BeganDownloading(speller.clone())
    );
    assert!(subscription.is_downloading(&speller));

    channel.signal_finish(&speller).expect("finish");
    trigger.fire(ChangeKind::Delete, &path);
    assert_eq!(
        next_event(&mut events).await,
        SignalEvent::FinishedInstalling(speller.clone())
    );
    assert!(subscription.downloading().is_empty());
}

#[tokio::test]
async fn duplicate_events_do_not_duplicate_callbacks() {
    let dir = TempDir::new().expect("dir");
    let channel = SignalChannel::new(dir.path());
    let (subscriber, mut events) = SignalSubscriber::channel();
    let (subscription, trigger) = channel.subscribe_manual(subscriber).expect("subscribe");
    let speller = id("se-speller");
    let path = subscription.dir().join(keysync_ipc::signal_file_name(&speller));

    channel.signal_start(&speller).expect("start");
    for _ in 0..3 {
        trigger.fire(ChangeKind::Write, &path);
    }
    assert_eq!(
        next_event(&mut events).await,
        SignalEvent::BeganDownloading(speller.clone())
    );
    assert!(wait_until(|| subscription.is_downloading(&speller)));
    // Let the remaining duplicate writes drain before the file goes away.
    sleep(Duration::from_millis(100));

    channel.signal_finish(&speller).expect("finish");
    for _ in 0..3 {
        trigger.fire(ChangeKind::Delete, &path);
    }
    assert_eq!(
        next_event(&mut events).await,
        SignalEvent::FinishedInstalling(speller.clone())
    );
    drop(subscription);
    assert!(events.recv().await.is_none(), "no further callbacks");
}

#[test]
fn downloading_set_converges_to_files_on_disk() {
    let dir = TempDir::new().expect("dir");
    let channel = SignalChannel::new(dir.path());
    let (subscription, trigger) = channel
        .subscribe_manual(SignalSubscriber::new(|_| {}, |_| {}))
        .expect("subscribe");
    let ids: Vec<PackageIdentifier> = ["a", "b", "c", "d"].into_iter().map(id).collect();
    let path_of = |id: &PackageIdentifier| subscription.dir().join(keysync_ipc::signal_file_name(id));

    for id in &ids {
        channel.signal_start(id).expect("start");
    }
    channel.signal_finish(&ids[1]).expect("finish b");
    channel.signal_finish(&ids[3]).expect("finish d");

    // Out of order, duplicated, and with kinds that disagree with the file state.
    trigger.fire(ChangeKind::Delete, path_of(&ids[2]));
    trigger.fire(ChangeKind::Write, path_of(&ids[3]));
    trigger.fire(ChangeKind::Write, path_of(&ids[1]));
    trigger.fire(ChangeKind::Delete, path_of(&ids[0]));
    trigger.fire(ChangeKind::Write, path_of(&ids[2]));
    trigger.fire(ChangeKind::Rename, path_of(&ids[0]));

    let expected: BTreeSet<PackageIdentifier> = [ids[0].clone(), ids[2].clone()].into();
    assert!(
        wait_until(|| subscription.downloading() == expected),
        "got {:?}",
        subscription.downloading()
    );
    assert_eq!(channel.in_flight().expect("list"), expected);
}

#[test]
fn directory_event_reconciles_whole_listing() {
    let dir = TempDir::new().expect("dir");
    let channel = SignalChannel::new(dir.path());
    let (subscription, trigger) = channel
        .subscribe_manual(SignalSubscriber::new(|_| {}, |_| {}))
        .expect("subscribe");

    channel.signal_start(&id("a")).expect("start a");
    channel.signal_start(&id("b")).expect("start b");
    trigger.fire(ChangeKind::Write, subscription.dir());

    let expected: BTreeSet<PackageIdentifier> = [id("a"), id("b")].into();
    assert!(wait_until(|| subscription.downloading() == expected));
}

#[tokio::test]
async fn existing_signal_files_are_reported_on_subscribe() {
    let dir = TempDir::new().expect("dir");
    let channel = SignalChannel::new(dir.path());
    channel.signal_start(&id("se-speller")).expect("start");

    let (subscriber, mut events) = SignalSubscriber::channel();
    let (subscription, _trigger) = channel.subscribe_manual(subscriber).expect("subscribe");
    assert_eq!(
        events.try_recv().expect("seeded synchronously"),
        SignalEvent::BeganDownloading(id("se-speller"))
    );
    assert!(subscription.is_downloading(&id("se-speller")));
}

#[tokio::test]
async fn aged_signal_file_finishes_a_live_subscription() {
    let dir = TempDir::new().expect("dir");
    let channel =
        SignalChannel::new(dir.path()).with_stale_after(Some(Duration::from_secs(60)));
    let (subscriber, mut events) = SignalSubscriber::channel();
    let (subscription, trigger) = channel.subscribe_manual(subscriber).expect("subscribe");
    let speller = id("se-speller");

    channel.signal_start(&speller).expect("start");
    let path = subscription.dir().join(keysync_ipc::signal_file_name(&speller));
    trigger.fire(ChangeKind::Write, &path);
    assert_eq!(
        next_event(&mut events).await,
        SignalEvent::BeganDownloading(speller.clone())
    );

    // The producer died: the file stays, it just gets old. No event is fired.
    let old = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(3600));
    set_file_mtime(channel.signal_path(&speller), old).expect("age signal file");

    assert_eq!(
        next_event(&mut events).await,
        SignalEvent::FinishedInstalling(speller.clone())
    );
    assert!(subscription.downloading().is_empty());
    assert!(channel.signal_path(&speller).exists());
}

// ---------------------------------------------------------------------------
// 3. Platform watcher end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn platform_watcher_reports_begin_and_finish() {
    let dir = TempDir::new().expect("dir");
    let channel = SignalChannel::new(dir.path().join("ipc"));
    let (subscriber, mut events) = SignalSubscriber::channel();
    let _subscription = channel.subscribe(subscriber).expect("subscribe");
    let speller = id("se-speller");

    channel.signal_start(&speller).expect("start");
    assert_eq!(
        next_event(&mut events).await,
        SignalEvent::BeganDownloading(speller.clone())
    );

    channel.signal_finish(&speller).expect("finish");
    assert_eq!(
        next_event(&mut events).await,
        SignalEvent::FinishedInstalling(speller)
    );
}

#[test]
fn finish_during_seeding_callback_is_delivered_after_begin() {
    let dir = TempDir::new().expect("dir");
    let channel = SignalChannel::new(dir.path().join("ipc"));
    let speller = id("se-speller");
    channel.signal_start(&speller).expect("start");

    let order = Arc::new(Mutex::new(Vec::new()));
    let begins = order.clone();
    let finishes = order.clone();
    let (seeding_tx, seeding_rx) = std::sync::mpsc::channel();
    let seeding_tx = Mutex::new(seeding_tx);
    let subscriber = SignalSubscriber::new(
        move |_| {
            // Slow consumer: the producer finishes while this still runs.
            let _ = seeding_tx.lock().unwrap().send(());
            sleep(Duration::from_millis(400));
            begins.lock().unwrap().push("begin");
        },
        move |_| finishes.lock().unwrap().push("finish"),
    );

    let producer = {
        let channel = channel.clone();
        let speller = speller.clone();
        thread::spawn(move || {
            seeding_rx.recv_timeout(WAIT).expect("seeding callback started");
            channel.signal_finish(&speller).expect("finish");
        })
    };
    let subscription = channel.subscribe(subscriber).expect("subscribe");
    producer.join().expect("producer");

    assert!(wait_until(|| order.lock().unwrap().len() == 2), "got {:?}", order.lock().unwrap());
    assert_eq!(*order.lock().unwrap(), vec!["begin", "finish"]);
    assert!(subscription.downloading().is_empty());
}
