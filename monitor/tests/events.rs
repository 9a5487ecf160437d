//! End-to-end scenarios against the platform monitor: real filesystem
//! operations in a scratch tree, observed through the public channels.
//!
//! Latency is kept short and operations settle between steps so each
//! logical change lands in its own throttle window.

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::Receiver;
use dirwatch_monitor::DirEvent;
use dirwatch_monitor::Monitor;
use dirwatch_monitor::MonitorBuilder;
use dirwatch_monitor::MonitorError;
use dirwatch_monitor::PlatformMonitor;
use dirwatch_monitor::selector;

const LATENCY: Duration = Duration::from_millis(20);
const EVENT_TIMEOUT: Duration = Duration::from_secs(10);
const SETTLE: Duration = Duration::from_millis(40);

struct TestTree {
    // Held for cleanup; the monitor's canonicalized root is the authority.
    _tdir: tempfile::TempDir,
    monitor: PlatformMonitor,
}

/// A scratch tree with some pre-existing content: one file and a nested
/// directory pair.
fn setup() -> TestTree {
    let tdir = tempfile::tempdir().unwrap();
    fs::File::create(tdir.path().join("existing_file_1.md")).unwrap();
    fs::create_dir_all(tdir.path().join("existing_dir").join("existing_sub_dir")).unwrap();
    thread::sleep(SETTLE);

    let monitor = MonitorBuilder::new(tdir.path())
        .latency(LATENCY)
        .build()
        .unwrap();

    TestTree {
        _tdir: tdir,
        monitor,
    }
}

fn settle() {
    thread::sleep(LATENCY + Duration::from_millis(80));
}

fn collect(events: &Receiver<DirEvent>, n: usize) -> Vec<DirEvent> {
    let mut collected = Vec::new();
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while collected.len() < n {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(ev) => collected.push(ev),
            Err(_) => break,
        }
    }
    collected
}

fn assert_nth_event(evs: &[DirEvent], n: usize, dir: &Path) {
    assert!(
        evs.len() >= n,
        "expected at least {n} event(s), received only {}",
        evs.len()
    );
    assert_eq!(
        evs[n - 1].dir(),
        dir,
        "expected event nr {n} to be about {}",
        dir.display()
    );
}

fn assert_silence(events: &Receiver<DirEvent>, window: Duration) {
    if let Ok(ev) = events.recv_timeout(window) {
        panic!("expected no further events, got one for {}", ev.dir().display());
    }
}

#[test]
fn root_file_create_emits_one_root_event() {
    let mut tree = setup();
    let events = tree.monitor.start().unwrap();
    let root = tree.monitor.dir().to_path_buf();

    fs::write(root.join("file_1.md"), "hello").unwrap();

    let evs = collect(&events, 1);
    assert_nth_event(&evs, 1, &root);

    tree.monitor.stop().unwrap();
}

#[test]
fn rapid_double_create_is_coalesced() {
    let mut tree = setup();
    let events = tree.monitor.start().unwrap();
    let root = tree.monitor.dir().to_path_buf();

    fs::write(root.join("a.md"), "a").unwrap();
    fs::write(root.join("b.md"), "b").unwrap();

    let evs = collect(&events, 1);
    assert_nth_event(&evs, 1, &root);
    // Both creations landed inside one latency window: one event only.
    assert_silence(&events, LATENCY);

    tree.monitor.stop().unwrap();
}

#[test]
fn edits_separated_by_settle_emit_separately() {
    let mut tree = setup();
    let events = tree.monitor.start().unwrap();
    let root = tree.monitor.dir().to_path_buf();

    fs::write(root.join("file_1.md"), "first").unwrap();
    settle();
    fs::write(root.join("file_1.md"), "second").unwrap();

    let evs = collect(&events, 2);
    assert_nth_event(&evs, 1, &root);
    assert_nth_event(&evs, 2, &root);

    tree.monitor.stop().unwrap();
}

#[test]
fn subfolder_create_then_file_inside() {
    let mut tree = setup();
    let events = tree.monitor.start().unwrap();
    let root = tree.monitor.dir().to_path_buf();

    fs::create_dir(root.join("x")).unwrap();
    settle();
    fs::write(root.join("x").join("a.md"), "a").unwrap();

    let evs = collect(&events, 2);
    assert_nth_event(&evs, 1, &root);
    assert_nth_event(&evs, 2, &root.join("x"));

    tree.monitor.stop().unwrap();
}

#[test]
fn nested_create_cascades() {
    let mut tree = setup();
    let events = tree.monitor.start().unwrap();
    let root = tree.monitor.dir().to_path_buf();

    fs::create_dir_all(root.join("x").join("y")).unwrap();
    settle();
    fs::write(root.join("x").join("y").join("a.md"), "a").unwrap();

    let evs = collect(&events, 3);
    assert!(evs.len() >= 3, "expected 3 events, got {}", evs.len());
    let dirs: Vec<PathBuf> = evs.iter().map(|ev| ev.dir().to_path_buf()).collect();
    assert!(dirs.contains(&root), "missing event for root: {dirs:?}");
    assert!(
        dirs.contains(&root.join("x")),
        "missing event for x: {dirs:?}"
    );
    assert!(
        dirs.contains(&root.join("x").join("y")),
        "missing event for y: {dirs:?}"
    );

    tree.monitor.stop().unwrap();
}

#[test]
fn directory_moved_in_from_outside() {
    let outside = tempfile::tempdir().unwrap();
    let staged = outside.path().join("z");
    fs::create_dir(&staged).unwrap();
    fs::write(staged.join("file.md"), "payload").unwrap();

    let mut tree = setup();
    let events = tree.monitor.start().unwrap();
    let errors = tree.monitor.errors();
    let root = tree.monitor.dir().to_path_buf();

    fs::rename(&staged, root.join("z")).unwrap();

    let evs = collect(&events, 2);
    let dirs: Vec<PathBuf> = evs.iter().map(|ev| ev.dir().to_path_buf()).collect();
    assert!(dirs.contains(&root), "missing event for root: {dirs:?}");
    assert!(
        dirs.contains(&root.join("z")),
        "missing event for z: {dirs:?}"
    );

    settle();
    fs::write(root.join("z").join("more.md"), "m").unwrap();
    let more = collect(&events, 1);
    assert_nth_event(&more, 1, &root.join("z"));

    tree.monitor.stop().unwrap();

    // The move had no local moved-from half; the bookkeeping gap is
    // reported, not swallowed.
    let saw_orphan = errors
        .try_iter()
        .any(|err| matches!(err, MonitorError::OrphanMoveCookie { .. }));
    assert!(saw_orphan, "expected an orphaned move cookie report");
}

#[test]
fn directory_moved_within_scope_keeps_watching() {
    let mut tree = setup();
    let events = tree.monitor.start().unwrap();
    let root = tree.monitor.dir().to_path_buf();

    fs::rename(root.join("existing_dir"), root.join("renamed_dir")).unwrap();
    let evs = collect(&events, 1);
    assert_nth_event(&evs, 1, &root);

    settle();
    fs::write(root.join("renamed_dir").join("inside.md"), "i").unwrap();
    let more = collect(&events, 1);
    assert_nth_event(&more, 1, &root.join("renamed_dir"));

    tree.monitor.stop().unwrap();
}

#[test]
fn root_deletion_stops_the_monitor() {
    let mut tree = setup();
    let events = tree.monitor.start().unwrap();
    let root = tree.monitor.dir().to_path_buf();

    fs::remove_dir_all(&root).unwrap();

    // Drain everything until the stream closes; the teardown of the tree
    // produces events for the root (and possibly its subdirectories).
    let deadline = Instant::now() + EVENT_TIMEOUT;
    let mut evs = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(ev) => evs.push(ev),
            Err(_) => break,
        }
    }
    assert!(!evs.is_empty(), "expected events for the disappearing root");
    assert!(evs.iter().any(|ev| ev.dir() == root));

    // The monitor noticed on its own.
    assert!(!tree.monitor.can_emit(&root));
    let err = tree.monitor.stop().unwrap_err();
    assert!(matches!(err, MonitorError::AlreadyStopped));
}

#[test]
fn non_recursive_selector_limits_scope_to_root() {
    let tdir = tempfile::tempdir().unwrap();
    fs::create_dir(tdir.path().join("sub")).unwrap();
    thread::sleep(SETTLE);

    let mut monitor = MonitorBuilder::new(tdir.path())
        .selector(selector::non_recursive())
        .latency(LATENCY)
        .build()
        .unwrap();
    let events = monitor.start().unwrap();
    let root = monitor.dir().to_path_buf();

    fs::write(root.join("sub").join("ignored.md"), "x").unwrap();
    settle();
    fs::write(root.join("seen.md"), "y").unwrap();

    let evs = collect(&events, 1);
    assert_nth_event(&evs, 1, &root);
    assert_silence(&events, LATENCY);

    monitor.stop().unwrap();
}

#[test]
fn state_machine_rejects_double_transitions() {
    let mut tree = setup();

    let err = tree.monitor.stop().unwrap_err();
    assert!(matches!(err, MonitorError::AlreadyStopped));

    let _events = tree.monitor.start().unwrap();
    let err = tree.monitor.start().unwrap_err();
    assert!(matches!(err, MonitorError::AlreadyStarted));

    tree.monitor.stop().unwrap();
    let err = tree.monitor.stop().unwrap_err();
    assert!(matches!(err, MonitorError::AlreadyStopped));
}

#[test]
fn restart_yields_a_working_monitor_with_fresh_streams() {
    let mut tree = setup();
    let root = tree.monitor.dir().to_path_buf();

    let first = tree.monitor.start().unwrap();
    tree.monitor.stop().unwrap();

    // The first run's stream has closed.
    assert!(first.recv_timeout(Duration::from_millis(100)).is_err());

    let second = tree.monitor.start().unwrap();
    fs::write(root.join("after_restart.md"), "a").unwrap();
    let evs = collect(&second, 1);
    assert_nth_event(&evs, 1, &root);

    tree.monitor.stop().unwrap();
}

#[test]
fn no_events_after_stop_returns() {
    let mut tree = setup();
    let events = tree.monitor.start().unwrap();
    let root = tree.monitor.dir().to_path_buf();

    fs::write(root.join("before.md"), "b").unwrap();
    let _ = collect(&events, 1);

    tree.monitor.stop().unwrap();
    fs::write(root.join("after.md"), "a").unwrap();

    // Only end-of-stream from here on.
    assert!(events.recv_timeout(LATENCY + SETTLE).is_err());
}

#[test]
fn can_emit_tracks_state_selector_and_disk() {
    let mut tree = setup();
    let root = tree.monitor.dir().to_path_buf();

    assert!(!tree.monitor.can_emit(&root));

    let _events = tree.monitor.start().unwrap();
    assert!(tree.monitor.can_emit(&root));
    assert!(tree.monitor.can_emit(&root.join("existing_file_1.md")));
    assert!(!tree.monitor.can_emit(&root.join("missing.md")));
    assert!(!tree.monitor.can_emit(Path::new("/outside/of/scope")));

    tree.monitor.stop().unwrap();
    assert!(!tree.monitor.can_emit(&root));
}
