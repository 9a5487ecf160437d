use std::fs;
use std::time::Duration;

use pretty_assertions::assert_eq;

use super::*;

fn core_for(dir: &tempfile::TempDir) -> MonitorCore {
    MonitorCore::new(
        dir.path().to_path_buf(),
        crate::selector::recursive(),
        Duration::ZERO,
    )
    .unwrap()
}

#[test]
fn new_canonicalizes_root() {
    let tdir = tempfile::tempdir().unwrap();
    let core = core_for(&tdir);
    assert_eq!(core.dir(), fs::canonicalize(tdir.path()).unwrap());
}

#[test]
fn new_rejects_missing_root() {
    let err = MonitorCore::new(
        PathBuf::from("/definitely/not/here"),
        crate::selector::recursive(),
        DEFAULT_LATENCY,
    )
    .unwrap_err();
    assert!(matches!(err, MonitorError::BadRoot { .. }));
}

#[test]
fn double_start_is_rejected() {
    let tdir = tempfile::tempdir().unwrap();
    let mut core = core_for(&tdir);

    let ctx = core.begin_start().unwrap();
    let err = core.begin_start().unwrap_err();
    assert!(matches!(err, MonitorError::AlreadyStarted));

    drop(ctx);
    core.request_stop().unwrap();
    core.join_throttle();
}

#[test]
fn stop_when_stopped_is_rejected() {
    let tdir = tempfile::tempdir().unwrap();
    let mut core = core_for(&tdir);
    let err = core.request_stop().unwrap_err();
    assert!(matches!(err, MonitorError::AlreadyStopped));
}

#[test]
fn abort_start_returns_to_stopped() {
    let tdir = tempfile::tempdir().unwrap();
    let mut core = core_for(&tdir);

    let ctx = core.begin_start().unwrap();
    drop(ctx);
    core.abort_start();

    assert!(!core.is_running());
    // A fresh start succeeds after the rollback.
    let ctx = core.begin_start().unwrap();
    drop(ctx);
    core.abort_start();
}

#[test]
fn can_emit_is_false_when_stopped() {
    let tdir = tempfile::tempdir().unwrap();
    let core = core_for(&tdir);
    assert!(!core.can_emit(core.dir()));
}

#[test]
fn can_emit_checks_selector_and_disk() {
    let tdir = tempfile::tempdir().unwrap();
    let mut core = core_for(&tdir);
    let ctx = core.begin_start().unwrap();

    let root = core.dir().to_path_buf();
    let inside = root.join("present.md");
    fs::write(&inside, "x").unwrap();

    assert!(core.can_emit(&root));
    assert!(core.can_emit(&inside));
    // Selected but missing on disk.
    assert!(!core.can_emit(&root.join("absent.md")));
    // Exists but outside the watched scope.
    assert!(!core.can_emit(std::env::temp_dir().as_path()));

    drop(ctx);
    core.request_stop().unwrap();
    core.join_throttle();
}

#[test]
fn emitted_events_reach_the_public_stream() {
    let tdir = tempfile::tempdir().unwrap();
    let mut core = core_for(&tdir);
    let ctx = core.begin_start().unwrap();
    let events = core.events();

    let root = core.dir().to_path_buf();
    let emitter = std::thread::spawn(move || {
        assert!(ctx.emit(&root));
        // Outside the scope: suppressed.
        assert!(!ctx.emit(Path::new("/elsewhere")));
    });

    let ev = events.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(ev.dir(), core.dir());

    emitter.join().unwrap();
    core.request_stop().unwrap();
    core.join_throttle();

    // Adapter context dropped and throttle reaped: end-of-stream.
    assert!(events.recv_timeout(Duration::from_secs(1)).is_err());
}

#[test]
fn fatal_mark_stopped_flips_state_once() {
    let tdir = tempfile::tempdir().unwrap();
    let mut core = core_for(&tdir);
    let ctx = core.begin_start().unwrap();

    assert!(ctx.is_running());
    assert!(ctx.mark_stopped());
    assert!(!ctx.mark_stopped());
    assert!(!core.is_running());

    // The usual stop now reports the monitor as already stopped.
    let err = core.request_stop().unwrap_err();
    assert!(matches!(err, MonitorError::AlreadyStopped));

    drop(ctx);
    core.join_throttle();
}

#[test]
fn restart_allocates_fresh_streams() {
    let tdir = tempfile::tempdir().unwrap();
    let mut core = core_for(&tdir);

    let ctx = core.begin_start().unwrap();
    let first_events = core.events();
    drop(ctx);
    core.request_stop().unwrap();
    core.join_throttle();

    let ctx = core.begin_start().unwrap();
    let second_events = core.events();

    // The first stream is closed, the second is live.
    assert!(first_events.recv_timeout(Duration::from_millis(100)).is_err());
    let root = core.dir().to_path_buf();
    let emitter = std::thread::spawn(move || {
        ctx.emit(&root);
    });
    assert!(second_events.recv_timeout(Duration::from_secs(1)).is_ok());

    emitter.join().unwrap();
    core.request_stop().unwrap();
    core.join_throttle();
}
