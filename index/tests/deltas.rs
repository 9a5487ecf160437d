//! The index as it is wired up under a live monitor: a worker thread
//! consuming a directory-event channel and publishing file-level deltas.

use std::fs;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use dirwatch_index::Index;
use dirwatch_monitor::DirEvent;
use pretty_assertions::assert_eq;

#[test]
fn run_consumes_events_and_publishes_deltas() {
    let tdir = tempfile::tempdir().unwrap();
    let (tx, rx) = unbounded();
    let index = Index::lazy(rx);
    let deltas = index.deltas();
    let worker = thread::spawn(move || index.run());

    // First event indexes the directory; the second diffs against it.
    tx.send(DirEvent::new(tdir.path())).unwrap();
    fs::write(tdir.path().join("a.md"), "a").unwrap();
    tx.send(DirEvent::new(tdir.path())).unwrap();

    let delta = deltas.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(delta.dir, tdir.path());
    assert_eq!(
        delta.diff.additions.keys().collect::<Vec<_>>(),
        vec![&tdir.path().join("a.md")]
    );

    drop(tx);
    worker.join().unwrap();
    // The delta stream closes once the event stream does.
    assert!(deltas.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn subtree_growth_cascades_through_events() {
    let tdir = tempfile::tempdir().unwrap();
    let (tx, rx) = unbounded();
    let index = Index::lazy(rx);
    let deltas = index.deltas();
    let worker = thread::spawn(move || index.run());

    tx.send(DirEvent::new(tdir.path())).unwrap();

    // A new subdirectory arrives with a file already inside, the way a
    // monitor's creation cascade reports it: one event for the parent,
    // one for the new directory.
    let sub = tdir.path().join("sub");
    fs::create_dir(&sub).unwrap();
    fs::write(sub.join("inner.md"), "i").unwrap();
    tx.send(DirEvent::new(tdir.path())).unwrap();
    tx.send(DirEvent::new(&sub)).unwrap();

    fs::write(sub.join("later.md"), "l").unwrap();
    tx.send(DirEvent::new(&sub)).unwrap();

    let delta = deltas.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(delta.dir, sub);
    assert_eq!(
        delta.diff.additions.keys().collect::<Vec<_>>(),
        vec![&sub.join("later.md")]
    );

    drop(tx);
    worker.join().unwrap();
}
