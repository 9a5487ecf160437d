use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::bounded;
use crossbeam_channel::unbounded;
use pretty_assertions::assert_eq;

use super::*;

const LATENCY: Duration = Duration::from_millis(50);

fn dir(name: &str) -> PathBuf {
    PathBuf::from(name)
}

#[test]
fn first_event_is_admitted() {
    let mut table = ThrottleTable::new(LATENCY);
    assert!(table.admit(&dir("/a"), Instant::now()));
}

#[test]
fn event_within_window_is_dropped() {
    let mut table = ThrottleTable::new(LATENCY);
    let start = Instant::now();

    assert!(table.admit(&dir("/a"), start));
    assert!(!table.admit(&dir("/a"), start));
    assert!(!table.admit(&dir("/a"), start + LATENCY / 2));
}

#[test]
fn event_after_window_is_admitted() {
    let mut table = ThrottleTable::new(LATENCY);
    let start = Instant::now();

    assert!(table.admit(&dir("/a"), start));
    assert!(table.admit(&dir("/a"), start + LATENCY));
}

#[test]
fn directories_are_throttled_independently() {
    let mut table = ThrottleTable::new(LATENCY);
    let start = Instant::now();

    assert!(table.admit(&dir("/a"), start));
    assert!(table.admit(&dir("/b"), start));
    assert!(!table.admit(&dir("/a"), start));
    assert!(!table.admit(&dir("/b"), start));
}

#[test]
fn zero_latency_disables_throttling() {
    let mut table = ThrottleTable::new(Duration::ZERO);
    let now = Instant::now();

    assert!(table.admit(&dir("/a"), now));
    assert!(table.admit(&dir("/a"), now));
    assert!(table.admit(&dir("/a"), now));
    assert_eq!(table.len(), 0);
}

#[test]
fn expired_entries_are_pruned_once_table_grows() {
    let mut table = ThrottleTable::new(LATENCY);
    let start = Instant::now();

    for i in 0..PRUNE_THRESHOLD {
        assert!(table.admit(Path::new(&format!("/d{i}")), start));
    }
    assert_eq!(table.len(), PRUNE_THRESHOLD);

    // All previous deadlines have expired by now; the next admission
    // triggers a prune and leaves only the fresh entry.
    assert!(table.admit(&dir("/late"), start + LATENCY * 2));
    assert_eq!(table.len(), 1);
}

#[test]
fn run_forwards_admitted_events_in_arrival_order() {
    let (raw_tx, raw_rx) = bounded::<DirEvent>(0);
    let (ev_tx, ev_rx) = unbounded();

    let pump = std::thread::spawn(move || run(raw_rx, ev_tx, LATENCY));

    raw_tx.send(DirEvent::new(dir("/a"))).unwrap();
    raw_tx.send(DirEvent::new(dir("/b"))).unwrap();
    // Inside /a's window: dropped.
    raw_tx.send(DirEvent::new(dir("/a"))).unwrap();
    drop(raw_tx);
    pump.join().unwrap();

    let got: Vec<PathBuf> = ev_rx.iter().map(DirEvent::into_path).collect();
    assert_eq!(got, vec![dir("/a"), dir("/b")]);
}

#[test]
fn run_exits_when_input_closes() {
    let (raw_tx, raw_rx) = bounded::<DirEvent>(0);
    let (ev_tx, ev_rx) = unbounded();

    let pump = std::thread::spawn(move || run(raw_rx, ev_tx, LATENCY));
    drop(raw_tx);
    pump.join().unwrap();

    // Output channel closed with nothing delivered.
    assert!(ev_rx.recv().is_err());
}
