use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;

use pretty_assertions::assert_eq;

use super::*;
use crate::snapshot::snapshot_of;

fn file(t: SystemTime) -> ChildMeta {
    ChildMeta {
        modified: t,
        is_dir: false,
    }
}

fn dir(t: SystemTime) -> ChildMeta {
    ChildMeta {
        modified: t,
        is_dir: true,
    }
}

fn p(name: &str) -> PathBuf {
    PathBuf::from(name)
}

#[test]
fn diff_of_identical_snapshots_is_empty() {
    let t0 = SystemTime::UNIX_EPOCH;
    let snap = snapshot_of([(p("/d/f1"), file(t0)), (p("/d/sub"), dir(t0))]);

    assert!(Diff::between(&snap, &snap.clone()).is_empty());
}

#[test]
fn classifies_additions_modifications_and_deletions() {
    let t0 = SystemTime::UNIX_EPOCH;
    let t1 = t0 + Duration::from_secs(1);

    let old = snapshot_of([(p("/d/f1"), file(t0)), (p("/d/f2"), file(t0))]);
    let new = snapshot_of([
        (p("/d/f1"), file(t0)),
        (p("/d/f2"), file(t1)),
        (p("/d/f3"), file(t0)),
    ]);

    let diff = Diff::between(&old, &new);

    assert_eq!(diff.additions.keys().collect::<Vec<_>>(), vec![&p("/d/f3")]);
    assert_eq!(
        diff.modifications.keys().collect::<Vec<_>>(),
        vec![&p("/d/f2")]
    );
    assert!(diff.deletions.is_empty());
}

#[test]
fn deletion_shows_up_with_last_known_meta() {
    let t0 = SystemTime::UNIX_EPOCH;
    let old = snapshot_of([(p("/d/gone"), dir(t0))]);
    let new = snapshot_of([]);

    let diff = Diff::between(&old, &new);

    assert!(diff.deletions.get(&p("/d/gone")).unwrap().is_dir);
    assert!(diff.additions.is_empty());
    assert!(diff.modifications.is_empty());
}

#[test]
fn equal_modification_times_are_not_modifications() {
    let t0 = SystemTime::UNIX_EPOCH;
    let old = snapshot_of([(p("/d/f1"), file(t0))]);
    let new = snapshot_of([(p("/d/f1"), file(t0))]);

    assert!(Diff::between(&old, &new).is_empty());
}

#[test]
fn older_modification_time_is_not_a_modification() {
    let t0 = SystemTime::UNIX_EPOCH;
    let t1 = t0 + Duration::from_secs(1);
    let old = snapshot_of([(p("/d/f1"), file(t1))]);
    let new = snapshot_of([(p("/d/f1"), file(t0))]);

    assert!(Diff::between(&old, &new).is_empty());
}

#[test]
fn kind_flip_is_a_modification_even_on_equal_times() {
    let t0 = SystemTime::UNIX_EPOCH;
    let old = snapshot_of([(p("/d/d1"), dir(t0))]);
    let new = snapshot_of([(p("/d/d1"), file(t0))]);

    let diff = Diff::between(&old, &new);

    assert_eq!(
        diff.modifications.keys().collect::<Vec<_>>(),
        vec![&p("/d/d1")]
    );
    assert!(!diff.modifications.get(&p("/d/d1")).unwrap().is_dir);
}

#[test]
fn sets_are_disjoint() {
    let t0 = SystemTime::UNIX_EPOCH;
    let t1 = t0 + Duration::from_secs(1);

    let old = snapshot_of([(p("/d/f1"), file(t0)), (p("/d/f2"), file(t0))]);
    let new = snapshot_of([(p("/d/f2"), file(t1)), (p("/d/f3"), file(t0))]);

    let diff = Diff::between(&old, &new);

    for added in diff.additions.keys() {
        assert!(!diff.modifications.contains_key(added));
        assert!(!diff.deletions.contains_key(added));
    }
    for modified in diff.modifications.keys() {
        assert!(!diff.deletions.contains_key(modified));
    }
}

#[test]
fn display_marks_each_set() {
    let t0 = SystemTime::UNIX_EPOCH;
    let old = snapshot_of([(p("/d/f1"), file(t0))]);
    let new = snapshot_of([(p("/d/f2"), file(t0))]);

    let rendered = Diff::between(&old, &new).to_string();

    assert!(rendered.contains("+ /d/f2"));
    assert!(rendered.contains("- /d/f1"));
}
