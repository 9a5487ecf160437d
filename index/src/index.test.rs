use std::fs;
use std::time::Duration;
use std::time::SystemTime;

use pretty_assertions::assert_eq;

use super::*;
use crate::snapshot::ChildMeta;

fn lazy_index() -> (Index, Receiver<Delta>) {
    let (_tx, rx) = unbounded::<DirEvent>();
    let index = Index::lazy(rx);
    let deltas = index.deltas();
    (index, deltas)
}

fn strict_index() -> (Index, Receiver<Delta>) {
    let (_tx, rx) = unbounded::<DirEvent>();
    let index = Index::strict(rx);
    let deltas = index.deltas();
    (index, deltas)
}

/// Bump a file's mtime well past its current one, so the differ sees a
/// strictly newer time regardless of filesystem timestamp granularity.
fn bump_mtime(path: &Path) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(5))
        .unwrap();
}

#[test]
fn first_observation_indexes_without_delta() {
    let tdir = tempfile::tempdir().unwrap();
    fs::write(tdir.path().join("a.md"), "a").unwrap();

    let (mut index, deltas) = lazy_index();
    index.observe(tdir.path()).unwrap();

    assert!(index.is_indexed(tdir.path()));
    assert!(deltas.try_recv().is_err());
}

#[test]
fn file_creation_produces_an_addition() {
    let tdir = tempfile::tempdir().unwrap();
    let (mut index, deltas) = lazy_index();
    index.observe(tdir.path()).unwrap();

    fs::write(tdir.path().join("new.md"), "n").unwrap();
    index.observe(tdir.path()).unwrap();

    let delta = deltas.try_recv().unwrap();
    assert_eq!(delta.dir, tdir.path());
    assert_eq!(
        delta.diff.additions.keys().collect::<Vec<_>>(),
        vec![&tdir.path().join("new.md")]
    );
    assert!(delta.diff.modifications.is_empty());
    assert!(delta.diff.deletions.is_empty());
}

#[test]
fn file_edit_produces_a_modification() {
    let tdir = tempfile::tempdir().unwrap();
    let path = tdir.path().join("a.md");
    fs::write(&path, "a").unwrap();

    let (mut index, deltas) = lazy_index();
    index.observe(tdir.path()).unwrap();

    bump_mtime(&path);
    index.observe(tdir.path()).unwrap();

    let delta = deltas.try_recv().unwrap();
    assert_eq!(
        delta.diff.modifications.keys().collect::<Vec<_>>(),
        vec![&path]
    );
}

#[test]
fn file_removal_produces_a_deletion() {
    let tdir = tempfile::tempdir().unwrap();
    let path = tdir.path().join("a.md");
    fs::write(&path, "a").unwrap();

    let (mut index, deltas) = lazy_index();
    index.observe(tdir.path()).unwrap();

    fs::remove_file(&path).unwrap();
    index.observe(tdir.path()).unwrap();

    let delta = deltas.try_recv().unwrap();
    assert_eq!(delta.diff.deletions.keys().collect::<Vec<_>>(), vec![&path]);
}

#[test]
fn added_directory_extends_index_and_leaves_file_delta() {
    let tdir = tempfile::tempdir().unwrap();
    let (mut index, deltas) = lazy_index();
    index.observe(tdir.path()).unwrap();

    let sub = tdir.path().join("sub");
    fs::create_dir(&sub).unwrap();
    index.observe(tdir.path()).unwrap();

    // The new directory went into the index, not into the delta.
    assert!(index.is_indexed(&sub));
    assert!(deltas.try_recv().is_err());
}

#[test]
fn removed_directory_is_deindexed() {
    let tdir = tempfile::tempdir().unwrap();
    let sub = tdir.path().join("sub");
    fs::create_dir(&sub).unwrap();

    let (mut index, deltas) = lazy_index();
    index.observe(tdir.path()).unwrap();
    index.observe(&sub).unwrap();
    assert!(index.is_indexed(&sub));

    fs::remove_dir(&sub).unwrap();
    index.observe(tdir.path()).unwrap();

    assert!(!index.is_indexed(&sub));
    assert!(deltas.try_recv().is_err());
}

#[test]
fn strict_mode_indexes_the_whole_subtree() {
    let tdir = tempfile::tempdir().unwrap();
    let nested = tdir.path().join("a").join("b");
    fs::create_dir_all(&nested).unwrap();

    let (mut index, _deltas) = strict_index();
    index.observe(tdir.path()).unwrap();

    assert!(index.is_indexed(tdir.path()));
    assert!(index.is_indexed(&tdir.path().join("a")));
    assert!(index.is_indexed(&nested));
}

#[test]
fn strict_mode_deindexes_the_known_subtree() {
    let tdir = tempfile::tempdir().unwrap();
    let sub = tdir.path().join("a");
    let nested = sub.join("b");
    fs::create_dir_all(&nested).unwrap();

    let (mut index, _deltas) = strict_index();
    index.observe(tdir.path()).unwrap();
    assert!(index.is_indexed(&nested));

    fs::remove_dir_all(&sub).unwrap();
    index.observe(tdir.path()).unwrap();

    assert!(!index.is_indexed(&sub));
    assert!(!index.is_indexed(&nested));
}

#[test]
fn lazy_mode_does_not_walk_on_first_observation() {
    let tdir = tempfile::tempdir().unwrap();
    let nested = tdir.path().join("a").join("b");
    fs::create_dir_all(&nested).unwrap();

    let (mut index, _deltas) = lazy_index();
    index.observe(tdir.path()).unwrap();

    assert!(index.is_indexed(tdir.path()));
    assert!(!index.is_indexed(&nested));
}

#[test]
fn event_for_vanished_known_directory_deindexes_it() {
    let tdir = tempfile::tempdir().unwrap();
    let sub = tdir.path().join("sub");
    fs::create_dir(&sub).unwrap();

    let (mut index, deltas) = lazy_index();
    index.observe(&sub).unwrap();
    assert!(index.is_indexed(&sub));

    fs::remove_dir(&sub).unwrap();
    index.observe(&sub).unwrap();

    assert!(!index.is_indexed(&sub));
    assert!(deltas.try_recv().is_err());
}

#[test]
fn event_for_vanished_unknown_directory_is_ignored() {
    let tdir = tempfile::tempdir().unwrap();
    let ghost = tdir.path().join("ghost");

    let (mut index, deltas) = lazy_index();
    index.observe(&ghost).unwrap();

    assert!(!index.is_indexed(&ghost));
    assert!(deltas.try_recv().is_err());
}

#[test]
fn directory_turned_file_is_a_file_modification() {
    let tdir = tempfile::tempdir().unwrap();
    let subject = tdir.path().join("subject");
    fs::create_dir(&subject).unwrap();

    let (mut index, deltas) = lazy_index();
    index.observe(tdir.path()).unwrap();
    index.observe(&subject).unwrap();
    assert!(index.is_indexed(&subject));

    fs::remove_dir(&subject).unwrap();
    fs::write(&subject, "now a file").unwrap();
    bump_mtime(&subject);
    index.observe(tdir.path()).unwrap();

    let delta = deltas.try_recv().unwrap();
    assert_eq!(
        delta.diff.modifications.keys().collect::<Vec<_>>(),
        vec![&subject]
    );
    assert!(!index.is_indexed(&subject));
}

#[test]
fn snapshot_against_unchanged_disk_is_empty() {
    let tdir = tempfile::tempdir().unwrap();
    fs::write(tdir.path().join("a.md"), "a").unwrap();
    fs::create_dir(tdir.path().join("sub")).unwrap();

    let first = Snapshot::capture(tdir.path()).unwrap();
    let second = Snapshot::capture(tdir.path()).unwrap();

    assert!(Diff::between(&first, &second).is_empty());
}

#[test]
fn take_matching_splits_by_predicate() {
    let t0 = SystemTime::UNIX_EPOCH;
    let mut set: std::collections::BTreeMap<PathBuf, ChildMeta> = [
        (
            PathBuf::from("/d/dir"),
            ChildMeta {
                modified: t0,
                is_dir: true,
            },
        ),
        (
            PathBuf::from("/d/file"),
            ChildMeta {
                modified: t0,
                is_dir: false,
            },
        ),
    ]
    .into_iter()
    .collect();

    let taken = take_matching(&mut set, |meta| meta.is_dir);

    assert_eq!(taken, vec![PathBuf::from("/d/dir")]);
    assert_eq!(set.keys().collect::<Vec<_>>(), vec![&PathBuf::from("/d/file")]);
}
