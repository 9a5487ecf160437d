use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use pretty_assertions::assert_eq;

use super::*;

#[test]
fn capture_records_children_with_kind() {
    let tdir = tempfile::tempdir().unwrap();
    fs::write(tdir.path().join("a.md"), "a").unwrap();
    fs::create_dir(tdir.path().join("sub")).unwrap();

    let snap = Snapshot::capture(tdir.path()).unwrap();

    assert_eq!(snap.len(), 2);
    assert!(!snap.get(&tdir.path().join("a.md")).unwrap().is_dir);
    assert!(snap.get(&tdir.path().join("sub")).unwrap().is_dir);
}

#[test]
fn capture_is_not_recursive() {
    let tdir = tempfile::tempdir().unwrap();
    fs::create_dir(tdir.path().join("sub")).unwrap();
    fs::write(tdir.path().join("sub").join("nested.md"), "n").unwrap();

    let snap = Snapshot::capture(tdir.path()).unwrap();

    assert_eq!(snap.len(), 1);
    assert!(snap.get(&tdir.path().join("sub").join("nested.md")).is_none());
}

#[test]
fn capture_of_missing_directory_fails_with_not_found() {
    let err = Snapshot::capture(Path::new("/definitely/not/here")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn capture_of_empty_directory_is_empty() {
    let tdir = tempfile::tempdir().unwrap();
    let snap = Snapshot::capture(tdir.path()).unwrap();
    assert!(snap.is_empty());
}

#[cfg(unix)]
#[test]
fn capture_records_symlinks_without_following() {
    let tdir = tempfile::tempdir().unwrap();
    fs::create_dir(tdir.path().join("target")).unwrap();
    std::os::unix::fs::symlink(tdir.path().join("target"), tdir.path().join("link")).unwrap();

    let snap = Snapshot::capture(tdir.path()).unwrap();

    // The link is compared on its own metadata: not a directory.
    assert!(!snap.get(&tdir.path().join("link")).unwrap().is_dir);
}
