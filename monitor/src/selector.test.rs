use std::path::Path;

use super::*;

#[test]
fn recursive_accepts_root() {
    let sel = recursive();
    assert!(sel(Path::new("/a/b"), Path::new("/a/b")).unwrap());
}

#[test]
fn recursive_accepts_descendants() {
    let sel = recursive();
    assert!(sel(Path::new("/a/b"), Path::new("/a/b/c")).unwrap());
    assert!(sel(Path::new("/a/b"), Path::new("/a/b/c/d/e.md")).unwrap());
}

#[test]
fn recursive_rejects_outside_paths() {
    let sel = recursive();
    assert!(!sel(Path::new("/a/b"), Path::new("/a/c")).unwrap());
    assert!(!sel(Path::new("/a/b"), Path::new("/other")).unwrap());
}

#[test]
fn recursive_matches_components_not_string_prefixes() {
    // "/a/bc" shares a string prefix with "/a/b" but is not inside it.
    let sel = recursive();
    assert!(!sel(Path::new("/a/b"), Path::new("/a/bc")).unwrap());
}

#[test]
fn non_recursive_accepts_only_root() {
    let sel = non_recursive();
    assert!(sel(Path::new("/a/b"), Path::new("/a/b")).unwrap());
    assert!(!sel(Path::new("/a/b"), Path::new("/a/b/c")).unwrap());
    assert!(!sel(Path::new("/a/b"), Path::new("/a")).unwrap());
}
