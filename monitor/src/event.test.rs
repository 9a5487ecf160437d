use super::*;
use pretty_assertions::assert_eq;

#[test]
fn normalized_collapses_redundant_separators() {
    assert_eq!(normalized(Path::new("/a//b///c")), PathBuf::from("/a/b/c"));
}

#[test]
fn normalized_drops_trailing_separator() {
    assert_eq!(normalized(Path::new("/a/b/")), PathBuf::from("/a/b"));
}

#[test]
fn normalized_drops_current_dir_components() {
    assert_eq!(normalized(Path::new("/a/./b/.")), PathBuf::from("/a/b"));
}

#[test]
fn normalized_keeps_plain_paths_intact() {
    assert_eq!(normalized(Path::new("/a/b/c")), PathBuf::from("/a/b/c"));
}

#[test]
fn dir_event_exposes_path() {
    let ev = DirEvent::new(PathBuf::from("/watched/dir"));
    assert_eq!(ev.dir(), Path::new("/watched/dir"));
    assert_eq!(ev.into_path(), PathBuf::from("/watched/dir"));
}
