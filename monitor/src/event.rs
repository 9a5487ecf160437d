use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

/// Emitted when something happened to or in a directory.
///
/// Events are directory-granular on purpose: the watcher reports *which
/// directory* changed, never which file inside it. Consumers that need
/// file-level detail diff successive listings of the named directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirEvent {
    dir: PathBuf,
}

impl DirEvent {
    /// Build an event naming `dir`. Normally produced by a monitor;
    /// public so downstream consumers can be driven in tests.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory whose contents or identity changed. Normalized: no
    /// redundant separators, no trailing separator.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Consume the event, yielding the directory path.
    pub fn into_path(self) -> PathBuf {
        self.dir
    }
}

/// Lexically normalize a path: collapse redundant separators and `.`
/// components, drop any trailing separator. Does not touch the filesystem.
pub(crate) fn normalized(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[cfg(test)]
#[path = "event.test.rs"]
mod tests;
