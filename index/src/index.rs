//! The directory-path → snapshot index driving the listing differ.

use std::collections::HashMap;
use std::io;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::unbounded;
use dirwatch_monitor::DirEvent;
use thiserror::Error;
use tracing::debug;
use tracing::trace;
use tracing::warn;
use walkdir::WalkDir;

use crate::diff::Diff;
use crate::snapshot::Snapshot;

/// Errors from maintaining the index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to snapshot {dir}: {source}")]
    Capture {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How eagerly the index explores directories it has not seen before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// First observation of a directory snapshots its whole subtree, and
    /// deindexing removes the known subtree with it.
    Strict,
    /// Directories are snapshot one at a time, on their first event. Cuts
    /// the indexing cost down drastically in large trees at the price of
    /// missing some file deltas right after subtrees move in or out.
    Lazy,
}

/// File-level changes distilled from one directory event.
#[derive(Debug, Clone)]
pub struct Delta {
    pub dir: PathBuf,
    pub diff: Diff,
}

/// Maps each observed directory to its most recent snapshot. Consumes the
/// monitor's public event stream; produces [`Delta`]s describing file
/// additions, modifications, and deletions.
pub struct Index {
    mode: Mode,
    dirs: HashMap<PathBuf, Snapshot>,
    events: Receiver<DirEvent>,
    deltas_tx: Sender<Delta>,
    deltas_rx: Receiver<Delta>,
}

impl Index {
    /// An index that eagerly snapshots whole subtrees.
    pub fn strict(events: Receiver<DirEvent>) -> Self {
        Self::with_mode(Mode::Strict, events)
    }

    /// An index that snapshots a directory only once it shows activity.
    pub fn lazy(events: Receiver<DirEvent>) -> Self {
        Self::with_mode(Mode::Lazy, events)
    }

    fn with_mode(mode: Mode, events: Receiver<DirEvent>) -> Self {
        let (deltas_tx, deltas_rx) = unbounded();
        Self {
            mode,
            dirs: HashMap::new(),
            events,
            deltas_tx,
            deltas_rx,
        }
    }

    /// The stream of file-level deltas. Closes when the index winds down.
    pub fn deltas(&self) -> Receiver<Delta> {
        self.deltas_rx.clone()
    }

    /// Whether `dir` currently has a snapshot in the index.
    pub fn is_indexed(&self, dir: &Path) -> bool {
        self.dirs.contains_key(dir)
    }

    /// Consume directory events until the monitor's stream closes.
    /// Capture failures are logged and skipped; the index keeps going.
    pub fn run(mut self) {
        while let Ok(ev) = self.events.recv() {
            if let Err(err) = self.observe(ev.dir()) {
                warn!("dropping directory event: {err}");
            }
        }
    }

    /// Process one directory event: snapshot the directory, diff against
    /// the previous snapshot, fold directory-typed children back into the
    /// index, and publish the remaining file-level delta.
    pub fn observe(&mut self, dir: &Path) -> Result<(), IndexError> {
        if !self.dirs.contains_key(dir) {
            // First sighting: record it, nothing to diff against yet.
            return self.index_dir(dir);
        }

        let new = match Snapshot::capture(dir) {
            Ok(snapshot) => snapshot,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // Known directory no longer exists; its parent's event
                // reports the deletion.
                self.deindex_dir(dir);
                return Ok(());
            }
            Err(source) => {
                return Err(IndexError::Capture {
                    dir: dir.to_path_buf(),
                    source,
                });
            }
        };

        let old = self
            .dirs
            .insert(dir.to_path_buf(), new.clone())
            .unwrap_or_default();
        let mut diff = Diff::between(&old, &new);

        // Added directories extend the index instead of the file delta.
        for child in take_matching(&mut diff.additions, |meta| meta.is_dir) {
            if let Err(err) = self.index_dir(&child) {
                warn!("failed to index added directory: {err}");
            }
        }

        // Deleted directories shrink it.
        for child in take_matching(&mut diff.deletions, |meta| meta.is_dir) {
            self.deindex_dir(&child);
        }

        // A modified subdirectory announces itself with its own event;
        // only a file that turned into a directory needs indexing here.
        for child in take_matching(&mut diff.modifications, |meta| meta.is_dir) {
            if !self.dirs.contains_key(&child) {
                if let Err(err) = self.index_dir(&child) {
                    warn!("failed to index converted directory: {err}");
                }
            }
        }

        // The reverse flip: an indexed directory is now a file. Forget the
        // subtree; the entry stays in the delta as a file modification.
        let flipped: Vec<PathBuf> = diff
            .modifications
            .iter()
            .filter(|(path, meta)| !meta.is_dir && self.dirs.contains_key(*path))
            .map(|(path, _)| path.clone())
            .collect();
        for child in flipped {
            self.deindex_dir(&child);
        }

        if !diff.is_empty() {
            debug!(dir = %dir.display(), "delta:\n{diff}");
            let _ = self.deltas_tx.send(Delta {
                dir: dir.to_path_buf(),
                diff,
            });
        }

        Ok(())
    }

    /// Record a snapshot for `dir`; in strict mode, for its whole subtree.
    fn index_dir(&mut self, dir: &Path) -> Result<(), IndexError> {
        match Snapshot::capture(dir) {
            Ok(snapshot) => {
                self.dirs.insert(dir.to_path_buf(), snapshot);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                trace!(dir = %dir.display(), "vanished before it could be indexed");
                return Ok(());
            }
            Err(source) => {
                return Err(IndexError::Capture {
                    dir: dir.to_path_buf(),
                    source,
                });
            }
        }

        if self.mode == Mode::Strict {
            for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
                let Ok(entry) = entry else {
                    continue;
                };
                if !entry.file_type().is_dir() {
                    continue;
                }
                let path = entry.into_path();
                match Snapshot::capture(&path) {
                    Ok(snapshot) => {
                        self.dirs.insert(path, snapshot);
                    }
                    Err(err) => {
                        trace!(dir = %path.display(), "skipping subtree entry: {err}");
                    }
                }
            }
        }

        Ok(())
    }

    /// Drop `dir` from the index; in strict mode, its known subtree too.
    /// Lazy mode never walks on deindex, so stale descendants age out on
    /// their own events.
    fn deindex_dir(&mut self, dir: &Path) {
        self.dirs.remove(dir);
        if self.mode == Mode::Strict {
            self.dirs.retain(|path, _| !path.starts_with(dir));
        }
    }
}

/// Pull the entries matching `pred` out of a diff set, returning their
/// paths.
fn take_matching<F>(
    set: &mut std::collections::BTreeMap<PathBuf, crate::snapshot::ChildMeta>,
    pred: F,
) -> Vec<PathBuf>
where
    F: Fn(&crate::snapshot::ChildMeta) -> bool,
{
    let paths: Vec<PathBuf> = set
        .iter()
        .filter(|(_, meta)| pred(meta))
        .map(|(path, _)| path.clone())
        .collect();
    for path in &paths {
        set.remove(path);
    }
    paths
}

#[cfg(test)]
#[path = "index.test.rs"]
mod tests;
