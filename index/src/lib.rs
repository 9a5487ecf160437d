//! Directory-listing snapshots, diffing, and the watcher's in-memory
//! index.
//!
//! The monitor reports *which directory* changed; this crate works out
//! *what* changed inside it. An [`Index`] consumes the monitor's event
//! stream, keeps the most recent [`Snapshot`] per directory, classifies
//! successive snapshots with [`Diff::between`], and publishes the
//! file-level remainder as [`Delta`]s. Directory-typed children never
//! reach the delta: additions extend the index, deletions shrink it, and
//! a modified subdirectory is reported by its own event.

mod diff;
mod index;
mod snapshot;

pub use diff::Diff;
pub use index::Delta;
pub use index::Index;
pub use index::IndexError;
pub use snapshot::ChildMeta;
pub use snapshot::Snapshot;
