use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::snapshot::ChildMeta;
use crate::snapshot::Snapshot;

/// The three disjoint child sets that distinguish a newer snapshot of a
/// directory from an older one. Consumers must treat the sets as
/// unordered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub additions: BTreeMap<PathBuf, ChildMeta>,
    pub modifications: BTreeMap<PathBuf, ChildMeta>,
    pub deletions: BTreeMap<PathBuf, ChildMeta>,
}

impl Diff {
    /// Classify the children of two snapshots of the same directory:
    ///
    /// - *additions*: in `new`, not in `old`;
    /// - *deletions*: in `old`, not in `new`;
    /// - *modifications*: in both, with a strictly newer modification
    ///   time, or with a kind flip (file became directory or vice versa)
    ///   even on equal times.
    ///
    /// Modification and addition entries carry the new metadata,
    /// deletions the last known one.
    pub fn between(old: &Snapshot, new: &Snapshot) -> Self {
        let mut diff = Self::default();

        for (path, prev) in old.iter() {
            match new.get(path) {
                Some(cur) => {
                    if cur.modified > prev.modified || cur.is_dir != prev.is_dir {
                        diff.modifications.insert(path.clone(), *cur);
                    }
                }
                None => {
                    diff.deletions.insert(path.clone(), *prev);
                }
            }
        }

        for (path, cur) in new.iter() {
            if old.get(path).is_none() {
                diff.additions.insert(path.clone(), *cur);
            }
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.modifications.is_empty() && self.deletions.is_empty()
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for path in self.additions.keys() {
            writeln!(f, "\t+ {}", path.display())?;
        }
        for path in self.modifications.keys() {
            writeln!(f, "\t= {}", path.display())?;
        }
        for path in self.deletions.keys() {
            writeln!(f, "\t- {}", path.display())?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "diff.test.rs"]
mod tests;
