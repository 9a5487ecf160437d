//! Scope predicates deciding which paths participate in a watch.
//!
//! A selector is consulted before every watch registration and before every
//! event emission, so it must be referentially transparent: same inputs,
//! same answer, no side effects.

use std::io;
use std::path::Path;
use std::sync::Arc;

/// Pure predicate: is `path` within the watched scope rooted at `root`?
///
/// Both arguments arrive normalized; `root` is the canonicalized watch
/// root. Errors surface on the monitor's error channel and suppress the
/// event or registration being tested.
pub type Selector = Arc<dyn Fn(&Path, &Path) -> io::Result<bool> + Send + Sync>;

/// Selects the root itself and every descendant of it.
pub fn recursive() -> Selector {
    Arc::new(|root: &Path, path: &Path| Ok(path.starts_with(root)))
}

/// Selects only the root itself.
pub fn non_recursive() -> Selector {
    Arc::new(|root: &Path, path: &Path| Ok(path == root))
}

#[cfg(test)]
#[path = "selector.test.rs"]
mod tests;
