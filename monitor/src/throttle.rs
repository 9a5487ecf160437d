//! Per-directory rate limiting between the raw and the public event stream.
//!
//! The throttle is the coalescing knob of the whole watcher: within one
//! latency window at most one event per directory reaches the public
//! channel, everything else is dropped. Admission order equals arrival
//! order, and directories never block each other.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use tracing::trace;

use crate::event::DirEvent;

/// Expired deadlines are pruned opportunistically once the table grows past
/// this many entries.
const PRUNE_THRESHOLD: usize = 256;

/// Tracks, per directory, the earliest instant at which the next event for
/// it may be admitted.
pub(crate) struct ThrottleTable {
    deadlines: HashMap<PathBuf, Instant>,
    latency: Duration,
}

impl ThrottleTable {
    pub(crate) fn new(latency: Duration) -> Self {
        Self {
            deadlines: HashMap::new(),
            latency,
        }
    }

    /// Decide the fate of an event for `dir` arriving at `now`: `true`
    /// admits it to the public stream and pushes the directory's deadline
    /// `latency` into the future, `false` drops it.
    ///
    /// A zero latency disables throttling entirely.
    pub(crate) fn admit(&mut self, dir: &Path, now: Instant) -> bool {
        if self.latency.is_zero() {
            return true;
        }

        if let Some(until) = self.deadlines.get(dir) {
            if now < *until {
                return false;
            }
        }

        if self.deadlines.len() >= PRUNE_THRESHOLD {
            self.prune(now);
        }

        self.deadlines.insert(dir.to_path_buf(), now + self.latency);
        true
    }

    /// Entries past their deadline are semantically absent; drop them so
    /// the table does not grow with every directory ever seen.
    fn prune(&mut self, now: Instant) {
        self.deadlines.retain(|_, until| *until > now);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.deadlines.len()
    }
}

/// Pump the unthrottled stream into the public stream until the unthrottled
/// channel closes. Runs on its own thread for the lifetime of one
/// start/stop cycle; the table is rebuilt on every start so deadlines from
/// a previous run cannot suppress fresh events.
pub(crate) fn run(
    unthrottled: Receiver<DirEvent>,
    events: Sender<DirEvent>,
    latency: Duration,
) {
    let mut table = ThrottleTable::new(latency);
    for ev in unthrottled.iter() {
        if !table.admit(ev.dir(), Instant::now()) {
            trace!(dir = %ev.dir().display(), "event dropped by throttle");
            continue;
        }

        if events.send(ev).is_err() {
            // Every public receiver is gone; there is nobody to deliver to.
            break;
        }
    }
}

#[cfg(test)]
#[path = "throttle.test.rs"]
mod tests;
