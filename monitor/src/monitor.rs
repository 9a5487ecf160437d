//! Platform-independent monitor state machine and lifecycle plumbing.
//!
//! The per-platform adapters in [`crate::sys`] own the kernel resources;
//! everything they share lives here: the Stopped/Running state machine,
//! channel creation, the throttle task, and the selector checks.

use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::bounded;
use crossbeam_channel::unbounded;
use tracing::debug;
use tracing::warn;

use crate::error::MonitorError;
use crate::event::DirEvent;
use crate::event::normalized;
use crate::selector::Selector;
use crate::sys::PlatformMonitor;

/// Latency window used when none is configured. Zero disables throttling.
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(50);

/// Capability set shared by the per-platform monitors.
pub trait Monitor {
    /// Transition Stopped → Running: allocate fresh channels, spawn the
    /// throttle task, arm the kernel adapter. Returns the public event
    /// stream. Fails with [`MonitorError::AlreadyStarted`] when Running,
    /// and synchronously with any startup error (the monitor then stays
    /// Stopped).
    fn start(&mut self) -> Result<Receiver<DirEvent>, MonitorError>;

    /// Transition Running → Stopped: tear down the kernel adapter and let
    /// the public streams close. After `stop` returns no further events
    /// appear. Fails with [`MonitorError::AlreadyStopped`] when Stopped.
    fn stop(&mut self) -> Result<(), MonitorError>;

    /// The public event stream of the current (or last) run. Receivers
    /// observe end-of-stream once the monitor stops.
    fn events(&self) -> Receiver<DirEvent>;

    /// The error stream of the current (or last) run. Non-fatal trouble
    /// (selector failures, malformed kernel reads, bookkeeping mismatches)
    /// is published here while the monitor keeps running.
    fn errors(&self) -> Receiver<MonitorError>;

    /// Best-effort check: could an event for `path` currently be emitted?
    /// True iff the monitor is Running, the selector accepts `path`, and
    /// `path` exists on disk.
    fn can_emit(&self, path: &Path) -> bool;

    /// The canonicalized watched root.
    fn dir(&self) -> &Path;
}

/// Builder for the platform monitor watching one directory subtree.
pub struct MonitorBuilder {
    root: PathBuf,
    selector: Selector,
    latency: Duration,
}

impl MonitorBuilder {
    /// Watch `root` with the recursive selector and the default latency.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            selector: crate::selector::recursive(),
            latency: DEFAULT_LATENCY,
        }
    }

    /// Replace the scope predicate.
    pub fn selector(mut self, selector: Selector) -> Self {
        self.selector = selector;
        self
    }

    /// Set the per-directory throttle window. Zero disables throttling.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Canonicalize the root and construct the monitor for this platform,
    /// in Stopped state.
    pub fn build(self) -> Result<PlatformMonitor, MonitorError> {
        PlatformMonitor::create(self.root, self.selector, self.latency)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Stopped,
    Running,
}

/// The state, channels, and throttle task shared by every platform
/// monitor. Owns everything except the kernel resources.
pub(crate) struct MonitorCore {
    dir: PathBuf,
    latency: Duration,
    selector: Selector,
    state: Arc<Mutex<State>>,
    events_rx: Receiver<DirEvent>,
    errors_rx: Receiver<MonitorError>,
    throttle: Option<JoinHandle<()>>,
}

impl fmt::Debug for MonitorCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorCore")
            .field("dir", &self.dir)
            .field("latency", &self.latency)
            .field("state", &self.state)
            .field("events_rx", &self.events_rx)
            .field("errors_rx", &self.errors_rx)
            .field("throttle", &self.throttle)
            .finish()
    }
}

fn lock_state(state: &Mutex<State>) -> MutexGuard<'_, State> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MonitorCore {
    /// Resolve symlinks in `dir` and return a core in Stopped state. The
    /// accessor channels start out disconnected; `begin_start` replaces
    /// them with live ones.
    pub(crate) fn new(
        dir: PathBuf,
        selector: Selector,
        latency: Duration,
    ) -> Result<Self, MonitorError> {
        let rdir = fs::canonicalize(&dir)
            .map_err(|source| MonitorError::BadRoot { dir, source })?;

        let (_, events_rx) = unbounded();
        let (_, errors_rx) = unbounded();

        Ok(Self {
            dir: rdir,
            latency,
            selector,
            state: Arc::new(Mutex::new(State::Stopped)),
            events_rx,
            errors_rx,
            throttle: None,
        })
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// First half of `start`: flip the state machine to Running, allocate
    /// the channel chain for this run, and spawn the throttle task. The
    /// returned context is handed to the adapter thread; it holds the only
    /// unthrottled sender, so the run winds down once the adapter drops it.
    pub(crate) fn begin_start(&mut self) -> Result<AdapterCtx, MonitorError> {
        {
            let mut state = lock_state(&self.state);
            if *state == State::Running {
                return Err(MonitorError::AlreadyStarted);
            }
            *state = State::Running;
        }

        let (unthrottled_tx, unthrottled_rx) = bounded(0);
        let (events_tx, events_rx) = unbounded();
        let (errors_tx, errors_rx) = unbounded();
        self.events_rx = events_rx;
        self.errors_rx = errors_rx;

        let latency = self.latency;
        let throttle = thread::Builder::new()
            .name("dirwatch-throttle".to_string())
            .spawn(move || crate::throttle::run(unthrottled_rx, events_tx, latency))?;
        self.throttle = Some(throttle);

        debug!(dir = %self.dir.display(), latency = ?self.latency, "monitor starting");

        Ok(AdapterCtx {
            dir: self.dir.clone(),
            latency: self.latency,
            selector: Arc::clone(&self.selector),
            state: Arc::clone(&self.state),
            unthrottled: unthrottled_tx,
            errors: errors_tx,
        })
    }

    /// Roll back a `begin_start` whose adapter setup failed: flip back to
    /// Stopped and reap the throttle task. The caller must already have
    /// dropped the adapter context.
    pub(crate) fn abort_start(&mut self) {
        *lock_state(&self.state) = State::Stopped;
        self.join_throttle();
    }

    /// First half of `stop`: flip the state machine to Stopped. The caller
    /// then signals its adapter, joins it, and calls `join_throttle`.
    pub(crate) fn request_stop(&mut self) -> Result<(), MonitorError> {
        let mut state = lock_state(&self.state);
        if *state == State::Stopped {
            return Err(MonitorError::AlreadyStopped);
        }
        *state = State::Stopped;
        debug!(dir = %self.dir.display(), "monitor stopping");
        Ok(())
    }

    /// Reap the throttle task of the finished run, if any.
    pub(crate) fn join_throttle(&mut self) {
        if let Some(handle) = self.throttle.take() {
            if handle.join().is_err() {
                warn!("throttle task panicked");
            }
        }
    }

    pub(crate) fn events(&self) -> Receiver<DirEvent> {
        self.events_rx.clone()
    }

    pub(crate) fn errors(&self) -> Receiver<MonitorError> {
        self.errors_rx.clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        *lock_state(&self.state) == State::Running
    }

    pub(crate) fn can_emit(&self, path: &Path) -> bool {
        if !self.is_running() {
            return false;
        }

        let clean = normalized(path);
        match (self.selector)(&self.dir, &clean) {
            Ok(true) => {}
            Ok(false) | Err(_) => return false,
        }

        fs::symlink_metadata(&clean).is_ok()
    }
}

/// Everything an adapter's event loop needs from the core: scope checks,
/// the unthrottled sender, the error sender, and the shared state for
/// fatal transitions. Dropping it closes the unthrottled channel, which
/// winds down the throttle task and the public stream.
pub(crate) struct AdapterCtx {
    pub(crate) dir: PathBuf,
    pub(crate) latency: Duration,
    selector: Selector,
    state: Arc<Mutex<State>>,
    unthrottled: Sender<DirEvent>,
    errors: Sender<MonitorError>,
}

impl fmt::Debug for AdapterCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterCtx")
            .field("dir", &self.dir)
            .field("latency", &self.latency)
            .field("state", &self.state)
            .field("unthrottled", &self.unthrottled)
            .field("errors", &self.errors)
            .finish()
    }
}

impl AdapterCtx {
    /// Consult the selector for a normalized path. Selector failures are
    /// reported on the error channel and read as "not selected".
    pub(crate) fn is_selected(&self, path: &Path) -> bool {
        match (self.selector)(&self.dir, path) {
            Ok(res) => res,
            Err(source) => {
                self.report(MonitorError::Selector {
                    path: path.to_path_buf(),
                    source,
                });
                false
            }
        }
    }

    /// Emit a directory event if the selector accepts the path. The send
    /// blocks until the throttle picks the event up; that backpressure is
    /// deliberate. Returns whether an event was emitted.
    pub(crate) fn emit(&self, dir: &Path) -> bool {
        let clean = normalized(dir);
        if !self.is_selected(&clean) {
            return false;
        }

        self.unthrottled.send(DirEvent::new(clean)).is_ok()
    }

    /// Publish a non-fatal error.
    pub(crate) fn report(&self, err: MonitorError) {
        let _ = self.errors.send(err);
    }

    pub(crate) fn is_running(&self) -> bool {
        *lock_state(&self.state) == State::Running
    }

    /// Flip the monitor to Stopped from inside the event loop (fatal
    /// condition, e.g. the watched root disappeared). Returns false if it
    /// was already Stopped.
    pub(crate) fn mark_stopped(&self) -> bool {
        let mut state = lock_state(&self.state);
        let was_running = *state == State::Running;
        *state = State::Stopped;
        was_running
    }
}

#[cfg(test)]
#[path = "monitor.test.rs"]
mod tests;
