//! Linux adapter: inotify driven through a mio (epoll) poll loop.
//!
//! inotify is not recursive, so the adapter maintains one watch per
//! directory in the subtree and repairs the set as directories are
//! created, deleted, and moved. Stop signalling goes through a
//! [`mio::Waker`] registered with the same poll instance, which preempts
//! the blocking wait without timeout polling.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::io::ErrorKind;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use inotify::EventMask;
use inotify::Inotify;
use inotify::WatchDescriptor;
use inotify::WatchMask;
use mio::Events;
use mio::Interest;
use mio::Poll;
use mio::Token;
use mio::Waker;
use mio::unix::SourceFd;
use tracing::trace;
use tracing::warn;
use walkdir::WalkDir;

use crate::error::MonitorError;
use crate::event::DirEvent;
use crate::event::normalized;
use crate::monitor::AdapterCtx;
use crate::monitor::Monitor;
use crate::monitor::MonitorCore;
use crate::selector::Selector;

const INOTIFY_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);

/// Sized to drain many maximum-length events per read.
const EVENT_BUFFER_SIZE: usize = 64 * 1024;

// WatchMask ops are not const.
fn watch_mask() -> WatchMask {
    WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::MODIFY
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
        | WatchMask::DELETE_SELF
        | WatchMask::ONLYDIR
}

/// Monitor backed by inotify + epoll.
pub struct LinuxMonitor {
    core: MonitorCore,
    waker: Option<Arc<Waker>>,
    event_loop: Option<JoinHandle<()>>,
}

impl LinuxMonitor {
    pub(crate) fn create(
        root: PathBuf,
        selector: Selector,
        latency: Duration,
    ) -> Result<Self, MonitorError> {
        Ok(Self {
            core: MonitorCore::new(root, selector, latency)?,
            waker: None,
            event_loop: None,
        })
    }

    fn shutdown(&mut self) {
        if let Some(waker) = self.waker.take() {
            let _ = waker.wake();
        }
        if let Some(handle) = self.event_loop.take() {
            if handle.join().is_err() {
                warn!("inotify event loop panicked");
            }
        }
        self.core.join_throttle();
    }
}

impl Monitor for LinuxMonitor {
    fn start(&mut self) -> Result<Receiver<DirEvent>, MonitorError> {
        let ctx = self.core.begin_start()?;

        let event_loop = match EventLoop::new(ctx) {
            Ok(event_loop) => event_loop,
            Err(err) => {
                self.core.abort_start();
                return Err(err);
            }
        };

        self.waker = Some(Arc::clone(&event_loop.waker));
        match thread::Builder::new()
            .name("dirwatch-inotify".to_string())
            .spawn(move || event_loop.run())
        {
            Ok(handle) => self.event_loop = Some(handle),
            Err(err) => {
                self.waker = None;
                self.core.abort_start();
                return Err(err.into());
            }
        }

        Ok(self.core.events())
    }

    fn stop(&mut self) -> Result<(), MonitorError> {
        self.core.request_stop()?;
        self.shutdown();
        Ok(())
    }

    fn events(&self) -> Receiver<DirEvent> {
        self.core.events()
    }

    fn errors(&self) -> Receiver<MonitorError> {
        self.core.errors()
    }

    fn can_emit(&self, path: &Path) -> bool {
        self.core.can_emit(path)
    }

    fn dir(&self) -> &Path {
        self.core.dir()
    }
}

impl Drop for LinuxMonitor {
    fn drop(&mut self) {
        let _ = self.core.request_stop();
        self.shutdown();
    }
}

/// One half of a directory rename, keyed by the kernel cookie. Created on
/// moved-from, completed by the matching moved-to, abandoned at the end of
/// the read cycle otherwise.
struct MoveTransaction {
    wd: WatchDescriptor,
    from: PathBuf,
}

/// An inotify event detached from the read buffer, so the buffer can be
/// reused while the event is handled.
struct RawEvent {
    wd: WatchDescriptor,
    mask: EventMask,
    cookie: u32,
    name: Option<OsString>,
}

/// The event loop's state: kernel handles plus the descriptor → path
/// table. Owned by the loop thread alone; every resource is released when
/// the loop returns and the struct drops.
struct EventLoop {
    ctx: AdapterCtx,
    inotify: Inotify,
    poll: Poll,
    waker: Arc<Waker>,
    watches: HashMap<WatchDescriptor, PathBuf>,
    pending_moves: HashMap<u32, MoveTransaction>,
}

impl EventLoop {
    fn new(ctx: AdapterCtx) -> Result<Self, MonitorError> {
        let inotify = Inotify::init()?;
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        let inotify_fd = inotify.as_raw_fd();
        poll.registry().register(
            &mut SourceFd(&inotify_fd),
            INOTIFY_TOKEN,
            Interest::READABLE,
        )?;

        let mut event_loop = Self {
            ctx,
            inotify,
            poll,
            waker,
            watches: HashMap::new(),
            pending_moves: HashMap::new(),
        };
        event_loop.add_watch_tree()?;
        Ok(event_loop)
    }

    /// Walk the watched root and register a watch for every directory the
    /// selector accepts. Failures here abort the start.
    fn add_watch_tree(&mut self) -> Result<(), MonitorError> {
        let root = self.ctx.dir.clone();
        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = entry.map_err(|err| MonitorError::Walk {
                path: root.clone(),
                source: io::Error::from(err),
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }

            let path = normalized(&entry.into_path());
            if !self.ctx.is_selected(&path) {
                continue;
            }

            match self.inotify.watches().add(&path, watch_mask()) {
                Ok(wd) => {
                    trace!(dir = %path.display(), "watch added");
                    self.watches.insert(wd, path);
                }
                // Vanished between the walk and the registration; the
                // parent watch reports the deletion.
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn run(mut self) {
        let mut mio_events = Events::with_capacity(16);
        let mut buffer = [0u8; EVENT_BUFFER_SIZE];

        trace!(
            dir = %self.ctx.dir.display(),
            latency = ?self.ctx.latency,
            watches = self.watches.len(),
            "inotify event loop running"
        );

        'outer: while self.ctx.is_running() {
            if let Err(err) = self.poll.poll(&mut mio_events, None) {
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                // The poll instance itself failed; the watch is dead.
                self.ctx.report(err.into());
                self.ctx.mark_stopped();
                break;
            }

            for mio_event in mio_events.iter() {
                match mio_event.token() {
                    WAKE_TOKEN => break 'outer,
                    INOTIFY_TOKEN => {
                        if !self.drain(&mut buffer) {
                            break 'outer;
                        }
                    }
                    _ => {}
                }
            }
        }

        self.watches.clear();
        // Dropping self closes the inotify and epoll instances and the
        // unthrottled channel, which lets the throttle task wind down.
    }

    /// Read inotify until it would block. Returns false when a fatal
    /// condition stopped the monitor.
    fn drain(&mut self, buffer: &mut [u8]) -> bool {
        loop {
            let batch: Vec<RawEvent> = match self.inotify.read_events(buffer) {
                Ok(events) => events
                    .map(|event| RawEvent {
                        wd: event.wd,
                        mask: event.mask,
                        cookie: event.cookie,
                        name: event.name.map(OsStr::to_os_string),
                    })
                    .collect(),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    // The event queue itself is broken; the watch is dead.
                    self.ctx.report(err.into());
                    self.ctx.mark_stopped();
                    return false;
                }
            };

            for event in batch {
                if !self.handle_event(event) {
                    return false;
                }
            }
        }

        self.abandon_pending_moves();
        true
    }

    fn handle_event(&mut self, event: RawEvent) -> bool {
        let mask = event.mask;

        if mask.contains(EventMask::Q_OVERFLOW) {
            self.ctx.report(MonitorError::Io(io::Error::other(
                "inotify queue overflowed; events were lost",
            )));
            return true;
        }

        if mask.contains(EventMask::IGNORED) {
            // The kernel dropped this watch; forget the descriptor. No
            // event is emitted for an implicit removal.
            if let Some(path) = self.watches.remove(&event.wd) {
                trace!(dir = %path.display(), "watch dropped by kernel");
                if path == self.ctx.dir {
                    return self.fatal_root_gone();
                }
            }
            return true;
        }

        let Some(parent) = self.watches.get(&event.wd).cloned() else {
            self.ctx.report(MonitorError::UnknownDescriptor {
                wd: format!("{:?}", event.wd),
            });
            return true;
        };

        if mask.contains(EventMask::DELETE_SELF) {
            // The descriptor is about to be removed implicitly (IGNORED
            // follows); nothing to emit.
            if parent == self.ctx.dir {
                return self.fatal_root_gone();
            }
            return true;
        }

        // Whatever happened, it happened *inside* `parent`; that is the
        // directory named by the public event.
        self.ctx.emit(&parent);

        if mask.contains(EventMask::ISDIR) {
            let subject = match &event.name {
                Some(name) => parent.join(name),
                None => parent.clone(),
            };

            if mask.contains(EventMask::CREATE) {
                self.cascade(&subject);
            } else if mask.contains(EventMask::MOVED_FROM) {
                self.begin_move(event.cookie, &subject);
            } else if mask.contains(EventMask::MOVED_TO) {
                self.complete_move(event.cookie, &subject);
            } else if mask.contains(EventMask::DELETE) {
                self.forget_watch_at(&subject);
            }
        }

        true
    }

    /// Reproduce recursive semantics for a directory that just appeared:
    /// walk it, watch every nested directory the selector accepts, and
    /// synthesize an event for every directory that already has contents,
    /// since files may have landed there before any watch existed.
    fn cascade(&mut self, top: &Path) {
        for entry in WalkDir::new(top).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    self.ctx.report(MonitorError::Walk {
                        path: top.to_path_buf(),
                        source: io::Error::from(err),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let path = entry.into_path();
            if dir_has_children(&path) {
                self.ctx.emit(&path);
            }
            self.add_watch(&path);
        }

        // The top directory last, so nested watches are in place first.
        self.add_watch(top);
        if dir_has_children(top) {
            self.ctx.emit(top);
        }
    }

    fn add_watch(&mut self, path: &Path) {
        let clean = normalized(path);
        if !self.ctx.is_selected(&clean) {
            return;
        }

        match self.inotify.watches().add(&clean, watch_mask()) {
            Ok(wd) => {
                trace!(dir = %clean.display(), "watch added");
                self.watches.insert(wd, clean);
            }
            // Gone again already; its parent watch reported the removal.
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => self.ctx.report(err.into()),
        }
    }

    /// First half of a rename. The directory may be leaving the watched
    /// scope entirely, so its descriptor is removed from the table up
    /// front; the matching moved-to half reinstates it.
    fn begin_move(&mut self, cookie: u32, subject: &Path) {
        let Some(wd) = self.wd_for(subject) else {
            trace!(dir = %subject.display(), "moved directory was not watched");
            return;
        };

        self.watches.remove(&wd);
        self.pending_moves.insert(
            cookie,
            MoveTransaction {
                wd,
                from: subject.to_path_buf(),
            },
        );
    }

    fn complete_move(&mut self, cookie: u32, subject: &Path) {
        match self.pending_moves.remove(&cookie) {
            Some(transaction) => {
                let subject = normalized(subject);
                trace!(
                    from = %transaction.from.display(),
                    to = %subject.display(),
                    "move completed"
                );
                self.watches.insert(transaction.wd, subject.clone());
                self.rebase_descendants(&transaction.from, &subject);
            }
            None => {
                // No matching half: the directory came from outside the
                // watched scope. The parent event already went out; adopt
                // the arriving subtree as if it were newly created, and
                // flag the bookkeeping gap.
                self.ctx.report(MonitorError::OrphanMoveCookie {
                    cookie,
                    path: subject.to_path_buf(),
                });
                self.cascade(subject);
            }
        }
    }

    /// Rewrite table paths of watched directories below a renamed one.
    fn rebase_descendants(&mut self, from: &Path, to: &Path) {
        for path in self.watches.values_mut() {
            let Some(suffix) = path
                .strip_prefix(from)
                .ok()
                .filter(|suffix| !suffix.as_os_str().is_empty())
                .map(Path::to_path_buf)
            else {
                continue;
            };
            *path = to.join(suffix);
        }
    }

    /// Bookkeeping for an explicit directory deletion: the kernel removes
    /// the watch itself, this only drops the table entry.
    fn forget_watch_at(&mut self, subject: &Path) {
        if let Some(wd) = self.wd_for(subject) {
            self.watches.remove(&wd);
        }
    }

    fn wd_for(&self, path: &Path) -> Option<WatchDescriptor> {
        self.watches
            .iter()
            .find(|(_, watched)| watched.as_path() == path)
            .map(|(wd, _)| wd.clone())
    }

    /// Moved-from halves with no moved-to by the end of the read cycle:
    /// the directory left the watched scope, so drop its kernel watch too.
    fn abandon_pending_moves(&mut self) {
        for (cookie, transaction) in self.pending_moves.drain() {
            trace!(
                cookie,
                from = %transaction.from.display(),
                "abandoning move transaction"
            );
            let _ = self.inotify.watches().remove(transaction.wd);
        }
    }

    fn fatal_root_gone(&mut self) -> bool {
        warn!(dir = %self.ctx.dir.display(), "watched root disappeared; stopping");
        self.ctx.mark_stopped();
        false
    }
}

fn dir_has_children(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
