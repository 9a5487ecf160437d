//! macOS adapter: a native FSEvents stream.
//!
//! FSEvents is recursive and directory-granular out of the box: without
//! the file-events creation flag, each delivered path names a directory
//! whose contents should be rescanned, which is exactly the shape of our
//! public events. The adapter only normalizes paths, applies the
//! selector, and watches for the root-changed flag.

use std::ffi::CStr;
use std::os::raw::c_void;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::path::PathBuf;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use bitflags::bitflags;
use crossbeam_channel::Receiver;
use fsevent_sys as fs;
use fsevent_sys::core_foundation as cf;
use tracing::trace;
use tracing::warn;

use crate::error::MonitorError;
use crate::event::DirEvent;
use crate::monitor::AdapterCtx;
use crate::monitor::Monitor;
use crate::monitor::MonitorCore;
use crate::selector::Selector;

bitflags! {
    /// The subset of FSEvents stream flags the adapter reacts to or logs.
    #[repr(C)]
    #[derive(Debug, Clone, Copy)]
    struct StreamFlags: u32 {
        const MUST_SCAN_SUBDIRS = fs::kFSEventStreamEventFlagMustScanSubDirs;
        const USER_DROPPED = fs::kFSEventStreamEventFlagUserDropped;
        const KERNEL_DROPPED = fs::kFSEventStreamEventFlagKernelDropped;
        const ROOT_CHANGED = fs::kFSEventStreamEventFlagRootChanged;
        const UNMOUNT = fs::kFSEventStreamEventFlagUnmount;
    }
}

// CoreFoundation false value.
const FALSE: cf::Boolean = 0x0;

unsafe extern "C" {
    /// Whether the run loop is currently waiting for an event.
    fn CFRunLoopIsWaiting(runloop: cf::CFRunLoopRef) -> cf::Boolean;
}

/// CFRef types may be moved across threads.
/// https://developer.apple.com/library/archive/documentation/Cocoa/Conceptual/Multithreading/ThreadSafetySummary/ThreadSafetySummary.html
struct CFSendWrapper(cf::CFRef);

unsafe impl Send for CFSendWrapper {}

/// Monitor backed by an FSEvents stream on a dedicated run-loop thread.
pub struct MacosMonitor {
    core: MonitorCore,
    stream: Option<StreamHandle>,
}

// Safety: the run-loop pointer is only ever used to stop the loop, which
// is documented as safe from any thread.
unsafe impl Send for MacosMonitor {}

struct StreamHandle {
    runloop: cf::CFRunLoopRef,
    thread: JoinHandle<()>,
}

/// Owned by the stream; freed by `release_context` when the stream is
/// released. Holds the adapter context, so releasing the stream also
/// closes the unthrottled channel.
struct StreamContext {
    ctx: AdapterCtx,
}

impl MacosMonitor {
    pub(crate) fn create(
        root: PathBuf,
        selector: Selector,
        latency: Duration,
    ) -> Result<Self, MonitorError> {
        Ok(Self {
            core: MonitorCore::new(root, selector, latency)?,
            stream: None,
        })
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.stream.take() {
            unsafe {
                // Let the loop reach its waiting state before stopping it,
                // otherwise the stop request can be lost.
                while CFRunLoopIsWaiting(handle.runloop) == FALSE {
                    thread::yield_now();
                }
                cf::CFRunLoopStop(handle.runloop);
            }
            if handle.thread.join().is_err() {
                warn!("fsevents run-loop thread panicked");
            }
        }
        self.core.join_throttle();
    }
}

impl Monitor for MacosMonitor {
    fn start(&mut self) -> Result<Receiver<DirEvent>, MonitorError> {
        let ctx = self.core.begin_start()?;
        let latency = ctx.latency.as_secs_f64();

        let paths = match cf_paths_for(self.core.dir()) {
            Ok(paths) => paths,
            Err(err) => {
                drop(ctx);
                self.core.abort_start();
                return Err(err);
            }
        };

        // The stream owns the context; `release_context` frees it when the
        // stream is released on the run-loop thread.
        let info = Box::into_raw(Box::new(StreamContext { ctx }));
        let stream_context = fs::FSEventStreamContext {
            version: 0,
            info: info as *mut c_void,
            retain: None,
            release: Some(release_context),
            copy_description: None,
        };

        let stream = unsafe {
            fs::FSEventStreamCreate(
                cf::kCFAllocatorDefault,
                callback,
                &stream_context,
                paths,
                fs::kFSEventStreamEventIdSinceNow,
                latency,
                fs::kFSEventStreamCreateFlagWatchRoot | fs::kFSEventStreamCreateFlagNoDefer,
            )
        };
        unsafe { cf::CFRelease(paths as cf::CFRef) };

        if stream.is_null() {
            // Creation failed before the stream took ownership of the
            // context; reclaim it so the channels close.
            drop(unsafe { Box::from_raw(info) });
            self.core.abort_start();
            return Err(MonitorError::Io(std::io::Error::other(
                "FSEventStreamCreate failed",
            )));
        }

        let stream = CFSendWrapper(stream as cf::CFRef);
        let (runloop_tx, runloop_rx) = crossbeam_channel::bounded(1);

        let spawned = thread::Builder::new()
            .name("dirwatch-fsevents".to_string())
            .spawn(move || {
                let stream = stream.0 as fs::FSEventStreamRef;
                unsafe {
                    let runloop = cf::CFRunLoopGetCurrent();
                    fs::FSEventStreamScheduleWithRunLoop(
                        stream,
                        runloop,
                        cf::kCFRunLoopDefaultMode,
                    );

                    if fs::FSEventStreamStart(stream) == FALSE {
                        fs::FSEventStreamInvalidate(stream);
                        fs::FSEventStreamRelease(stream);
                        let _ = runloop_tx.send(Err(MonitorError::Io(
                            std::io::Error::other("FSEventStreamStart failed"),
                        )));
                        return;
                    }

                    let _ = runloop_tx.send(Ok(CFSendWrapper(runloop as cf::CFRef)));
                    cf::CFRunLoopRun();

                    fs::FSEventStreamStop(stream);
                    fs::FSEventStreamInvalidate(stream);
                    fs::FSEventStreamRelease(stream);
                }
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                self.core.abort_start();
                return Err(err.into());
            }
        };

        match runloop_rx.recv() {
            Ok(Ok(runloop)) => {
                self.stream = Some(StreamHandle {
                    runloop: runloop.0 as cf::CFRunLoopRef,
                    thread,
                });
                Ok(self.core.events())
            }
            Ok(Err(err)) => {
                if thread.join().is_err() {
                    warn!("fsevents run-loop thread panicked during startup");
                }
                self.core.abort_start();
                Err(err)
            }
            Err(_) => {
                if thread.join().is_err() {
                    warn!("fsevents run-loop thread panicked during startup");
                }
                self.core.abort_start();
                Err(MonitorError::Io(std::io::Error::other(
                    "fsevents stream failed to start",
                )))
            }
        }
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

impl Drop for MacosMonitor {
    fn drop(&mut self) {
        let _ = self.core.request_stop();
        self.shutdown();
    }
}

/// Build the single-entry CFArray of watched paths.
fn cf_paths_for(root: &Path) -> Result<cf::CFMutableArrayRef, MonitorError> {
    let str_path = root.to_str().ok_or_else(|| {
        MonitorError::Io(std::io::Error::other("watch root is not valid UTF-8"))
    })?;

    unsafe {
        let paths =
            cf::CFArrayCreateMutable(cf::kCFAllocatorDefault, 0, &cf::kCFTypeArrayCallBacks);
        let mut err: cf::CFErrorRef = std::ptr::null_mut();
        let cf_path = cf::str_path_to_cfstring_ref(str_path, &mut err);
        if cf_path.is_null() {
            if !err.is_null() {
                cf::CFRelease(err as cf::CFRef);
            }
            cf::CFRelease(paths as cf::CFRef);
            return Err(MonitorError::Io(std::io::Error::other(
                "failed to convert watch root to CFString",
            )));
        }
        cf::CFArrayAppendValue(paths, cf_path);
        cf::CFRelease(cf_path);
        Ok(paths)
    }
}

// Free the context when the stream created by `FSEventStreamCreate` is
// released; per the FSEventStreamContext documentation this runs exactly
// once, at stream deallocation.
extern "C" fn release_context(info: *const c_void) {
    unsafe {
        drop(Box::from_raw(
            info as *const StreamContext as *mut StreamContext,
        ));
    }
}

/// The FSEvents delivery callback. Must not panic: unwinding across the
/// FFI boundary is undefined behavior, so every fallible step skips the
/// event instead.
extern "C" fn callback(
    _stream_ref: fs::FSEventStreamRef,
    info: *mut c_void,
    num_events: libc::size_t,
    event_paths: *mut c_void,
    event_flags: *const fs::FSEventStreamEventFlags,
    _event_ids: *const fs::FSEventStreamEventId,
) {
    let context = unsafe { &*(info as *const StreamContext) };
    if !context.ctx.is_running() {
        // Deliveries racing a teardown are dropped.
        return;
    }
    let paths = event_paths as *const *const libc::c_char;

    for i in 0..num_events {
        let bytes = unsafe { CStr::from_ptr(*paths.add(i)) }.to_bytes();
        let path = PathBuf::from(std::ffi::OsStr::from_bytes(bytes));
        let flags = StreamFlags::from_bits_truncate(unsafe { *event_flags.add(i) });

        trace!(dir = %path.display(), ?flags, "fsevents delivery");
        context.ctx.emit(&path);

        if flags.contains(StreamFlags::ROOT_CHANGED) {
            // The watched root was deleted or moved; nothing sensible
            // remains to watch.
            warn!(dir = %context.ctx.dir.display(), "watched root changed; stopping");
            context.ctx.mark_stopped();
            unsafe { cf::CFRunLoopStop(cf::CFRunLoopGetCurrent()) };
            return;
        }
    }
}
