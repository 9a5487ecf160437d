//! Windows adapter: ReadDirectoryChangesW over an I/O completion port.
//!
//! The notification API is recursive (`bWatchSubtree`), so no watch tree
//! is needed; but records arrive at file granularity, so every record is
//! reduced to its containing directory before it is forwarded. One
//! overlapped read is outstanding at a time and is re-armed after each
//! completion. Stop signalling posts a dedicated completion key, which
//! preempts the blocking dequeue without timeout polling.

use std::ffi::OsString;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::ffi::OsStringExt;
use std::path::Path;
use std::path::PathBuf;
use std::ptr;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::trace;
use tracing::warn;
use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::Foundation::ERROR_ACCESS_DENIED;
use windows_sys::Win32::Foundation::ERROR_MORE_DATA;
use windows_sys::Win32::Foundation::ERROR_OPERATION_ABORTED;
use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE;
use windows_sys::Win32::Storage::FileSystem::CreateFileW;
use windows_sys::Win32::Storage::FileSystem::FILE_FLAG_BACKUP_SEMANTICS;
use windows_sys::Win32::Storage::FileSystem::FILE_FLAG_OVERLAPPED;
use windows_sys::Win32::Storage::FileSystem::FILE_LIST_DIRECTORY;
use windows_sys::Win32::Storage::FileSystem::FILE_NOTIFY_CHANGE_DIR_NAME;
use windows_sys::Win32::Storage::FileSystem::FILE_NOTIFY_CHANGE_FILE_NAME;
use windows_sys::Win32::Storage::FileSystem::FILE_NOTIFY_CHANGE_SIZE;
use windows_sys::Win32::Storage::FileSystem::FILE_NOTIFY_INFORMATION;
use windows_sys::Win32::Storage::FileSystem::FILE_SHARE_DELETE;
use windows_sys::Win32::Storage::FileSystem::FILE_SHARE_READ;
use windows_sys::Win32::Storage::FileSystem::FILE_SHARE_WRITE;
use windows_sys::Win32::Storage::FileSystem::OPEN_EXISTING;
use windows_sys::Win32::Storage::FileSystem::ReadDirectoryChangesW;
use windows_sys::Win32::System::IO::CreateIoCompletionPort;
use windows_sys::Win32::System::IO::GetQueuedCompletionStatus;
use windows_sys::Win32::System::IO::OVERLAPPED;
use windows_sys::Win32::System::IO::PostQueuedCompletionStatus;
use windows_sys::Win32::System::Threading::INFINITE;

use crate::error::MonitorError;
use crate::event::DirEvent;
use crate::monitor::AdapterCtx;
use crate::monitor::Monitor;
use crate::monitor::MonitorCore;
use crate::selector::Selector;

/// Completion key of the directory read.
const DIR_KEY: usize = 0;
/// Completion key posted by `stop`.
const STOP_KEY: usize = 1;

/// Buffer for one completion, in u32 words so the FILE_NOTIFY_INFORMATION
/// records are DWORD-aligned.
const BUFFER_WORDS: usize = 16 * 1024 / 4;

const NOTIFY_FILTER: u32 =
    FILE_NOTIFY_CHANGE_FILE_NAME | FILE_NOTIFY_CHANGE_DIR_NAME | FILE_NOTIFY_CHANGE_SIZE;

/// Monitor backed by ReadDirectoryChangesW and a completion port.
pub struct WindowsMonitor {
    core: MonitorCore,
    port: Option<HANDLE>,
    event_loop: Option<JoinHandle<()>>,
}

impl WindowsMonitor {
    pub(crate) fn create(
        root: PathBuf,
        selector: Selector,
        latency: Duration,
    ) -> Result<Self, MonitorError> {
        Ok(Self {
            core: MonitorCore::new(root, selector, latency)?,
            port: None,
            event_loop: None,
        })
    }

    fn shutdown(&mut self) {
        if let Some(port) = self.port.take() {
            // Wake the dequeue; the loop closes the handles itself.
            let ok = unsafe { PostQueuedCompletionStatus(port, 0, STOP_KEY, ptr::null()) };
            if ok == 0 {
                trace!("stop post failed; event loop has likely exited already");
            }
        }
        if let Some(handle) = self.event_loop.take() {
            if handle.join().is_err() {
                warn!("completion-port event loop panicked");
            }
        }
        self.core.join_throttle();
    }
}

impl Monitor for WindowsMonitor {
    fn start(&mut self) -> Result<Receiver<DirEvent>, MonitorError> {
        let ctx = self.core.begin_start()?;

        let event_loop = match EventLoop::new(ctx) {
            Ok(event_loop) => event_loop,
            Err(err) => {
                self.core.abort_start();
                return Err(err);
            }
        };

        self.port = Some(event_loop.port);
        match thread::Builder::new()
            .name("dirwatch-iocp".to_string())
            .spawn(move || event_loop.run())
        {
            Ok(handle) => self.event_loop = Some(handle),
            Err(err) => {
                self.port = None;
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

impl Drop for WindowsMonitor {
    fn drop(&mut self) {
        let _ = self.core.request_stop();
        self.shutdown();
    }
}

/// The loop's kernel state. Boxed before the first read is armed so the
/// buffer and overlapped structure keep a stable address, and moved into
/// the loop thread, which alone closes the handles.
struct EventLoop {
    ctx: AdapterCtx,
    dir_handle: HANDLE,
    port: HANDLE,
    buffer: [u32; BUFFER_WORDS],
    overlapped: OVERLAPPED,
}

impl EventLoop {
    fn new(ctx: AdapterCtx) -> Result<Box<Self>, MonitorError> {
        let mut encoded: Vec<u16> = ctx.dir.as_os_str().encode_wide().collect();
        encoded.push(0);

        let dir_handle = unsafe {
            CreateFileW(
                encoded.as_ptr(),
                FILE_LIST_DIRECTORY,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                ptr::null(),
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
                0,
            )
        };
        if dir_handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error().into());
        }

        let port = unsafe { CreateIoCompletionPort(dir_handle, 0, DIR_KEY, 0) };
        if port == 0 {
            let err = io::Error::last_os_error();
            unsafe { CloseHandle(dir_handle) };
            return Err(err.into());
        }

        let mut event_loop = Box::new(Self {
            ctx,
            dir_handle,
            port,
            buffer: [0; BUFFER_WORDS],
            overlapped: unsafe { std::mem::zeroed() },
        });

        if let Err(err) = event_loop.arm() {
            event_loop.close_handles();
            return Err(err);
        }

        Ok(event_loop)
    }

    /// Post the overlapped directory read.
    fn arm(&mut self) -> Result<(), MonitorError> {
        let ok = unsafe {
            ReadDirectoryChangesW(
                self.dir_handle,
                self.buffer.as_mut_ptr().cast(),
                (BUFFER_WORDS * 4) as u32,
                1,
                NOTIFY_FILTER,
                ptr::null_mut(),
                &mut self.overlapped,
                None,
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn run(mut self: Box<Self>) {
        trace!(
            dir = %self.ctx.dir.display(),
            latency = ?self.ctx.latency,
            "completion-port event loop running"
        );

        loop {
            let mut bytes: u32 = 0;
            let mut key: usize = 0;
            let mut overlapped: *mut OVERLAPPED = ptr::null_mut();

            let ok = unsafe {
                GetQueuedCompletionStatus(
                    self.port,
                    &mut bytes,
                    &mut key,
                    &mut overlapped,
                    INFINITE,
                )
            };

            if key == STOP_KEY {
                break;
            }

            if ok != 0 {
                if bytes == 0 {
                    // Kernel-side buffer overflow: the records were
                    // dropped wholesale. Signal the root conservatively.
                    self.ctx.emit(&self.ctx.dir);
                } else {
                    self.parse_records(bytes as usize);
                }

                if !self.ctx.is_running() {
                    break;
                }
                if let Err(err) = self.arm() {
                    self.ctx.report(err);
                    self.ctx.mark_stopped();
                    break;
                }
                continue;
            }

            if overlapped.is_null() {
                // The dequeue itself failed; the port is unusable.
                self.ctx.report(io::Error::last_os_error().into());
                self.ctx.mark_stopped();
                break;
            }

            match unsafe { GetLastError() } {
                ERROR_MORE_DATA => {
                    // Buffer capacity exceeded; the remaining records for
                    // this completion are lost. Signal the root and move
                    // on.
                    self.ctx.emit(&self.ctx.dir);
                    if !self.ctx.is_running() {
                        break;
                    }
                    if let Err(err) = self.arm() {
                        self.ctx.report(err);
                        self.ctx.mark_stopped();
                        break;
                    }
                }
                ERROR_ACCESS_DENIED => {
                    // The watched root is gone or no longer accessible.
                    warn!(
                        dir = %self.ctx.dir.display(),
                        "watched root inaccessible; stopping"
                    );
                    self.ctx.mark_stopped();
                    break;
                }
                ERROR_OPERATION_ABORTED => {
                    // Expected while tearing down.
                    if !self.ctx.is_running() {
                        break;
                    }
                }
                code => {
                    self.ctx
                        .report(io::Error::from_raw_os_error(code as i32).into());
                    if !self.ctx.is_running() {
                        break;
                    }
                    if let Err(err) = self.arm() {
                        self.ctx.report(err);
                        self.ctx.mark_stopped();
                        break;
                    }
                }
            }
        }

        self.close_handles();
    }

    /// Walk the FILE_NOTIFY_INFORMATION records in the completion buffer,
    /// reduce each to its containing directory, and emit. Records that
    /// would run past the populated region are dropped.
    fn parse_records(&self, populated: usize) {
        let base = self.buffer.as_ptr().cast::<u8>();
        let header = std::mem::offset_of!(FILE_NOTIFY_INFORMATION, FileName);
        let mut offset = 0usize;

        loop {
            if offset + header > populated {
                break;
            }

            let record = unsafe { &*base.add(offset).cast::<FILE_NOTIFY_INFORMATION>() };
            let name_len = record.FileNameLength as usize;
            if offset + header + name_len > populated {
                break;
            }

            let name = unsafe {
                std::slice::from_raw_parts(base.add(offset + header).cast::<u16>(), name_len / 2)
            };
            let full = self.ctx.dir.join(PathBuf::from(OsString::from_wide(name)));
            let parent = full.parent().unwrap_or(&self.ctx.dir);
            trace!(path = %full.display(), action = record.Action, "change record");
            self.ctx.emit(parent);

            if record.NextEntryOffset == 0 {
                break;
            }
            offset += record.NextEntryOffset as usize;
        }
    }

    fn close_handles(&mut self) {
        unsafe {
            CloseHandle(self.dir_handle);
            // Closing the directory handle aborts the outstanding read;
            // reap its completion so the kernel is done with the buffer
            // before it is freed.
            let mut bytes: u32 = 0;
            let mut key: usize = 0;
            let mut overlapped: *mut OVERLAPPED = ptr::null_mut();
            GetQueuedCompletionStatus(self.port, &mut bytes, &mut key, &mut overlapped, 100);
            CloseHandle(self.port);
        }
    }
}
