//! Recursive directory watching with coalesced, directory-granular
//! change notifications.
//!
//! A monitor watches one rooted subtree of a local filesystem and emits a
//! [`DirEvent`] naming each directory whose contents (or whose own
//! existence) changed. File-level detail is deliberately collapsed to the
//! containing directory; a per-directory throttle guarantees at most one
//! event per directory within a configurable latency window.
//!
//! Each platform gets its own kernel-event adapter (inotify + epoll on
//! Linux, FSEvents on macOS, ReadDirectoryChangesW over an I/O completion
//! port on Windows) behind the shared [`Monitor`] trait, with
//! [`PlatformMonitor`] selecting the right one at build time.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use dirwatch_monitor::Monitor;
//! use dirwatch_monitor::MonitorBuilder;
//!
//! # fn main() -> Result<(), dirwatch_monitor::MonitorError> {
//! let mut monitor = MonitorBuilder::new("/some/project")
//!     .latency(Duration::from_millis(50))
//!     .build()?;
//!
//! let events = monitor.start()?;
//! for ev in events.iter() {
//!     println!("something changed in {}", ev.dir().display());
//! }
//!
//! monitor.stop()?;
//! # Ok(())
//! # }
//! ```

mod error;
mod event;
mod monitor;
pub mod selector;
mod sys;
mod throttle;

pub use error::MonitorError;
pub use event::DirEvent;
pub use monitor::DEFAULT_LATENCY;
pub use monitor::Monitor;
pub use monitor::MonitorBuilder;
pub use selector::Selector;
pub use sys::PlatformMonitor;

#[cfg(target_os = "linux")]
pub use sys::LinuxMonitor;
#[cfg(target_os = "macos")]
pub use sys::MacosMonitor;
#[cfg(windows)]
pub use sys::WindowsMonitor;
