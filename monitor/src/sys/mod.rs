//! Per-platform kernel-event adapters.
//!
//! Each adapter translates one native file-notification API into the
//! uniform directory-granular event stream, reproducing recursive
//! semantics where the kernel does not provide them (Linux, Windows).

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::LinuxMonitor;
#[cfg(target_os = "linux")]
pub type PlatformMonitor = LinuxMonitor;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::MacosMonitor;
#[cfg(target_os = "macos")]
pub type PlatformMonitor = MacosMonitor;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::WindowsMonitor;
#[cfg(windows)]
pub type PlatformMonitor = WindowsMonitor;

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
compile_error!(
    "unsupported platform: dirwatch needs inotify, FSEvents, or ReadDirectoryChangesW"
);
