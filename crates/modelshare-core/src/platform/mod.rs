//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific storage locations live here so the
//! rest of the crate works with plain paths.

pub mod paths;

pub use paths::{backup_path, candidate_roots, central_store_default, PathResolver};

/// Returns the current platform name.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}
