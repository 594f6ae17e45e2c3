//! Filesystem access behind a narrow backend trait.
//!
//! Detection, import and storage configuration only touch the disk through
//! [`StorageBackend`], so each algorithm can run against [`MemoryStorage`] in
//! tests or [`LocalStorage`] in production.
//!
//! The trait is synchronous: callers in async code move work onto the
//! blocking pool with `tokio::task::spawn_blocking`.

mod atomic;
mod local;
mod memory;

pub use atomic::{atomic_read_json, atomic_write};
pub use local::LocalStorage;
pub use memory::MemoryStorage;

use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};

/// Type of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

/// Metadata for a single entry.
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    pub kind: EntryKind,
    /// Size in bytes (0 for directories).
    pub len: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl EntryMetadata {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }
}

/// A directory listing entry. `kind` does not follow symlinks.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub path: PathBuf,
    pub name: String,
    pub kind: EntryKind,
}

/// Callback invoked with every chunk during a streaming copy.
///
/// Returning `false` aborts the copy with [`io::ErrorKind::Interrupted`].
pub type ChunkCallback<'a> = dyn FnMut(&[u8]) -> bool + 'a;

/// Filesystem operations used by the storage subsystem.
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Metadata following symlinks.
    fn metadata(&self, path: &Path) -> io::Result<EntryMetadata>;

    /// Metadata of the entry itself; symlinks report [`EntryKind::Symlink`].
    fn symlink_metadata(&self, path: &Path) -> io::Result<EntryMetadata>;

    /// List the direct children of a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Recursively collect every non-directory entry under `root`.
    ///
    /// The root is followed if it is a symlink; symlinked subdirectories are
    /// reported as entries but never descended into. A directory is only
    /// entered when `descend` returns true for its path. Unreadable
    /// subdirectories are skipped; only a failure on `root` is returned.
    fn walk_files(&self, root: &Path, descend: &dyn Fn(&Path) -> bool) -> io::Result<Vec<DirEntry>>;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Replace `path` with `contents` so readers never observe a partial
    /// file. Missing parent directories are created.
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Stream `src` into `dst` (created or truncated), returning bytes copied.
    fn copy_file(&self, src: &Path, dst: &Path, on_chunk: &mut ChunkCallback<'_>) -> io::Result<u64>;

    /// Create a symlink at `link` pointing to `target`.
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Move the file `from` to `to` without replacing anything already at
    /// `to`; an occupied destination fails with [`io::ErrorKind::AlreadyExists`].
    fn rename_no_replace(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove a file or a symlink (never follows the link).
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool {
        self.metadata(path).is_ok()
    }

    /// True if something (including a dangling symlink) occupies `path`.
    fn entry_exists(&self, path: &Path) -> bool {
        self.symlink_metadata(path).is_ok()
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.metadata(path), Ok(m) if m.is_dir())
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.metadata(path), Ok(m) if m.is_file())
    }

    fn is_symlink(&self, path: &Path) -> bool {
        matches!(self.symlink_metadata(path), Ok(m) if m.is_symlink())
    }
}

/// Error returned when a copy callback asks to stop.
pub fn copy_aborted() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "copy aborted by caller")
}

/// Lexically normalize a path, resolving `.` and `..` without touching disk.
pub fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
