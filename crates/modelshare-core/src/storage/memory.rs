//! In-memory backend with symlink support, used by tests.

use super::{
    copy_aborted, normalize_path, ChunkCallback, DirEntry, EntryKind, EntryMetadata,
    StorageBackend,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const MAX_LINK_DEPTH: usize = 40;
const CHUNK_SIZE: usize = 64 * 1024;

static ROOT_DIR: Node = Node::Dir;

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File {
        data: Vec<u8>,
        modified: DateTime<Utc>,
    },
    Symlink(PathBuf),
}

impl Node {
    fn kind(&self) -> EntryKind {
        match self {
            Node::Dir => EntryKind::Dir,
            Node::File { .. } => EntryKind::File,
            Node::Symlink(_) => EntryKind::Symlink,
        }
    }

    fn metadata(&self) -> EntryMetadata {
        match self {
            Node::Dir => EntryMetadata {
                kind: EntryKind::Dir,
                len: 0,
                modified: None,
            },
            Node::File { data, modified } => EntryMetadata {
                kind: EntryKind::File,
                len: data.len() as u64,
                modified: Some(*modified),
            },
            Node::Symlink(target) => EntryMetadata {
                kind: EntryKind::Symlink,
                len: target.as_os_str().len() as u64,
                modified: None,
            },
        }
    }
}

/// [`StorageBackend`] kept entirely in memory.
///
/// Paths must be absolute. Symlinks are resolved component by component, so
/// links to directories behave like they do on disk.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    nodes: Mutex<BTreeMap<PathBuf, Node>>,
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file or directory", path.display()),
    )
}

fn already_exists(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("{}: already exists", path.display()),
    )
}

fn invalid(path: &Path, what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{}: {}", path.display(), what),
    )
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a file (and its parent directories) with the given contents.
    pub fn add_file(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            let _ = self.create_dir_all(parent);
        }
        let _ = self.write_atomic(path, &contents.into());
    }

    /// Create a directory and its parents.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let _ = self.create_dir_all(path.as_ref());
    }

    /// Raw bytes of a file, following symlinks.
    pub fn file_bytes(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let nodes = self.lock();
        let resolved = Self::resolve(&nodes, path.as_ref(), true).ok()?;
        match nodes.get(&resolved) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PathBuf, Node>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_root(path: &Path) -> bool {
        path.parent().is_none()
    }

    fn node_at<'a>(nodes: &'a BTreeMap<PathBuf, Node>, path: &Path) -> Option<&'a Node> {
        if Self::is_root(path) {
            return Some(&ROOT_DIR);
        }
        nodes.get(path)
    }

    /// Resolve symlinks in every component; the last one only when
    /// `follow_last` is set.
    fn resolve(nodes: &BTreeMap<PathBuf, Node>, path: &Path, follow_last: bool) -> io::Result<PathBuf> {
        Self::resolve_depth(nodes, path, follow_last, 0)
    }

    fn resolve_depth(
        nodes: &BTreeMap<PathBuf, Node>,
        path: &Path,
        follow_last: bool,
        depth: usize,
    ) -> io::Result<PathBuf> {
        if depth > MAX_LINK_DEPTH {
            return Err(invalid(path, "too many levels of symbolic links"));
        }

        let path = normalize_path(path);
        let components: Vec<Component> = path.components().collect();
        let mut current = PathBuf::new();

        for (i, component) in components.iter().enumerate() {
            let is_last = i + 1 == components.len();
            match component {
                Component::Normal(name) => {
                    let candidate = current.join(name);
                    match nodes.get(&candidate) {
                        Some(Node::Symlink(target)) if !is_last || follow_last => {
                            let joined = if target.is_absolute() {
                                target.clone()
                            } else {
                                current.join(target)
                            };
                            current = Self::resolve_depth(nodes, &joined, true, depth + 1)?;
                        }
                        _ => current = candidate,
                    }
                }
                other => current.push(other.as_os_str()),
            }
        }
        Ok(current)
    }

    fn require_parent_dir(nodes: &BTreeMap<PathBuf, Node>, resolved: &Path) -> io::Result<()> {
        match resolved.parent() {
            Some(parent) => match Self::node_at(nodes, parent) {
                Some(Node::Dir) => Ok(()),
                Some(_) => Err(invalid(parent, "not a directory")),
                None => Err(not_found(parent)),
            },
            None => Err(invalid(resolved, "cannot modify root")),
        }
    }

    fn children(nodes: &BTreeMap<PathBuf, Node>, dir: &Path) -> Vec<(PathBuf, Node)> {
        nodes
            .range(dir.to_path_buf()..)
            .skip_while(|(k, _)| k.as_path() == dir)
            .take_while(|(k, _)| k.starts_with(dir))
            .filter(|(k, _)| k.parent() == Some(dir))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn walk_inner(
        nodes: &BTreeMap<PathBuf, Node>,
        logical: &Path,
        resolved: &Path,
        descend: &dyn Fn(&Path) -> bool,
        out: &mut Vec<DirEntry>,
    ) {
        for (child, node) in Self::children(nodes, resolved) {
            let name = child
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let logical_child = logical.join(&name);
            match node {
                Node::Dir => {
                    if descend(&logical_child) {
                        Self::walk_inner(nodes, &logical_child, &child, descend, out);
                    }
                }
                other => out.push(DirEntry {
                    path: logical_child,
                    name,
                    kind: other.kind(),
                }),
            }
        }
    }
}

impl StorageBackend for MemoryStorage {
    fn metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
        let nodes = self.lock();
        let resolved = Self::resolve(&nodes, path, true)?;
        Self::node_at(&nodes, &resolved)
            .map(Node::metadata)
            .ok_or_else(|| not_found(path))
    }

    fn symlink_metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
        let nodes = self.lock();
        let resolved = Self::resolve(&nodes, path, false)?;
        Self::node_at(&nodes, &resolved)
            .map(Node::metadata)
            .ok_or_else(|| not_found(path))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let nodes = self.lock();
        let resolved = Self::resolve(&nodes, path, true)?;
        match Self::node_at(&nodes, &resolved) {
            Some(Node::Dir) => {}
            Some(_) => return Err(invalid(path, "not a directory")),
            None => return Err(not_found(path)),
        }

        Ok(Self::children(&nodes, &resolved)
            .into_iter()
            .map(|(child, node)| {
                let name = child
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                DirEntry {
                    path: path.join(&name),
                    name,
                    kind: node.kind(),
                }
            })
            .collect())
    }

    fn walk_files(&self, root: &Path, descend: &dyn Fn(&Path) -> bool) -> io::Result<Vec<DirEntry>> {
        let nodes = self.lock();
        let resolved = Self::resolve(&nodes, root, true)?;
        match Self::node_at(&nodes, &resolved) {
            Some(Node::Dir) => {}
            Some(_) => return Err(invalid(root, "not a directory")),
            None => return Err(not_found(root)),
        }

        let mut out = Vec::new();
        Self::walk_inner(&nodes, root, &resolved, descend, &mut out);
        Ok(out)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let nodes = self.lock();
        let resolved = Self::resolve(&nodes, path, true)?;
        match Self::node_at(&nodes, &resolved) {
            Some(Node::File { data, .. }) => String::from_utf8(data.clone())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Some(_) => Err(invalid(path, "is a directory")),
            None => Err(not_found(path)),
        }
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }
        let mut nodes = self.lock();
        let resolved = Self::resolve(&nodes, path, false)?;
        if matches!(nodes.get(&resolved), Some(Node::Dir)) {
            return Err(invalid(path, "is a directory"));
        }
        nodes.insert(
            resolved,
            Node::File {
                data: contents.to_vec(),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        let nodes = self.lock();
        let resolved = Self::resolve(&nodes, path, false)?;
        match nodes.get(&resolved) {
            Some(Node::Symlink(target)) => Ok(target.clone()),
            Some(_) => Err(invalid(path, "not a symbolic link")),
            None => Err(not_found(path)),
        }
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let nodes = self.lock();
        let resolved = Self::resolve(&nodes, path, true)?;
        if Self::node_at(&nodes, &resolved).is_some() {
            Ok(resolved)
        } else {
            Err(not_found(path))
        }
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        let normalized = normalize_path(path);
        let mut prefix = PathBuf::new();

        for component in normalized.components() {
            prefix.push(component.as_os_str());
            if Self::is_root(&prefix) {
                continue;
            }
            let resolved = Self::resolve(&nodes, &prefix, true)?;
            match Self::node_at(&nodes, &resolved) {
                Some(Node::Dir) => {}
                Some(_) => return Err(already_exists(&prefix)),
                None => {
                    nodes.insert(resolved, Node::Dir);
                }
            }
        }
        Ok(())
    }

    fn copy_file(&self, src: &Path, dst: &Path, on_chunk: &mut ChunkCallback<'_>) -> io::Result<u64> {
        let (data, dst_resolved) = {
            let nodes = self.lock();
            let src_resolved = Self::resolve(&nodes, src, true)?;
            let data = match Self::node_at(&nodes, &src_resolved) {
                Some(Node::File { data, .. }) => data.clone(),
                Some(_) => return Err(invalid(src, "is a directory")),
                None => return Err(not_found(src)),
            };
            let dst_resolved = Self::resolve(&nodes, dst, true)?;
            Self::require_parent_dir(&nodes, &dst_resolved)?;
            if matches!(nodes.get(&dst_resolved), Some(Node::Dir)) {
                return Err(invalid(dst, "is a directory"));
            }
            (data, dst_resolved)
        };

        let mut copied = 0usize;
        let set_dst = |len: usize| {
            let mut nodes = self.lock();
            nodes.insert(
                dst_resolved.clone(),
                Node::File {
                    data: data[..len].to_vec(),
                    modified: Utc::now(),
                },
            );
        };

        set_dst(0);
        for chunk in data.chunks(CHUNK_SIZE) {
            if !on_chunk(chunk) {
                return Err(copy_aborted());
            }
            copied += chunk.len();
            set_dst(copied);
        }
        Ok(copied as u64)
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        let resolved = Self::resolve(&nodes, link, false)?;
        Self::require_parent_dir(&nodes, &resolved)?;
        if nodes.contains_key(&resolved) {
            return Err(already_exists(link));
        }
        nodes.insert(resolved, Node::Symlink(target.to_path_buf()));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        let from_resolved = Self::resolve(&nodes, from, false)?;
        let to_resolved = Self::resolve(&nodes, to, false)?;

        let from_node = nodes.get(&from_resolved).cloned().ok_or_else(|| not_found(from))?;
        Self::require_parent_dir(&nodes, &to_resolved)?;
        if to_resolved.starts_with(&from_resolved) && to_resolved != from_resolved {
            return Err(invalid(to, "cannot move a directory into itself"));
        }

        match nodes.get(&to_resolved) {
            None => {}
            Some(Node::Dir) => {
                let occupied = !Self::children(&nodes, &to_resolved).is_empty();
                if occupied || !matches!(from_node, Node::Dir) {
                    return Err(already_exists(to));
                }
                nodes.remove(&to_resolved);
            }
            Some(_) => {
                if matches!(from_node, Node::Dir) {
                    return Err(already_exists(to));
                }
            }
        }

        let moved: Vec<PathBuf> = nodes
            .keys()
            .filter(|k| k.starts_with(&from_resolved))
            .cloned()
            .collect();
        for key in moved {
            if let Some(node) = nodes.remove(&key) {
                let suffix = key.strip_prefix(&from_resolved).unwrap_or(Path::new(""));
                let new_key = if suffix.as_os_str().is_empty() {
                    to_resolved.clone()
                } else {
                    to_resolved.join(suffix)
                };
                nodes.insert(new_key, node);
            }
        }
        Ok(())
    }

    fn rename_no_replace(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        let from_resolved = Self::resolve(&nodes, from, false)?;
        let to_resolved = Self::resolve(&nodes, to, false)?;
        Self::require_parent_dir(&nodes, &to_resolved)?;
        if nodes.contains_key(&to_resolved) {
            return Err(already_exists(to));
        }
        match nodes.get(&from_resolved) {
            None => Err(not_found(from)),
            Some(Node::Dir) => Err(invalid(from, "not a file")),
            Some(_) => {
                if let Some(node) = nodes.remove(&from_resolved) {
                    nodes.insert(to_resolved, node);
                }
                Ok(())
            }
        }
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        let resolved = Self::resolve(&nodes, path, false)?;
        match nodes.get(&resolved) {
            Some(Node::Dir) => Err(invalid(path, "is a directory")),
            Some(_) => {
                nodes.remove(&resolved);
                Ok(())
            }
            None => Err(not_found(path)),
        }
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        let resolved = Self::resolve(&nodes, path, false)?;
        match nodes.get(&resolved) {
            Some(Node::Dir) => {
                if !Self::children(&nodes, &resolved).is_empty() {
                    return Err(invalid(path, "directory not empty"));
                }
                nodes.remove(&resolved);
                Ok(())
            }
            Some(_) => Err(invalid(path, "not a directory")),
            None => Err(not_found(path)),
        }
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        let resolved = Self::resolve(&nodes, path, false)?;
        match nodes.get(&resolved) {
            Some(Node::Symlink(_)) => {
                nodes.remove(&resolved);
                Ok(())
            }
            Some(Node::Dir) => {
                nodes.retain(|k, _| !k.starts_with(&resolved));
                Ok(())
            }
            Some(Node::File { .. }) => Err(invalid(path, "not a directory")),
            None => Err(not_found(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_and_dirs() {
        let fs = MemoryStorage::new();
        fs.add_file("/data/a/b.txt", "hello");

        assert!(fs.is_dir(Path::new("/data/a")));
        assert_eq!(fs.read_to_string(Path::new("/data/a/b.txt")).unwrap(), "hello");
        assert_eq!(fs.metadata(Path::new("/data/a/b.txt")).unwrap().len, 5);
        assert!(!fs.exists(Path::new("/data/missing")));
    }

    #[test]
    fn test_directory_symlink_is_traversed() {
        let fs = MemoryStorage::new();
        fs.add_file("/store/model.gguf", "weights");
        fs.add_dir("/runtime");
        fs.symlink(Path::new("/store"), Path::new("/runtime/models"))
            .unwrap();

        assert!(fs.is_symlink(Path::new("/runtime/models")));
        assert!(fs.is_dir(Path::new("/runtime/models")));
        assert_eq!(
            fs.read_to_string(Path::new("/runtime/models/model.gguf")).unwrap(),
            "weights"
        );
        assert_eq!(
            fs.canonicalize(Path::new("/runtime/models/model.gguf")).unwrap(),
            PathBuf::from("/store/model.gguf")
        );

        let walked = fs.walk_files(Path::new("/runtime/models"), &|_| true).unwrap();
        assert_eq!(walked.len(), 1);
        assert_eq!(walked[0].path, PathBuf::from("/runtime/models/model.gguf"));
    }

    #[test]
    fn test_dangling_symlink() {
        let fs = MemoryStorage::new();
        fs.add_dir("/links");
        fs.symlink(Path::new("/gone.gguf"), Path::new("/links/x.gguf"))
            .unwrap();

        assert!(fs.entry_exists(Path::new("/links/x.gguf")));
        assert!(!fs.exists(Path::new("/links/x.gguf")));
    }

    #[test]
    fn test_rename_moves_subtree() {
        let fs = MemoryStorage::new();
        fs.add_file("/rt/models/blobs/sha256-1", "x");

        fs.rename(Path::new("/rt/models"), Path::new("/rt/models.backup"))
            .unwrap();

        assert!(!fs.entry_exists(Path::new("/rt/models")));
        assert!(fs.exists(Path::new("/rt/models.backup/blobs/sha256-1")));
    }

    #[test]
    fn test_rename_onto_nonempty_dir_fails() {
        let fs = MemoryStorage::new();
        fs.add_file("/a/x", "1");
        fs.add_file("/b/y", "2");
        assert!(fs.rename(Path::new("/a"), Path::new("/b")).is_err());
    }

    #[test]
    fn test_rename_no_replace_keeps_existing() {
        let fs = MemoryStorage::new();
        fs.add_file("/store/a.part", "new");
        fs.add_file("/store/a.gguf", "old");

        let err = fs
            .rename_no_replace(Path::new("/store/a.part"), Path::new("/store/a.gguf"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs.file_bytes("/store/a.gguf").unwrap(), b"old");

        fs.rename_no_replace(Path::new("/store/a.part"), Path::new("/store/b.gguf"))
            .unwrap();
        assert!(!fs.entry_exists(Path::new("/store/a.part")));
        assert_eq!(fs.file_bytes("/store/b.gguf").unwrap(), b"new");
    }

    #[test]
    fn test_copy_abort_leaves_partial() {
        let fs = MemoryStorage::new();
        fs.add_file("/src.bin", vec![0u8; CHUNK_SIZE * 3]);

        let mut calls = 0;
        let err = fs
            .copy_file(Path::new("/src.bin"), Path::new("/dst.bin"), &mut |_| {
                calls += 1;
                calls < 2
            })
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert_eq!(fs.file_bytes("/dst.bin").unwrap().len(), CHUNK_SIZE);
    }

    #[test]
    fn test_remove_dir_requires_empty() {
        let fs = MemoryStorage::new();
        fs.add_file("/d/f", "1");
        assert!(fs.remove_dir(Path::new("/d")).is_err());
        fs.remove_file(Path::new("/d/f")).unwrap();
        fs.remove_dir(Path::new("/d")).unwrap();
        assert!(!fs.exists(Path::new("/d")));
    }
}
