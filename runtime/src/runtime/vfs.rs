//! In-memory, sandboxed filesystem.
//!
//! The tree is made of owned [`VfsNode`]s: a directory owns its children, so
//! the structure can never contain a cycle or a node with two parents.
//! Open handles refer to nodes by [`VfsPath`] rather than by reference; the
//! [`Vfs`] handle itself is a cheap clone around a mutex so a subtree can be
//! preopened by more than one runtime at once.
//!
//! Nothing in here touches the host filesystem.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error};
use thiserror::Error;

use crate::wasi_syscalls::types::{Errno, FileType};

/// Largest size a single file may grow to.
pub const MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VfsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("file already exists")]
    AlreadyExists,
    #[error("directory not empty")]
    NotEmpty,
    #[error("invalid path")]
    InvalidPath,
    #[error("path escapes its sandbox root")]
    NotCapable,
    #[error("file would exceed {MAX_FILE_SIZE} bytes")]
    FileTooLarge,
}

impl From<VfsError> for Errno {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound => Errno::Noent,
            VfsError::NotADirectory => Errno::Notdir,
            VfsError::IsADirectory => Errno::Isdir,
            VfsError::AlreadyExists => Errno::Exist,
            VfsError::NotEmpty => Errno::Notempty,
            VfsError::InvalidPath => Errno::Inval,
            VfsError::NotCapable => Errno::Notcapable,
            VfsError::FileTooLarge => Errno::Fbig,
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VfsNode {
    File(Vec<u8>),
    Directory(BTreeMap<String, VfsNode>),
}

impl Default for VfsNode {
    fn default() -> Self {
        VfsNode::Directory(BTreeMap::new())
    }
}

impl VfsNode {
    pub fn file_type(&self) -> FileType {
        match self {
            VfsNode::File(_) => FileType::RegularFile,
            VfsNode::Directory(_) => FileType::Directory,
        }
    }

    fn lookup(&self, components: &[String]) -> VfsResult<&VfsNode> {
        let mut node = self;
        for name in components {
            node = match node {
                VfsNode::Directory(children) => children.get(name).ok_or(VfsError::NotFound)?,
                VfsNode::File(_) => return Err(VfsError::NotADirectory),
            };
        }
        Ok(node)
    }

    fn lookup_mut(&mut self, components: &[String]) -> VfsResult<&mut VfsNode> {
        let mut node = self;
        for name in components {
            node = match node {
                VfsNode::Directory(children) => {
                    children.get_mut(name).ok_or(VfsError::NotFound)?
                }
                VfsNode::File(_) => return Err(VfsError::NotADirectory),
            };
        }
        Ok(node)
    }

    /// Children of `path`'s parent directory, plus `path`'s final component.
    fn parent_dir_mut<'a, 'p>(
        &'a mut self,
        path: &'p VfsPath,
    ) -> VfsResult<(&'a mut BTreeMap<String, VfsNode>, &'p str)> {
        let (name, parent) = path.0.split_last().ok_or(VfsError::InvalidPath)?;
        match self.lookup_mut(parent)? {
            VfsNode::Directory(children) => Ok((children, name.as_str())),
            VfsNode::File(_) => Err(VfsError::NotADirectory),
        }
    }

    fn file_data_mut(&mut self, path: &VfsPath) -> VfsResult<&mut Vec<u8>> {
        match self.lookup_mut(path.components())? {
            VfsNode::File(data) => Ok(data),
            VfsNode::Directory(_) => Err(VfsError::IsADirectory),
        }
    }
}

/// Normalized absolute location inside a [`Vfs`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VfsPath(Vec<String>);

impl VfsPath {
    pub fn root() -> Self {
        VfsPath(Vec::new())
    }

    /// Parses an absolute path. `..` may not climb above `/`.
    pub fn parse(path: &str) -> VfsResult<Self> {
        VfsPath::root().resolve(&VfsPath::root(), path)
    }

    /// Resolves `relative` against `self` without leaving `boundary`.
    ///
    /// Leading separators are ignored: the path is always taken relative to
    /// the directory it was opened from.
    pub fn resolve(&self, boundary: &VfsPath, relative: &str) -> VfsResult<VfsPath> {
        if !self.starts_with(boundary) {
            return Err(VfsError::NotCapable);
        }
        let mut components = self.0.clone();
        for part in relative.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if components.len() <= boundary.0.len() {
                        return Err(VfsError::NotCapable);
                    }
                    components.pop();
                }
                name if name.contains('\0') => return Err(VfsError::InvalidPath),
                name => components.push(name.to_string()),
            }
        }
        Ok(VfsPath(components))
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &VfsPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<VfsPath> {
        self.0.split_last().map(|(_, parent)| VfsPath(parent.to_vec()))
    }

    pub fn join(&self, name: &str) -> VfsPath {
        let mut components = self.0.clone();
        components.push(name.to_string());
        VfsPath(components)
    }

    /// Stable per-path inode number for `filestat`.
    pub fn inode(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub create: bool,
    pub exclusive: bool,
    pub truncate: bool,
    pub directory: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub file_type: FileType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub file_type: FileType,
    /// Byte length for files, entry count for directories.
    pub size: u64,
}

/// Shared handle onto one in-memory tree.
#[derive(Clone, Default)]
pub struct Vfs {
    root: Arc<Mutex<VfsNode>>,
}

impl fmt::Debug for Vfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vfs").field("tree", &Arc::as_ptr(&self.root)).finish()
    }
}

impl Vfs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VfsNode> {
        self.root.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when both handles refer to the same tree.
    pub fn same_tree(&self, other: &Vfs) -> bool {
        Arc::ptr_eq(&self.root, &other.root)
    }

    pub fn open(&self, path: &VfsPath, opts: OpenOptions) -> VfsResult<FileType> {
        let mut root = self.lock();
        let exists = match root.lookup(path.components()) {
            Ok(_) => true,
            Err(VfsError::NotFound) => false,
            Err(e) => return Err(e),
        };

        if !exists {
            if !opts.create {
                return Err(VfsError::NotFound);
            }
            if opts.directory {
                return Err(VfsError::InvalidPath);
            }
            let (children, name) = root.parent_dir_mut(path)?;
            children.insert(name.to_string(), VfsNode::File(Vec::new()));
            debug!("vfs: created {}", path);
            return Ok(FileType::RegularFile);
        }

        if opts.create && opts.exclusive {
            return Err(VfsError::AlreadyExists);
        }
        match root.lookup_mut(path.components())? {
            VfsNode::Directory(_) if opts.truncate => Err(VfsError::IsADirectory),
            VfsNode::Directory(_) => Ok(FileType::Directory),
            VfsNode::File(_) if opts.directory => Err(VfsError::NotADirectory),
            VfsNode::File(data) => {
                if opts.truncate {
                    data.clear();
                }
                Ok(FileType::RegularFile)
            }
        }
    }

    pub fn stat(&self, path: &VfsPath) -> VfsResult<Stat> {
        let root = self.lock();
        let node = root.lookup(path.components())?;
        let size = match node {
            VfsNode::File(data) => data.len() as u64,
            VfsNode::Directory(children) => children.len() as u64,
        };
        Ok(Stat { file_type: node.file_type(), size })
    }

    /// Reads up to `len` bytes at `offset`. Empty at or past end of file.
    pub fn read(&self, path: &VfsPath, offset: u64, len: usize) -> VfsResult<Vec<u8>> {
        let root = self.lock();
        match root.lookup(path.components())? {
            VfsNode::File(data) => {
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
                let end = start.saturating_add(len).min(data.len());
                Ok(data[start..end].to_vec())
            }
            VfsNode::Directory(_) => Err(VfsError::IsADirectory),
        }
    }

    /// Writes `bytes` at `offset`, zero-filling any gap past the old end.
    pub fn write(&self, path: &VfsPath, offset: u64, bytes: &[u8]) -> VfsResult<usize> {
        let end = offset
            .checked_add(bytes.len() as u64)
            .filter(|end| *end <= MAX_FILE_SIZE)
            .ok_or(VfsError::FileTooLarge)?;
        let mut root = self.lock();
        let data = root.file_data_mut(path)?;
        let (start, end) = (offset as usize, end as usize);
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Appends under a single lock; returns the new length.
    pub fn append(&self, path: &VfsPath, bytes: &[u8]) -> VfsResult<u64> {
        let mut root = self.lock();
        let data = root.file_data_mut(path)?;
        if data.len() as u64 + bytes.len() as u64 > MAX_FILE_SIZE {
            return Err(VfsError::FileTooLarge);
        }
        data.extend_from_slice(bytes);
        Ok(data.len() as u64)
    }

    pub fn truncate(&self, path: &VfsPath, size: u64) -> VfsResult<()> {
        if size > MAX_FILE_SIZE {
            return Err(VfsError::FileTooLarge);
        }
        let mut root = self.lock();
        root.file_data_mut(path)?.resize(size as usize, 0);
        Ok(())
    }

    pub fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        let mut root = self.lock();
        let (children, name) = root.parent_dir_mut(path)?;
        if children.contains_key(name) {
            return Err(VfsError::AlreadyExists);
        }
        children.insert(name.to_string(), VfsNode::default());
        debug!("vfs: mkdir {}", path);
        Ok(())
    }

    /// Creates `path` and any missing ancestors. Existing directories are fine.
    pub fn mkdirp(&self, path: &VfsPath) -> VfsResult<()> {
        let mut root = self.lock();
        let mut node = &mut *root;
        for name in path.components() {
            node = match node {
                VfsNode::Directory(children) => {
                    children.entry(name.clone()).or_insert_with(VfsNode::default)
                }
                VfsNode::File(_) => return Err(VfsError::NotADirectory),
            };
        }
        match node {
            VfsNode::Directory(_) => Ok(()),
            VfsNode::File(_) => Err(VfsError::NotADirectory),
        }
    }

    /// Lists a directory in name order.
    pub fn readdir(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>> {
        let root = self.lock();
        match root.lookup(path.components())? {
            VfsNode::Directory(children) => Ok(children
                .iter()
                .map(|(name, node)| DirEntry { name: name.clone(), file_type: node.file_type() })
                .collect()),
            VfsNode::File(_) => Err(VfsError::NotADirectory),
        }
    }

    pub fn unlink(&self, path: &VfsPath) -> VfsResult<()> {
        let mut root = self.lock();
        let (children, name) = root.parent_dir_mut(path)?;
        match children.get(name) {
            None => Err(VfsError::NotFound),
            Some(VfsNode::Directory(_)) => Err(VfsError::IsADirectory),
            Some(VfsNode::File(_)) => {
                children.remove(name);
                debug!("vfs: unlinked {}", path);
                Ok(())
            }
        }
    }

    /// Removes an empty directory.
    pub fn rmdir(&self, path: &VfsPath) -> VfsResult<()> {
        let mut root = self.lock();
        let (children, name) = root.parent_dir_mut(path)?;
        match children.get(name) {
            None => Err(VfsError::NotFound),
            Some(VfsNode::File(_)) => Err(VfsError::NotADirectory),
            Some(VfsNode::Directory(grandchildren)) if !grandchildren.is_empty() => {
                Err(VfsError::NotEmpty)
            }
            Some(VfsNode::Directory(_)) => {
                children.remove(name);
                debug!("vfs: removed directory {}", path);
                Ok(())
            }
        }
    }

    /// Moves `from` to `to`, replacing a compatible existing target.
    pub fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        if from == to {
            return Ok(());
        }
        if from.is_root() || to.is_root() || to.starts_with(from) {
            return Err(VfsError::InvalidPath);
        }

        let mut root = self.lock();
        let moving_dir = matches!(root.lookup(from.components())?, VfsNode::Directory(_));
        let to_parent = to.parent().ok_or(VfsError::InvalidPath)?;
        match root.lookup(to_parent.components())? {
            VfsNode::File(_) => return Err(VfsError::NotADirectory),
            VfsNode::Directory(children) => match to.file_name().and_then(|n| children.get(n)) {
                Some(VfsNode::Directory(_)) if !moving_dir => return Err(VfsError::IsADirectory),
                Some(VfsNode::File(_)) if moving_dir => return Err(VfsError::NotADirectory),
                Some(VfsNode::Directory(entries)) if !entries.is_empty() => {
                    return Err(VfsError::NotEmpty)
                }
                _ => {}
            },
        }

        let (from_children, from_name) = root.parent_dir_mut(from)?;
        let node = from_children.remove(from_name).ok_or(VfsError::NotFound)?;
        match root.parent_dir_mut(to) {
            Ok((to_children, to_name)) => {
                to_children.insert(to_name.to_string(), node);
                debug!("vfs: renamed {} -> {}", from, to);
                Ok(())
            }
            Err(e) => {
                // Unreachable after the checks above: `to` is not inside `from`.
                error!("vfs: rename target {} vanished mid-move: {}", to, e);
                Err(e)
            }
        }
    }

    /// Creates or replaces a file, making parent directories as needed.
    pub fn write_file(&self, path: &VfsPath, contents: impl Into<Vec<u8>>) -> VfsResult<()> {
        let contents = contents.into();
        if contents.len() as u64 > MAX_FILE_SIZE {
            return Err(VfsError::FileTooLarge);
        }
        if let Some(parent) = path.parent() {
            self.mkdirp(&parent)?;
        }
        let mut root = self.lock();
        let (children, name) = root.parent_dir_mut(path)?;
        if let Some(VfsNode::Directory(_)) = children.get(name) {
            return Err(VfsError::IsADirectory);
        }
        children.insert(name.to_string(), VfsNode::File(contents));
        Ok(())
    }

    pub fn read_file(&self, path: &VfsPath) -> VfsResult<Vec<u8>> {
        let root = self.lock();
        match root.lookup(path.components())? {
            VfsNode::File(data) => Ok(data.clone()),
            VfsNode::Directory(_) => Err(VfsError::IsADirectory),
        }
    }
}
