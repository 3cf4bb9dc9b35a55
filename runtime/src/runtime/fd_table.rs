use std::fmt;

use bitflags::bitflags;
use log::{debug, error};

use crate::runtime::error::RuntimeError;
use crate::runtime::vfs::{Vfs, VfsPath};
use crate::wasi_syscalls::types::{Errno, FileType, WasiResult};

pub const STDIN: u32 = 0;
pub const STDOUT: u32 = 1;
pub const STDERR: u32 = 2;
/// Descriptors below this are the standard streams and are never released.
pub const RESERVED_FDS: u32 = 3;
pub const MAX_FDS: usize = 1024;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Every write lands at end of file, whatever the offset.
        const APPEND = 1 << 2;
    }
}

/// An open handle onto a VFS node. The VFS owns the node; the handle only
/// remembers where it lives.
#[derive(Debug, Clone)]
pub struct OpenFile {
    pub vfs: Vfs,
    pub path: VfsPath,
    /// Sandbox boundary inherited from the preopen this was reached through.
    pub root: VfsPath,
    pub offset: u64,
    pub access: Access,
    pub file_type: FileType,
    /// Guest-visible name, set only for preopened directories.
    pub preopen: Option<String>,
}

impl OpenFile {
    pub fn preopened_dir(vfs: Vfs, subtree: VfsPath, guest_path: String) -> Self {
        OpenFile {
            vfs,
            path: subtree.clone(),
            root: subtree,
            offset: 0,
            access: Access::READ | Access::WRITE,
            file_type: FileType::Directory,
            preopen: Some(guest_path),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

#[derive(Debug, Clone)]
pub enum FDEntry {
    /// stdin, stdout or stderr, backed by an in-memory buffer.
    Stream {
        buffer: Vec<u8>,
        read_ptr: usize,
        access: Access,
    },
    File(OpenFile),
}

impl fmt::Display for FDEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FDEntry::Stream { buffer, read_ptr, access } => {
                let buffer_str = match std::str::from_utf8(buffer) {
                    Ok(s) => s.to_string(),
                    Err(_) => format!("{:?}", buffer),
                };
                write!(
                    f,
                    "Stream(buffer: \"{}\", read_ptr: {}, access: {:?})",
                    buffer_str, read_ptr, access
                )
            }
            FDEntry::File(file) => write!(
                f,
                "File(path: {}, offset: {}, type: {:?}, access: {:?}, preopen: {:?})",
                file.path, file.offset, file.file_type, file.access, file.preopen
            ),
        }
    }
}

impl FDEntry {
    pub fn stdin(contents: Vec<u8>) -> Self {
        FDEntry::Stream { buffer: contents, read_ptr: 0, access: Access::READ }
    }

    pub fn output_stream() -> Self {
        FDEntry::Stream { buffer: Vec::new(), read_ptr: 0, access: Access::WRITE }
    }

    pub fn file_type(&self) -> FileType {
        match self {
            FDEntry::Stream { .. } => FileType::CharacterDevice,
            FDEntry::File(file) => file.file_type,
        }
    }

    pub fn access(&self) -> Access {
        match self {
            FDEntry::Stream { access, .. } => *access,
            FDEntry::File(file) => file.access,
        }
    }
}

pub struct FDTable {
    entries: Vec<Option<FDEntry>>,
}

impl FDTable {
    /// A table holding only the three standard streams.
    pub fn new(stdin: Vec<u8>) -> Self {
        let mut entries = Vec::with_capacity(32);
        entries.push(Some(FDEntry::stdin(stdin)));
        entries.push(Some(FDEntry::output_stream()));
        entries.push(Some(FDEntry::output_stream()));
        FDTable { entries }
    }

    /// The descriptor the next `alloc` would hand out, without taking it.
    pub fn next_free(&self) -> WasiResult<u32> {
        let reserved = RESERVED_FDS as usize;
        match self.entries.iter().skip(reserved).position(Option::is_none) {
            Some(i) => Ok((i + reserved) as u32),
            None if self.entries.len() < MAX_FDS => Ok(self.entries.len() as u32),
            None => {
                error!("fd table full ({} entries)", MAX_FDS);
                Err(Errno::Mfile)
            }
        }
    }

    /// Stores `entry` in the lowest free slot at or above `RESERVED_FDS`.
    pub fn alloc(&mut self, entry: FDEntry) -> WasiResult<u32> {
        let slot = self.next_free()? as usize;
        if slot == self.entries.len() {
            self.entries.push(None);
        }
        self.entries[slot] = Some(entry);
        debug!("allocated fd {}", slot);
        Ok(slot as u32)
    }

    pub fn get(&self, fd: u32) -> WasiResult<&FDEntry> {
        self.entries.get(fd as usize).and_then(Option::as_ref).ok_or(Errno::Badf)
    }

    pub fn get_mut(&mut self, fd: u32) -> WasiResult<&mut FDEntry> {
        self.entries.get_mut(fd as usize).and_then(Option::as_mut).ok_or(Errno::Badf)
    }

    /// The open file behind `fd`; streams have no VFS node.
    pub fn file(&self, fd: u32) -> WasiResult<&OpenFile> {
        match self.get(fd)? {
            FDEntry::File(file) => Ok(file),
            FDEntry::Stream { .. } => Err(Errno::Notdir),
        }
    }

    /// Closes `fd`. The slot is free for reuse as soon as this returns.
    pub fn release(&mut self, fd: u32) -> WasiResult<FDEntry> {
        if fd < RESERVED_FDS {
            self.get(fd)?;
            return Err(Errno::Notsup);
        }
        let entry = self
            .entries
            .get_mut(fd as usize)
            .and_then(Option::take)
            .ok_or(Errno::Badf)?;
        debug!("released fd {}", fd);
        Ok(entry)
    }

    /// Moves `from` onto `to`, closing whatever `to` held.
    pub fn renumber(&mut self, from: u32, to: u32) -> WasiResult<()> {
        self.get(from)?;
        self.get(to)?;
        if from < RESERVED_FDS || to < RESERVED_FDS {
            return Err(Errno::Notsup);
        }
        if from != to {
            let entry = self.entries[from as usize].take();
            self.entries[to as usize] = entry;
        }
        Ok(())
    }

    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_live(&self, fd: u32) -> bool {
        self.get(fd).is_ok()
    }

    pub fn preopens(&self) -> impl Iterator<Item = (u32, &OpenFile)> {
        self.entries.iter().enumerate().filter_map(|(fd, entry)| match entry {
            Some(FDEntry::File(file)) if file.preopen.is_some() => Some((fd as u32, file)),
            _ => None,
        })
    }

    /// Drains a standard stream's buffer. A reserved slot that is missing or
    /// not a stream means the table has been corrupted.
    pub fn take_stream(&mut self, fd: u32) -> Result<Vec<u8>, RuntimeError> {
        match self.entries.get_mut(fd as usize) {
            Some(Some(FDEntry::Stream { buffer, read_ptr, .. })) => {
                *read_ptr = 0;
                Ok(std::mem::take(buffer))
            }
            Some(Some(entry)) => Err(RuntimeError::Corrupted(format!(
                "fd {} should be a standard stream, found {}",
                fd, entry
            ))),
            _ => Err(RuntimeError::Corrupted(format!("standard stream fd {} is missing", fd))),
        }
    }
}

impl fmt::Display for FDTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            match entry {
                Some(e) => writeln!(f, "FD {}: {}", i, e)?,
                None => writeln!(f, "FD {}: None", i)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(name: &str) -> FDEntry {
        FDEntry::File(OpenFile::preopened_dir(Vfs::new(), VfsPath::root(), name.to_string()))
    }

    #[test]
    fn stdio_is_bound_at_construction() {
        let table = FDTable::new(b"input".to_vec());
        assert_eq!(table.live_count(), 3);
        for fd in [STDIN, STDOUT, STDERR] {
            assert_eq!(table.get(fd).unwrap().file_type(), FileType::CharacterDevice);
        }
        assert!(table.get(STDIN).unwrap().access().contains(Access::READ));
        assert!(!table.get(STDOUT).unwrap().access().contains(Access::READ));
        assert_eq!(table.get(3).err(), Some(Errno::Badf));
    }

    #[test]
    fn lowest_freed_descriptor_is_reused() {
        let mut table = FDTable::new(Vec::new());
        let fds: Vec<u32> = (0..5).map(|i| table.alloc(dir(&format!("/d{i}"))).unwrap()).collect();
        assert_eq!(fds, [3, 4, 5, 6, 7]);

        table.release(5).unwrap();
        table.release(4).unwrap();
        assert_eq!(table.get(4).err(), Some(Errno::Badf));

        assert_eq!(table.alloc(dir("/again")).unwrap(), 4);
        assert_eq!(table.alloc(dir("/again2")).unwrap(), 5);
        assert_eq!(table.alloc(dir("/fresh")).unwrap(), 8);
        assert!(fds.iter().all(|fd| table.is_live(*fd)));
    }

    #[test]
    fn reserved_descriptors_cannot_be_released() {
        let mut table = FDTable::new(Vec::new());
        assert_eq!(table.release(STDOUT).err(), Some(Errno::Notsup));
        assert_eq!(table.release(42).err(), Some(Errno::Badf));
        assert_eq!(table.live_count(), 3);
    }

    #[test]
    fn renumber_replaces_target() {
        let mut table = FDTable::new(Vec::new());
        let a = table.alloc(dir("/a")).unwrap();
        let b = table.alloc(dir("/b")).unwrap();
        table.renumber(a, b).unwrap();
        assert!(!table.is_live(a));
        match table.get(b).unwrap() {
            FDEntry::File(file) => assert_eq!(file.preopen.as_deref(), Some("/a")),
            other => panic!("unexpected entry {other}"),
        }
        assert_eq!(table.renumber(b, STDOUT).err(), Some(Errno::Notsup));
    }

    #[test]
    fn table_fills_up_with_mfile() {
        let mut table = FDTable::new(Vec::new());
        for _ in RESERVED_FDS as usize..MAX_FDS {
            table.alloc(dir("/x")).unwrap();
        }
        assert_eq!(table.next_free().err(), Some(Errno::Mfile));
        assert_eq!(table.alloc(dir("/x")).err(), Some(Errno::Mfile));
        table.release(700).unwrap();
        assert_eq!(table.next_free(), Ok(700));
    }

    #[test]
    fn take_stream_drains_and_detects_corruption() {
        let mut table = FDTable::new(Vec::new());
        if let FDEntry::Stream { buffer, .. } = table.get_mut(STDOUT).unwrap() {
            buffer.extend_from_slice(b"hello");
        }
        assert_eq!(table.take_stream(STDOUT).unwrap(), b"hello");
        assert!(table.take_stream(STDOUT).unwrap().is_empty());

        let fd = table.alloc(dir("/d")).unwrap();
        assert!(matches!(table.take_stream(fd), Err(RuntimeError::Corrupted(_))));
        assert!(matches!(table.take_stream(99), Err(RuntimeError::Corrupted(_))));
    }
}
