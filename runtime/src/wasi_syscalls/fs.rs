use byteorder::{ByteOrder, LittleEndian};
use log::{debug, error};

use crate::runtime::fd_table::{Access, FDEntry, OpenFile};
use crate::runtime::memory::GuestMemory;
use crate::runtime::process::ProcessData;
use crate::runtime::vfs::{OpenOptions, Vfs, VfsPath};
use crate::wasi_syscalls::fd::encode_filestat;
use crate::wasi_syscalls::types::{
    Errno, FdFlags, OFlags, Rights, WasiResult, DIRENT_SIZE, FILESTAT_SIZE,
};

/// A path argument resolved against the directory descriptor it was passed
/// with.
struct Resolved {
    vfs: Vfs,
    path: VfsPath,
    /// The sandbox boundary of `dirfd`.
    root: VfsPath,
}

impl Resolved {
    /// The boundary directory itself may be looked at but not removed,
    /// renamed or replaced.
    fn is_sandbox_root(&self) -> bool {
        self.path == self.root
    }
}

fn resolve(data: &ProcessData, dirfd: u32, path: &str) -> WasiResult<Resolved> {
    let dir = data.fd_table.file(dirfd)?;
    if !dir.is_directory() {
        return Err(Errno::Notdir);
    }
    if path.is_empty() {
        return Err(Errno::Noent);
    }
    let target = dir.path.resolve(&dir.root, path).map_err(|e| {
        error!("path {:?} from fd {} rejected: {}", path, dirfd, e);
        e
    })?;
    Ok(Resolved { vfs: dir.vfs.clone(), path: target, root: dir.root.clone() })
}

fn read_path(mem: &GuestMemory<'_>, path_ptr: u32, path_len: u32) -> WasiResult<String> {
    mem.read_str(path_ptr, path_len).map(str::to_string)
}

#[allow(clippy::too_many_arguments)]
pub fn path_open(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    dirfd: u32,
    _dirflags: u32,
    path_ptr: u32,
    path_len: u32,
    oflags: u32,
    fs_rights_base: u64,
    _fs_rights_inheriting: u64,
    fdflags: u32,
    opened_fd_ptr: u32,
) -> WasiResult<()> {
    let path = read_path(mem, path_ptr, path_len)?;
    debug!(
        "path_open: dirfd={}, path={:?}, oflags={}, base_rights={}, fdflags={}",
        dirfd, path, oflags, fs_rights_base, fdflags
    );
    mem.check(opened_fd_ptr, 4, 4)?;
    let target = resolve(data, dirfd, &path)?;

    let oflags = OFlags::from_bits_truncate(oflags as u16);
    let fdflags = FdFlags::from_bits_truncate(fdflags as u16);
    let rights = Rights::from_bits_truncate(fs_rights_base);

    // Read/write access comes from the rights alone; `APPEND` only picks
    // where writes land.
    let mut access = Access::empty();
    if rights.contains(Rights::FD_READ) {
        access |= Access::READ;
    }
    if rights.contains(Rights::FD_WRITE) {
        access |= Access::WRITE;
    }
    if access.is_empty() {
        access = Access::READ;
    }
    if fdflags.contains(FdFlags::APPEND) {
        access |= Access::APPEND;
    }
    if oflags.contains(OFlags::TRUNC) && !access.contains(Access::WRITE) {
        error!("path_open: {:?} asks for truncation without write access", path);
        return Err(Errno::Notcapable);
    }

    // Nothing in the VFS may change unless the descriptor can be handed out.
    data.fd_table.next_free()?;
    let file_type = target.vfs.open(
        &target.path,
        OpenOptions {
            create: oflags.contains(OFlags::CREAT),
            exclusive: oflags.contains(OFlags::EXCL),
            truncate: oflags.contains(OFlags::TRUNC),
            directory: oflags.contains(OFlags::DIRECTORY),
        },
    )?;

    let fd = data.fd_table.alloc(FDEntry::File(OpenFile {
        vfs: target.vfs,
        path: target.path,
        root: target.root,
        offset: 0,
        access,
        file_type,
        preopen: None,
    }))?;
    mem.write_u32(opened_fd_ptr, fd)?;
    debug!("path_open: success, new FD = {}", fd);
    Ok(())
}

pub fn path_create_directory(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    dirfd: u32,
    path_ptr: u32,
    path_len: u32,
) -> WasiResult<()> {
    let path = read_path(mem, path_ptr, path_len)?;
    debug!("path_create_directory: dirfd={}, path={:?}", dirfd, path);
    let target = resolve(data, dirfd, &path)?;
    if target.is_sandbox_root() {
        return Err(Errno::Exist);
    }
    target.vfs.mkdir(&target.path)?;
    Ok(())
}

pub fn path_remove_directory(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    dirfd: u32,
    path_ptr: u32,
    path_len: u32,
) -> WasiResult<()> {
    let path = read_path(mem, path_ptr, path_len)?;
    debug!("path_remove_directory: dirfd={}, path={:?}", dirfd, path);
    let target = resolve(data, dirfd, &path)?;
    if target.is_sandbox_root() {
        error!("path_remove_directory: attempt to remove sandbox root!");
        return Err(Errno::Acces);
    }
    target.vfs.rmdir(&target.path)?;
    Ok(())
}

pub fn path_unlink_file(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    dirfd: u32,
    path_ptr: u32,
    path_len: u32,
) -> WasiResult<()> {
    let path = read_path(mem, path_ptr, path_len)?;
    debug!("path_unlink_file: dirfd={}, path={:?}", dirfd, path);
    let target = resolve(data, dirfd, &path)?;
    if target.is_sandbox_root() {
        return Err(Errno::Isdir);
    }
    target.vfs.unlink(&target.path)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn path_rename(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    old_fd: u32,
    old_path_ptr: u32,
    old_path_len: u32,
    new_fd: u32,
    new_path_ptr: u32,
    new_path_len: u32,
) -> WasiResult<()> {
    let old_path = read_path(mem, old_path_ptr, old_path_len)?;
    let new_path = read_path(mem, new_path_ptr, new_path_len)?;
    debug!(
        "path_rename: old_fd={}, old_path={:?}, new_fd={}, new_path={:?}",
        old_fd, old_path, new_fd, new_path
    );
    let from = resolve(data, old_fd, &old_path)?;
    let to = resolve(data, new_fd, &new_path)?;
    if !from.vfs.same_tree(&to.vfs) {
        return Err(Errno::Xdev);
    }
    if from.is_sandbox_root() || to.is_sandbox_root() {
        return Err(Errno::Acces);
    }
    from.vfs.rename(&from.path, &to.path)?;
    Ok(())
}

pub fn path_filestat_get(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    dirfd: u32,
    _flags: u32,
    path_ptr: u32,
    path_len: u32,
    buf_ptr: u32,
) -> WasiResult<()> {
    let path = read_path(mem, path_ptr, path_len)?;
    debug!("path_filestat_get: dirfd={}, path={:?}", dirfd, path);
    mem.check(buf_ptr, FILESTAT_SIZE, 8)?;
    let target = resolve(data, dirfd, &path)?;
    let stat = target.vfs.stat(&target.path)?;
    let buf = encode_filestat(target.path.inode(), stat.file_type, stat.size);
    mem.write_bytes(buf_ptr, &buf)
}

/// Timestamps are not stored. The path must still resolve.
#[allow(clippy::too_many_arguments)]
pub fn path_filestat_set_times(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    dirfd: u32,
    _flags: u32,
    path_ptr: u32,
    path_len: u32,
    _atim: u64,
    _mtim: u64,
    _fst_flags: u32,
) -> WasiResult<()> {
    let path = read_path(mem, path_ptr, path_len)?;
    let target = resolve(data, dirfd, &path)?;
    target.vfs.stat(&target.path)?;
    Err(Errno::Notsup)
}

/// The VFS has no hard links.
#[allow(clippy::too_many_arguments)]
pub fn path_link(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    old_fd: u32,
    _old_flags: u32,
    old_path_ptr: u32,
    old_path_len: u32,
    new_fd: u32,
    new_path_ptr: u32,
    new_path_len: u32,
) -> WasiResult<()> {
    let old_path = read_path(mem, old_path_ptr, old_path_len)?;
    let new_path = read_path(mem, new_path_ptr, new_path_len)?;
    debug!("path_link: {:?} -> {:?}", old_path, new_path);
    let from = resolve(data, old_fd, &old_path)?;
    resolve(data, new_fd, &new_path)?;
    from.vfs.stat(&from.path)?;
    Err(Errno::Notsup)
}

/// The VFS has no symbolic links.
pub fn path_symlink(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    old_path_ptr: u32,
    old_path_len: u32,
    dirfd: u32,
    new_path_ptr: u32,
    new_path_len: u32,
) -> WasiResult<()> {
    let old_path = read_path(mem, old_path_ptr, old_path_len)?;
    let new_path = read_path(mem, new_path_ptr, new_path_len)?;
    debug!("path_symlink: {:?} -> {:?}", new_path, old_path);
    resolve(data, dirfd, &new_path)?;
    Err(Errno::Notsup)
}

/// Nothing in the VFS is a symbolic link, so an existing path is `Inval`.
#[allow(clippy::too_many_arguments)]
pub fn path_readlink(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    dirfd: u32,
    path_ptr: u32,
    path_len: u32,
    buf_ptr: u32,
    buf_len: u32,
    bufused_ptr: u32,
) -> WasiResult<()> {
    let path = read_path(mem, path_ptr, path_len)?;
    mem.check(buf_ptr, buf_len, 1)?;
    mem.check(bufused_ptr, 4, 4)?;
    let target = resolve(data, dirfd, &path)?;
    target.vfs.stat(&target.path)?;
    Err(Errno::Inval)
}

/// Implementation of WASI's `fd_readdir`.
///
/// Entries are serialized as `dirent` headers followed by the name, starting
/// at entry index `cookie`. The last entry is cut off when the buffer is
/// full; the guest notices `bufused == buf_len` and retries with a larger
/// buffer.
pub fn fd_readdir(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    fd: u32,
    buf_ptr: u32,
    buf_len: u32,
    cookie: u64,
    bufused_ptr: u32,
) -> WasiResult<()> {
    debug!("fd_readdir(fd={}, buf={}, buf_len={}, cookie={})", fd, buf_ptr, buf_len, cookie);
    let dir = data.fd_table.file(fd)?;
    if !dir.is_directory() {
        return Err(Errno::Notdir);
    }
    mem.check(buf_ptr, buf_len, 1)?;
    mem.check(bufused_ptr, 4, 4)?;
    let entries = dir.vfs.readdir(&dir.path)?;

    let capacity = buf_len as usize;
    let skip = usize::try_from(cookie).unwrap_or(usize::MAX);
    let mut out = Vec::new();
    for (index, entry) in entries.iter().enumerate().skip(skip) {
        if out.len() >= capacity {
            break;
        }
        let mut header = [0u8; DIRENT_SIZE];
        LittleEndian::write_u64(&mut header[0..8], index as u64 + 1);
        LittleEndian::write_u64(&mut header[8..16], dir.path.join(&entry.name).inode());
        LittleEndian::write_u32(&mut header[16..20], entry.name.len() as u32);
        header[20] = entry.file_type as u8;
        out.extend_from_slice(&header);
        out.extend_from_slice(entry.name.as_bytes());
    }
    out.truncate(capacity);

    mem.write_bytes(buf_ptr, &out)?;
    mem.write_u32(bufused_ptr, out.len() as u32)
}
