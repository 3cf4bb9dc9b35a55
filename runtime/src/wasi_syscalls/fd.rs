//! Descriptor-level syscalls: I/O, seeking, stat and preopen discovery.
//!
//! Each function validates its output pointers before it touches the fd
//! table or the VFS, so a bad pointer never leaves a half-done operation.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::runtime::fd_table::{Access, FDEntry, OpenFile};
use crate::runtime::memory::{iovecs_len, GuestMemory};
use crate::runtime::process::ProcessData;
use crate::wasi_syscalls::types::{
    Errno, FdFlags, FileType, Rights, WasiResult, Whence, FDSTAT_SIZE, FILESTAT_SIZE,
    PRESTAT_SIZE,
};

/// Highest `advice` value in preview1 (`noreuse`).
const ADVICE_NOREUSE: u32 = 5;

pub fn fd_write(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    fd: u32,
    iovs_ptr: u32,
    iovs_len: u32,
    nwritten_ptr: u32,
) -> WasiResult<()> {
    debug!("fd_write: fd={}, iovs_ptr={}, iovs_len={}", fd, iovs_ptr, iovs_len);
    let entry = data.fd_table.get_mut(fd)?;
    let iovs = mem.read_iovecs(iovs_ptr, iovs_len)?;
    mem.check(nwritten_ptr, 4, 4)?;
    let bytes = mem.gather(&iovs)?;
    let written = write_entry(entry, &bytes)?;
    mem.write_u32(nwritten_ptr, written as u32)
}

pub fn fd_read(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    fd: u32,
    iovs_ptr: u32,
    iovs_len: u32,
    nread_ptr: u32,
) -> WasiResult<()> {
    debug!("fd_read: fd={}, iovs_ptr={}, iovs_len={}", fd, iovs_ptr, iovs_len);
    let entry = data.fd_table.get_mut(fd)?;
    let iovs = mem.read_iovecs(iovs_ptr, iovs_len)?;
    mem.check(nread_ptr, 4, 4)?;
    let bytes = read_entry(entry, iovecs_len(&iovs))?;
    let nread = mem.scatter(&iovs, &bytes)?;
    mem.write_u32(nread_ptr, nread as u32)
}

/// Positional read; the descriptor's offset is left alone.
pub fn fd_pread(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    fd: u32,
    iovs_ptr: u32,
    iovs_len: u32,
    offset: u64,
    nread_ptr: u32,
) -> WasiResult<()> {
    debug!("fd_pread: fd={}, iovs_len={}, offset={}", fd, iovs_len, offset);
    let file = seekable(data.fd_table.get_mut(fd)?)?;
    let iovs = mem.read_iovecs(iovs_ptr, iovs_len)?;
    mem.check(nread_ptr, 4, 4)?;
    ensure_file_access(file, Access::READ)?;
    let bytes = file.vfs.read(&file.path, offset, iovecs_len(&iovs))?;
    let nread = mem.scatter(&iovs, &bytes)?;
    mem.write_u32(nread_ptr, nread as u32)
}

/// Positional write; the descriptor's offset is left alone.
pub fn fd_pwrite(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    fd: u32,
    iovs_ptr: u32,
    iovs_len: u32,
    offset: u64,
    nwritten_ptr: u32,
) -> WasiResult<()> {
    debug!("fd_pwrite: fd={}, iovs_len={}, offset={}", fd, iovs_len, offset);
    let file = seekable(data.fd_table.get_mut(fd)?)?;
    let iovs = mem.read_iovecs(iovs_ptr, iovs_len)?;
    mem.check(nwritten_ptr, 4, 4)?;
    ensure_file_access(file, Access::WRITE)?;
    let bytes = mem.gather(&iovs)?;
    let written = file.vfs.write(&file.path, offset, &bytes)?;
    mem.write_u32(nwritten_ptr, written as u32)
}

pub fn fd_seek(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    fd: u32,
    offset: i64,
    whence: i32,
    newoffset_ptr: u32,
) -> WasiResult<()> {
    debug!("fd_seek: fd={}, offset={}, whence={}", fd, offset, whence);
    let file = seekable(data.fd_table.get_mut(fd)?)?;
    let whence = Whence::try_from(whence)?;
    mem.check(newoffset_ptr, 8, 8)?;
    let base = match whence {
        Whence::Set => 0,
        Whence::Cur => file.offset,
        Whence::End => file.vfs.stat(&file.path)?.size,
    };
    file.offset = base.checked_add_signed(offset).ok_or(Errno::Inval)?;
    mem.write_u64(newoffset_ptr, file.offset)
}

pub fn fd_tell(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    fd: u32,
    offset_ptr: u32,
) -> WasiResult<()> {
    let file = seekable(data.fd_table.get_mut(fd)?)?;
    mem.write_u64(offset_ptr, file.offset)
}

pub fn fd_close(data: &mut ProcessData, fd: u32) -> WasiResult<()> {
    debug!("fd_close: closing fd {}", fd);
    data.fd_table.release(fd).map(|_| ())
}

pub fn fd_renumber(data: &mut ProcessData, from: u32, to: u32) -> WasiResult<()> {
    debug!("fd_renumber: from={}, to={}", from, to);
    data.fd_table.renumber(from, to)
}

/// `fd_sync` and `fd_datasync`: nothing to flush for in-memory files.
pub fn fd_sync(data: &mut ProcessData, fd: u32) -> WasiResult<()> {
    data.fd_table.get(fd).map(|_| ())
}

pub fn fd_fdstat_get(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    fd: u32,
    buf_ptr: u32,
) -> WasiResult<()> {
    debug!("fd_fdstat_get: fd={}, buf_ptr={}", fd, buf_ptr);
    let entry = data.fd_table.get(fd)?;
    mem.check(buf_ptr, FDSTAT_SIZE, 8)?;
    let flags = if entry.access().contains(Access::APPEND) {
        FdFlags::APPEND
    } else {
        FdFlags::empty()
    };
    let (base, inheriting) = rights_for(entry);

    let mut buf = [0u8; FDSTAT_SIZE as usize];
    buf[0] = entry.file_type() as u8;
    LittleEndian::write_u16(&mut buf[2..4], flags.bits());
    LittleEndian::write_u64(&mut buf[8..16], base.bits());
    LittleEndian::write_u64(&mut buf[16..24], inheriting.bits());
    mem.write_bytes(buf_ptr, &buf)
}

pub fn fd_fdstat_set_flags(data: &mut ProcessData, fd: u32, flags: u32) -> WasiResult<()> {
    debug!("fd_fdstat_set_flags: fd={}, flags={}", fd, flags);
    let flags = FdFlags::from_bits_truncate(flags as u16);
    match data.fd_table.get_mut(fd)? {
        // Capture buffers have a fixed mode.
        FDEntry::Stream { .. } => Err(Errno::Notsup),
        FDEntry::File(file) if file.is_directory() => {
            if flags.contains(FdFlags::APPEND) {
                return Err(Errno::Isdir);
            }
            Ok(())
        }
        // Only the append mode changes; read/write access stays what
        // `path_open` granted.
        FDEntry::File(file) => {
            file.access.set(Access::APPEND, flags.contains(FdFlags::APPEND));
            Ok(())
        }
    }
}

pub fn fd_filestat_get(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    fd: u32,
    buf_ptr: u32,
) -> WasiResult<()> {
    debug!("fd_filestat_get: fd={}, buf_ptr={}", fd, buf_ptr);
    let entry = data.fd_table.get(fd)?;
    mem.check(buf_ptr, FILESTAT_SIZE, 8)?;
    let buf = match entry {
        FDEntry::Stream { buffer, .. } => {
            encode_filestat(fd as u64, FileType::CharacterDevice, buffer.len() as u64)
        }
        FDEntry::File(file) => {
            let stat = file.vfs.stat(&file.path)?;
            encode_filestat(file.path.inode(), stat.file_type, stat.size)
        }
    };
    mem.write_bytes(buf_ptr, &buf)
}

pub fn fd_filestat_set_size(data: &mut ProcessData, fd: u32, size: u64) -> WasiResult<()> {
    debug!("fd_filestat_set_size: fd={}, size={}", fd, size);
    let file = seekable(data.fd_table.get_mut(fd)?)?;
    ensure_file_access(file, Access::WRITE)?;
    file.vfs.truncate(&file.path, size)?;
    Ok(())
}

/// Advice is accepted and ignored; there is no cache to tune.
pub fn fd_advise(
    data: &mut ProcessData,
    fd: u32,
    offset: u64,
    len: u64,
    advice: u32,
) -> WasiResult<()> {
    debug!("fd_advise: fd={}, offset={}, len={}, advice={}", fd, offset, len, advice);
    seekable(data.fd_table.get_mut(fd)?)?;
    if advice > ADVICE_NOREUSE {
        return Err(Errno::Inval);
    }
    Ok(())
}

/// Makes sure `offset + len` bytes are backed, zero-extending the file.
/// Never shrinks it.
pub fn fd_allocate(data: &mut ProcessData, fd: u32, offset: u64, len: u64) -> WasiResult<()> {
    debug!("fd_allocate: fd={}, offset={}, len={}", fd, offset, len);
    let file = seekable(data.fd_table.get_mut(fd)?)?;
    ensure_file_access(file, Access::WRITE)?;
    let end = offset.checked_add(len).ok_or(Errno::Inval)?;
    if end > file.vfs.stat(&file.path)?.size {
        file.vfs.truncate(&file.path, end)?;
    }
    Ok(())
}

/// Timestamps are not stored, so they cannot be set.
pub fn fd_filestat_set_times(
    data: &mut ProcessData,
    fd: u32,
    _atim: u64,
    _mtim: u64,
    _fst_flags: u32,
) -> WasiResult<()> {
    debug!("fd_filestat_set_times: fd={}", fd);
    data.fd_table.get(fd)?;
    Err(Errno::Notsup)
}

pub fn fd_prestat_get(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    fd: u32,
    buf_ptr: u32,
) -> WasiResult<()> {
    let name = preopen_name(data, fd)?;
    mem.check(buf_ptr, PRESTAT_SIZE, 4)?;
    let mut buf = [0u8; PRESTAT_SIZE as usize];
    // tag 0: directory
    LittleEndian::write_u32(&mut buf[4..8], name.len() as u32);
    mem.write_bytes(buf_ptr, &buf)
}

pub fn fd_prestat_dir_name(
    data: &mut ProcessData,
    mem: &mut GuestMemory<'_>,
    fd: u32,
    path_ptr: u32,
    path_len: u32,
) -> WasiResult<()> {
    let name = preopen_name(data, fd)?;
    if (path_len as usize) < name.len() {
        return Err(Errno::Nametoolong);
    }
    mem.write_bytes(path_ptr, name.as_bytes())
}

fn preopen_name(data: &ProcessData, fd: u32) -> WasiResult<&str> {
    match data.fd_table.get(fd)? {
        FDEntry::File(OpenFile { preopen: Some(name), .. }) => Ok(name.as_str()),
        _ => Err(Errno::Badf),
    }
}

fn write_entry(entry: &mut FDEntry, bytes: &[u8]) -> WasiResult<usize> {
    match entry {
        FDEntry::Stream { buffer, access, .. } => {
            if !access.contains(Access::WRITE) {
                return Err(Errno::Badf);
            }
            buffer.extend_from_slice(bytes);
            Ok(bytes.len())
        }
        FDEntry::File(file) => {
            ensure_file_access(file, Access::WRITE)?;
            if file.access.contains(Access::APPEND) {
                file.offset = file.vfs.append(&file.path, bytes)?;
            } else {
                let written = file.vfs.write(&file.path, file.offset, bytes)?;
                file.offset += written as u64;
            }
            Ok(bytes.len())
        }
    }
}

fn read_entry(entry: &mut FDEntry, want: usize) -> WasiResult<Vec<u8>> {
    match entry {
        FDEntry::Stream { buffer, read_ptr, access } => {
            if !access.contains(Access::READ) {
                return Err(Errno::Badf);
            }
            let end = read_ptr.saturating_add(want).min(buffer.len());
            let chunk = buffer[*read_ptr..end].to_vec();
            *read_ptr = end;
            Ok(chunk)
        }
        FDEntry::File(file) => {
            ensure_file_access(file, Access::READ)?;
            let chunk = file.vfs.read(&file.path, file.offset, want)?;
            file.offset += chunk.len() as u64;
            Ok(chunk)
        }
    }
}

fn seekable(entry: &mut FDEntry) -> WasiResult<&mut OpenFile> {
    match entry {
        FDEntry::Stream { .. } => Err(Errno::Spipe),
        FDEntry::File(file) if file.is_directory() => Err(Errno::Isdir),
        FDEntry::File(file) => Ok(file),
    }
}

fn ensure_file_access(file: &OpenFile, needed: Access) -> WasiResult<()> {
    if file.is_directory() {
        return Err(Errno::Isdir);
    }
    if !file.access.contains(needed) {
        return Err(Errno::Badf);
    }
    Ok(())
}

fn rights_for(entry: &FDEntry) -> (Rights, Rights) {
    let access = entry.access();
    let mut base = Rights::FD_FILESTAT_GET | Rights::POLL_FD_READWRITE;
    if access.contains(Access::READ) {
        base |= Rights::FD_READ;
    }
    if access.contains(Access::WRITE) {
        base |= Rights::FD_WRITE;
    }
    match entry {
        FDEntry::Stream { .. } => (base, Rights::empty()),
        FDEntry::File(file) if file.is_directory() => {
            let dir = Rights::FD_READDIR
                | Rights::FD_FILESTAT_GET
                | Rights::PATH_OPEN
                | Rights::PATH_CREATE_DIRECTORY
                | Rights::PATH_CREATE_FILE
                | Rights::PATH_FILESTAT_GET
                | Rights::PATH_REMOVE_DIRECTORY
                | Rights::PATH_UNLINK_FILE
                | Rights::PATH_RENAME_SOURCE
                | Rights::PATH_RENAME_TARGET;
            (dir, Rights::all())
        }
        FDEntry::File(_) => {
            base |= Rights::FD_SEEK
                | Rights::FD_TELL
                | Rights::FD_SYNC
                | Rights::FD_DATASYNC
                | Rights::FD_FDSTAT_SET_FLAGS
                | Rights::FD_ADVISE;
            if access.contains(Access::WRITE) {
                base |= Rights::FD_FILESTAT_SET_SIZE | Rights::FD_ALLOCATE;
            }
            (base, Rights::empty())
        }
    }
}

/// Lays out a 64-byte `filestat`. Timestamps are always zero.
pub(crate) fn encode_filestat(
    ino: u64,
    file_type: FileType,
    size: u64,
) -> [u8; FILESTAT_SIZE as usize] {
    let mut buf = [0u8; FILESTAT_SIZE as usize];
    LittleEndian::write_u64(&mut buf[8..16], ino);
    buf[16] = file_type as u8;
    LittleEndian::write_u64(&mut buf[24..32], 1);
    LittleEndian::write_u64(&mut buf[32..40], size);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::config::RuntimeConfig;
    use crate::runtime::fd_table::{STDIN, STDOUT};
    use crate::runtime::vfs::{Vfs, VfsPath};

    const IOV: u32 = 0;
    const OUT: u32 = 16;
    const BUF: u32 = 64;

    fn process_with_file(contents: &str) -> (ProcessData, Vfs, u32) {
        let vfs = Vfs::new();
        let path = VfsPath::parse("/file.txt").unwrap();
        vfs.write_file(&path, contents).unwrap();
        let config = RuntimeConfig::builder().stdin("typed input").build().unwrap();
        let mut data = ProcessData::new(config).unwrap();
        let fd = data
            .fd_table
            .alloc(FDEntry::File(OpenFile {
                vfs: vfs.clone(),
                path,
                root: VfsPath::root(),
                offset: 0,
                access: Access::READ | Access::WRITE,
                file_type: FileType::RegularFile,
                preopen: None,
            }))
            .unwrap();
        (data, vfs, fd)
    }

    fn set_iov(raw: &mut [u8], ptr: u32, len: u32) {
        LittleEndian::write_u32(&mut raw[IOV as usize..], ptr);
        LittleEndian::write_u32(&mut raw[IOV as usize + 4..], len);
    }

    #[test]
    fn write_seek_read_round_trip() {
        let (mut data, vfs, fd) = process_with_file("");
        let mut raw = vec![0u8; 256];
        raw[BUF as usize..BUF as usize + 5].copy_from_slice(b"hello");
        set_iov(&mut raw, BUF, 5);
        let mut mem = GuestMemory::new(&mut raw);

        fd_write(&mut data, &mut mem, fd, IOV, 1, OUT).unwrap();
        assert_eq!(mem.read_u32(OUT).unwrap(), 5);
        fd_seek(&mut data, &mut mem, fd, 0, 0, OUT).unwrap();

        mem.slice_mut(BUF, 5).unwrap().fill(0);
        fd_read(&mut data, &mut mem, fd, IOV, 1, OUT).unwrap();
        assert_eq!(mem.read_u32(OUT).unwrap(), 5);
        assert_eq!(mem.slice(BUF, 5).unwrap(), b"hello");

        fd_read(&mut data, &mut mem, fd, IOV, 1, OUT).unwrap();
        assert_eq!(mem.read_u32(OUT).unwrap(), 0);
        assert_eq!(vfs.read_file(&VfsPath::parse("/file.txt").unwrap()).unwrap(), b"hello");
    }

    #[test]
    fn bad_descriptor_is_badf_without_mutation() {
        let (mut data, vfs, _) = process_with_file("keep");
        let mut raw = vec![0u8; 256];
        set_iov(&mut raw, BUF, 4);
        let mut mem = GuestMemory::new(&mut raw);
        assert_eq!(fd_write(&mut data, &mut mem, 9, IOV, 1, OUT), Err(Errno::Badf));
        assert_eq!(fd_read(&mut data, &mut mem, 9, IOV, 1, OUT), Err(Errno::Badf));
        assert_eq!(fd_close(&mut data, 9), Err(Errno::Badf));
        assert_eq!(fd_filestat_set_size(&mut data, 9, 0), Err(Errno::Badf));
        assert_eq!(vfs.read_file(&VfsPath::parse("/file.txt").unwrap()).unwrap(), b"keep");
    }

    #[test]
    fn out_of_bounds_iovec_is_inval_and_file_untouched() {
        let (mut data, vfs, fd) = process_with_file("keep");
        let mut raw = vec![0u8; 128];
        set_iov(&mut raw, 120, 64);
        let mut mem = GuestMemory::new(&mut raw);
        assert_eq!(fd_write(&mut data, &mut mem, fd, IOV, 1, OUT), Err(Errno::Inval));
        assert_eq!(fd_read(&mut data, &mut mem, fd, IOV, 1, OUT), Err(Errno::Inval));
        assert_eq!(vfs.read_file(&VfsPath::parse("/file.txt").unwrap()).unwrap(), b"keep");
        match data.fd_table.get(fd).unwrap() {
            FDEntry::File(file) => assert_eq!(file.offset, 0),
            other => panic!("unexpected entry {other}"),
        }
    }

    #[test]
    fn stdio_streams_capture_and_serve_bytes() {
        let (mut data, _, _) = process_with_file("");
        let mut raw = vec![0u8; 256];
        set_iov(&mut raw, BUF, 5);
        let mut mem = GuestMemory::new(&mut raw);

        fd_read(&mut data, &mut mem, STDIN, IOV, 1, OUT).unwrap();
        assert_eq!(mem.slice(BUF, 5).unwrap(), b"typed");
        fd_write(&mut data, &mut mem, STDOUT, IOV, 1, OUT).unwrap();
        assert_eq!(data.fd_table.take_stream(STDOUT).unwrap(), b"typed");

        assert_eq!(fd_read(&mut data, &mut mem, STDOUT, IOV, 1, OUT), Err(Errno::Badf));
        assert_eq!(fd_seek(&mut data, &mut mem, STDOUT, 0, 0, OUT), Err(Errno::Spipe));
    }

    #[test]
    fn seek_rejects_negative_result_and_bad_whence() {
        let (mut data, _, fd) = process_with_file("0123456789");
        let mut raw = vec![0u8; 64];
        let mut mem = GuestMemory::new(&mut raw);
        fd_seek(&mut data, &mut mem, fd, -3, 2, OUT).unwrap();
        assert_eq!(LittleEndian::read_u64(mem.slice(OUT, 8).unwrap()), 7);
        assert_eq!(fd_seek(&mut data, &mut mem, fd, -8, 1, OUT), Err(Errno::Inval));
        assert_eq!(fd_seek(&mut data, &mut mem, fd, 0, 7, OUT), Err(Errno::Inval));
        fd_tell(&mut data, &mut mem, fd, OUT).unwrap();
        assert_eq!(LittleEndian::read_u64(mem.slice(OUT, 8).unwrap()), 7);
    }

    #[test]
    fn append_mode_always_writes_at_end() {
        let (mut data, vfs, fd) = process_with_file("abc");
        fd_fdstat_set_flags(&mut data, fd, FdFlags::APPEND.bits() as u32).unwrap();
        let mut raw = vec![0u8; 256];
        raw[BUF as usize..BUF as usize + 2].copy_from_slice(b"de");
        set_iov(&mut raw, BUF, 2);
        let mut mem = GuestMemory::new(&mut raw);
        fd_write(&mut data, &mut mem, fd, IOV, 1, OUT).unwrap();
        assert_eq!(vfs.read_file(&VfsPath::parse("/file.txt").unwrap()).unwrap(), b"abcde");

        fd_fdstat_get(&mut data, &mut mem, fd, BUF).unwrap();
        assert_eq!(mem.slice(BUF, 1).unwrap()[0], FileType::RegularFile as u8);
        assert_eq!(LittleEndian::read_u16(mem.slice(BUF + 2, 2).unwrap()), FdFlags::APPEND.bits());
    }

    #[test]
    fn pread_and_pwrite_leave_offset_alone() {
        let (mut data, vfs, fd) = process_with_file("abcdef");
        let mut raw = vec![0u8; 256];
        set_iov(&mut raw, BUF, 3);
        let mut mem = GuestMemory::new(&mut raw);
        fd_pread(&mut data, &mut mem, fd, IOV, 1, 2, OUT).unwrap();
        assert_eq!(mem.slice(BUF, 3).unwrap(), b"cde");
        fd_pwrite(&mut data, &mut mem, fd, IOV, 1, 0, OUT).unwrap();
        assert_eq!(vfs.read_file(&VfsPath::parse("/file.txt").unwrap()).unwrap(), b"cdedef");
        fd_tell(&mut data, &mut mem, fd, OUT).unwrap();
        assert_eq!(LittleEndian::read_u64(mem.slice(OUT, 8).unwrap()), 0);
    }

    #[test]
    fn filestat_reports_size_and_type() {
        let (mut data, _, fd) = process_with_file("12345");
        let mut raw = vec![0u8; 256];
        let mut mem = GuestMemory::new(&mut raw);
        fd_filestat_get(&mut data, &mut mem, fd, BUF).unwrap();
        let stat = mem.slice(BUF, FILESTAT_SIZE).unwrap();
        assert_eq!(stat[16], FileType::RegularFile as u8);
        assert_eq!(LittleEndian::read_u64(&stat[32..40]), 5);

        fd_filestat_set_size(&mut data, fd, 2).unwrap();
        fd_filestat_get(&mut data, &mut mem, fd, BUF).unwrap();
        assert_eq!(LittleEndian::read_u64(&mem.slice(BUF, FILESTAT_SIZE).unwrap()[32..40]), 2);
    }

    #[test]
    fn append_flag_does_not_grant_write_access() {
        let (mut data, vfs, _) = process_with_file("readonly");
        let fd = data
            .fd_table
            .alloc(FDEntry::File(OpenFile {
                vfs: vfs.clone(),
                path: VfsPath::parse("/file.txt").unwrap(),
                root: VfsPath::root(),
                offset: 0,
                access: Access::READ,
                file_type: FileType::RegularFile,
                preopen: None,
            }))
            .unwrap();
        fd_fdstat_set_flags(&mut data, fd, FdFlags::APPEND.bits() as u32).unwrap();

        let mut raw = vec![0u8; 256];
        raw[BUF as usize..BUF as usize + 5].copy_from_slice(b"PWNED");
        set_iov(&mut raw, BUF, 5);
        let mut mem = GuestMemory::new(&mut raw);
        assert_eq!(fd_write(&mut data, &mut mem, fd, IOV, 1, OUT), Err(Errno::Badf));
        assert_eq!(vfs.read_file(&VfsPath::parse("/file.txt").unwrap()).unwrap(), b"readonly");

        fd_fdstat_get(&mut data, &mut mem, fd, BUF).unwrap();
        let base = LittleEndian::read_u64(mem.slice(BUF + 8, 8).unwrap());
        assert!(!Rights::from_bits_truncate(base).contains(Rights::FD_WRITE));
    }

    #[test]
    fn stdio_flags_cannot_be_changed() {
        let (mut data, _, _) = process_with_file("");
        let append = FdFlags::APPEND.bits() as u32;
        assert_eq!(fd_fdstat_set_flags(&mut data, STDOUT, append), Err(Errno::Notsup));
        assert_eq!(fd_fdstat_set_flags(&mut data, STDIN, 0), Err(Errno::Notsup));
        assert_eq!(fd_fdstat_set_flags(&mut data, 9, append), Err(Errno::Badf));
    }

    #[test]
    fn allocate_extends_with_zeros_and_never_shrinks() {
        let (mut data, vfs, fd) = process_with_file("abc");
        let path = VfsPath::parse("/file.txt").unwrap();
        fd_allocate(&mut data, fd, 2, 4).unwrap();
        assert_eq!(vfs.read_file(&path).unwrap(), b"abc\0\0\0");
        fd_allocate(&mut data, fd, 0, 1).unwrap();
        assert_eq!(vfs.stat(&path).unwrap().size, 6);
        assert_eq!(fd_allocate(&mut data, fd, u64::MAX, 1), Err(Errno::Inval));
        assert_eq!(fd_allocate(&mut data, STDOUT, 0, 1), Err(Errno::Spipe));
    }

    #[test]
    fn advise_and_set_times() {
        let (mut data, _, fd) = process_with_file("abc");
        fd_advise(&mut data, fd, 0, 3, 1).unwrap();
        assert_eq!(fd_advise(&mut data, fd, 0, 3, 9), Err(Errno::Inval));
        assert_eq!(fd_advise(&mut data, STDIN, 0, 3, 0), Err(Errno::Spipe));
        assert_eq!(fd_filestat_set_times(&mut data, fd, 1, 2, 0), Err(Errno::Notsup));
        assert_eq!(fd_filestat_set_times(&mut data, 40, 1, 2, 0), Err(Errno::Badf));
    }
}
