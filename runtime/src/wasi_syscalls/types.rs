//! WASI preview1 ABI values: errno codes, file types, flag sets and the
//! fixed struct sizes the guest expects.

use std::fmt;

use bitflags::bitflags;

/// WASI errno. Numbering follows `wasi_snapshot_preview1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Errno {
    Success = 0,
    Acces = 2,
    Badf = 8,
    Exist = 20,
    Fault = 21,
    Fbig = 22,
    Ilseq = 25,
    Inval = 28,
    Io = 29,
    Isdir = 31,
    Mfile = 33,
    Nametoolong = 37,
    Noent = 44,
    Nosys = 52,
    Notdir = 54,
    Notempty = 55,
    Notsock = 57,
    Notsup = 58,
    Overflow = 61,
    Perm = 63,
    Spipe = 70,
    Xdev = 75,
    Notcapable = 76,
}

impl Errno {
    pub fn raw(self) -> i32 {
        self as u16 as i32
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.raw())
    }
}

impl std::error::Error for Errno {}

/// Result type used by every syscall body.
pub type WasiResult<T> = Result<T, Errno>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileType {
    Unknown = 0,
    CharacterDevice = 2,
    Directory = 3,
    RegularFile = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

impl TryFrom<i32> for Whence {
    type Error = Errno;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            _ => Err(Errno::Inval),
        }
    }
}

bitflags! {
    /// `path_open` open flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OFlags: u16 {
        const CREAT = 1 << 0;
        const DIRECTORY = 1 << 1;
        const EXCL = 1 << 2;
        const TRUNC = 1 << 3;
    }
}

bitflags! {
    /// Descriptor flags. Only `APPEND` changes behavior here; the sync
    /// flags are accepted and ignored since nothing is ever flushed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FdFlags: u16 {
        const APPEND = 1 << 0;
        const DSYNC = 1 << 1;
        const NONBLOCK = 1 << 2;
        const RSYNC = 1 << 3;
        const SYNC = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u64 {
        const FD_DATASYNC = 1 << 0;
        const FD_READ = 1 << 1;
        const FD_SEEK = 1 << 2;
        const FD_FDSTAT_SET_FLAGS = 1 << 3;
        const FD_SYNC = 1 << 4;
        const FD_TELL = 1 << 5;
        const FD_WRITE = 1 << 6;
        const FD_ADVISE = 1 << 7;
        const FD_ALLOCATE = 1 << 8;
        const PATH_CREATE_DIRECTORY = 1 << 9;
        const PATH_CREATE_FILE = 1 << 10;
        const PATH_LINK_SOURCE = 1 << 11;
        const PATH_LINK_TARGET = 1 << 12;
        const PATH_OPEN = 1 << 13;
        const FD_READDIR = 1 << 14;
        const PATH_READLINK = 1 << 15;
        const PATH_RENAME_SOURCE = 1 << 16;
        const PATH_RENAME_TARGET = 1 << 17;
        const PATH_FILESTAT_GET = 1 << 18;
        const PATH_FILESTAT_SET_SIZE = 1 << 19;
        const PATH_FILESTAT_SET_TIMES = 1 << 20;
        const FD_FILESTAT_GET = 1 << 21;
        const FD_FILESTAT_SET_SIZE = 1 << 22;
        const FD_FILESTAT_SET_TIMES = 1 << 23;
        const PATH_SYMLINK = 1 << 24;
        const PATH_REMOVE_DIRECTORY = 1 << 25;
        const PATH_UNLINK_FILE = 1 << 26;
        const POLL_FD_READWRITE = 1 << 27;
        const SOCK_SHUTDOWN = 1 << 28;
    }
}

/// Size in bytes of a `fdstat` record.
pub const FDSTAT_SIZE: u32 = 24;
/// Size in bytes of a `filestat` record.
pub const FILESTAT_SIZE: u32 = 64;
/// Size in bytes of a `prestat` record.
pub const PRESTAT_SIZE: u32 = 8;
/// Size in bytes of a `dirent` header, not counting the name.
pub const DIRENT_SIZE: usize = 24;
/// Size in bytes of an `iovec`/`ciovec`.
pub const IOVEC_SIZE: u32 = 8;
/// Size in bytes of a `poll_oneoff` subscription.
pub const SUBSCRIPTION_SIZE: u32 = 48;
/// Size in bytes of a `poll_oneoff` event.
pub const EVENT_SIZE: u32 = 32;

/// `eventtype`: the tag of a subscription and of the event it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    Clock = 0,
    FdRead = 1,
    FdWrite = 2,
}

impl TryFrom<u8> for EventType {
    type Error = Errno;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(EventType::Clock),
            1 => Ok(EventType::FdRead),
            2 => Ok(EventType::FdWrite),
            _ => Err(Errno::Inval),
        }
    }
}

bitflags! {
    /// `subclockflags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubclockFlags: u16 {
        /// The timeout is an absolute time on the clock, not a delay.
        const ABSTIME = 1 << 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_matches_preview1_numbering() {
        assert_eq!(Errno::Success.raw(), 0);
        assert_eq!(Errno::Badf.raw(), 8);
        assert_eq!(Errno::Inval.raw(), 28);
        assert_eq!(Errno::Noent.raw(), 44);
        assert_eq!(Errno::Notcapable.raw(), 76);
    }

    #[test]
    fn whence_rejects_unknown_values() {
        assert_eq!(Whence::try_from(2), Ok(Whence::End));
        assert_eq!(Whence::try_from(3), Err(Errno::Inval));
        assert_eq!(EventType::try_from(2), Ok(EventType::FdWrite));
        assert_eq!(EventType::try_from(3), Err(Errno::Inval));
    }
}
